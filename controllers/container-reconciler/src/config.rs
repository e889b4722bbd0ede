//! Engine configuration
//!
//! Read once at startup from `KEEL_*` environment variables. Cluster-level
//! networking facts (custom domains, reverse proxy, public IP) are read-only
//! inputs here; nothing in the engine writes them.

use crate::error::ReconcileError;
use std::env;
use tracing::{debug, info};

pub const DEFAULT_INGRESS_CLASS: &str = "nginx";
pub const DEFAULT_INGRESS_NAMESPACE: &str = "ingress-nginx";
pub const DEFAULT_INGRESS_CONTROLLER_NAME: &str = "ingress-nginx-controller";
pub const DEFAULT_TCP_SERVICES_CONFIGMAP: &str = "tcp-services";
pub const DEFAULT_PIPELINE_NAMESPACE: &str = "tekton-builds";
pub const DEFAULT_PIPELINE_NAME: &str = "keel-build-deploy";

/// Runtime configuration for the reconciliation engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Custom domains served by the cluster ingress, first one is primary
    pub cluster_domains: Vec<String>,
    /// Public URL of a reverse proxy in front of the cluster
    pub reverse_proxy_url: Option<String>,
    /// Public IP of the cluster ingress
    pub cluster_ip: Option<String>,
    pub ingress_class: String,
    /// Namespace of the ingress controller (tcp-services lives here)
    pub ingress_namespace: String,
    /// Name fragment identifying the ingress controller Service and Deployment
    pub ingress_controller_name: String,
    pub tcp_services_configmap: String,
    pub pipeline_namespace: String,
    /// Tekton Pipeline referenced by every PipelineRun
    pub pipeline_name: String,
    /// cert-manager ClusterIssuer for custom domain TLS
    pub cert_issuer: Option<String>,
    /// Wait for the ingress controller patches instead of detaching them
    pub await_proxy_sweep: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cluster_domains: Vec::new(),
            reverse_proxy_url: None,
            cluster_ip: None,
            ingress_class: DEFAULT_INGRESS_CLASS.to_string(),
            ingress_namespace: DEFAULT_INGRESS_NAMESPACE.to_string(),
            ingress_controller_name: DEFAULT_INGRESS_CONTROLLER_NAME.to_string(),
            tcp_services_configmap: DEFAULT_TCP_SERVICES_CONFIGMAP.to_string(),
            pipeline_namespace: DEFAULT_PIPELINE_NAMESPACE.to_string(),
            pipeline_name: DEFAULT_PIPELINE_NAME.to_string(),
            cert_issuer: None,
            await_proxy_sweep: false,
        }
    }
}

/// Where a git provider should deliver push events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookHost {
    /// First cluster custom domain, served over TLS
    Domain(String),
    /// Reverse proxy base URL
    ReverseProxy(String),
    /// Bare cluster IP, plain HTTP
    ClusterIp(String),
}

impl WebhookHost {
    /// Full listener URL for a path such as `/tekton-<slug>`
    pub fn url(&self, path: &str) -> String {
        match self {
            WebhookHost::Domain(domain) => format!("https://{}{}", domain, path),
            WebhookHost::ReverseProxy(base) => format!("{}{}", base.trim_end_matches('/'), path),
            WebhookHost::ClusterIp(ip) => format!("http://{}{}", ip, path),
        }
    }

    /// Providers only verify certificates we know are valid
    pub fn verify_ssl(&self) -> bool {
        matches!(self, WebhookHost::Domain(_))
    }
}

impl EngineConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ReconcileError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from any key lookup (environment, map in tests)
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ReconcileError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let cluster_domains = non_empty("KEEL_CLUSTER_DOMAINS")
            .map(|v| {
                v.split(',')
                    .map(|d| d.trim().to_lowercase())
                    .filter(|d| !d.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let reverse_proxy_url = non_empty("KEEL_REVERSE_PROXY_URL");
        if let Some(url) = &reverse_proxy_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ReconcileError::InvalidConfig(format!(
                    "KEEL_REVERSE_PROXY_URL must be an http(s) URL, got '{}'",
                    url
                )));
            }
        }

        let await_proxy_sweep = match non_empty("KEEL_AWAIT_PROXY_SWEEP").as_deref() {
            None => defaults.await_proxy_sweep,
            Some("true") | Some("1") => true,
            Some("false") | Some("0") => false,
            Some(other) => {
                return Err(ReconcileError::InvalidConfig(format!(
                    "KEEL_AWAIT_PROXY_SWEEP must be true or false, got '{}'",
                    other
                )));
            }
        };

        Ok(Self {
            cluster_domains,
            reverse_proxy_url,
            cluster_ip: non_empty("KEEL_CLUSTER_IP"),
            ingress_class: non_empty("KEEL_INGRESS_CLASS").unwrap_or_else(|| defaults.ingress_class.clone()),
            ingress_namespace: non_empty("KEEL_INGRESS_NAMESPACE")
                .unwrap_or_else(|| defaults.ingress_namespace.clone()),
            ingress_controller_name: non_empty("KEEL_INGRESS_CONTROLLER_NAME")
                .unwrap_or_else(|| defaults.ingress_controller_name.clone()),
            tcp_services_configmap: non_empty("KEEL_TCP_SERVICES_CONFIGMAP")
                .unwrap_or_else(|| defaults.tcp_services_configmap.clone()),
            pipeline_namespace: non_empty("KEEL_PIPELINE_NAMESPACE")
                .unwrap_or_else(|| defaults.pipeline_namespace.clone()),
            pipeline_name: non_empty("KEEL_PIPELINE_NAME").unwrap_or_else(|| defaults.pipeline_name.clone()),
            cert_issuer: non_empty("KEEL_CERT_ISSUER"),
            await_proxy_sweep,
        })
    }

    /// Primary custom domain, if the cluster has any
    pub fn primary_domain(&self) -> Option<&str> {
        self.cluster_domains.first().map(String::as_str)
    }

    /// Pipeline listeners need an ingress only when reachable by name
    pub fn exposes_listener_ingress(&self) -> bool {
        !self.cluster_domains.is_empty() || self.reverse_proxy_url.is_some()
    }

    /// Resolve the webhook delivery host: custom domain, then reverse proxy,
    /// then raw cluster IP.
    pub fn webhook_host(&self) -> Result<WebhookHost, ReconcileError> {
        if let Some(domain) = self.primary_domain() {
            return Ok(WebhookHost::Domain(domain.to_string()));
        }
        if let Some(proxy) = &self.reverse_proxy_url {
            return Ok(WebhookHost::ReverseProxy(proxy.clone()));
        }
        if let Some(ip) = &self.cluster_ip {
            return Ok(WebhookHost::ClusterIp(ip.clone()));
        }
        Err(ReconcileError::InvalidConfig(
            "one of KEEL_CLUSTER_DOMAINS, KEEL_REVERSE_PROXY_URL or KEEL_CLUSTER_IP is required for pipelines"
                .to_string(),
        ))
    }

    /// Configuration for a process that exits after one operation
    ///
    /// A detached proxy sweep would be cancelled with the runtime, so the
    /// controller edits are always awaited.
    pub fn one_shot(mut self) -> Self {
        if !self.await_proxy_sweep {
            debug!("Awaiting proxy sweeps in a one-shot process");
            self.await_proxy_sweep = true;
        }
        self
    }

    /// Log the effective configuration
    pub fn log(&self) {
        info!("Configuration:");
        info!("  Cluster domains: {:?}", self.cluster_domains);
        info!("  Reverse proxy: {}", self.reverse_proxy_url.as_deref().unwrap_or("none"));
        info!("  Cluster IP: {}", self.cluster_ip.as_deref().unwrap_or("none"));
        info!("  Ingress class: {}", self.ingress_class);
        info!(
            "  TCP services: {}/{}",
            self.ingress_namespace, self.tcp_services_configmap
        );
        info!("  Ingress controller: {}", self.ingress_controller_name);
        info!(
            "  Pipelines: {}/{}",
            self.pipeline_namespace, self.pipeline_name
        );
        info!("  Await proxy sweep: {}", self.await_proxy_sweep);
    }
}
