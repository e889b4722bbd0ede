//! Ingress reconcilers
//!
//! `IngressReconciler` manages the cluster-domain exposure, either by path
//! on the shared host or by per-container subdomain. The two strategies are
//! separate objects; switching deletes one and creates the other.
//! `CustomDomainReconciler` manages the single user-supplied domain.
//!
//! Both take the container `iid` as `name` and derive object names from it.

use super::{adopt_metadata, ResourceReconciler};
use crate::cluster::{create_typed, delete_if_exists, get_typed, replace_typed, ClusterApi, ResourceKind};
use crate::error::ReconcileError;
use crate::manifest::{names, Definition};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule, IngressServiceBackend, IngressSpec,
    IngressTLS, ServiceBackendPort,
};
use platform_model::IngressType;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

pub const REWRITE_TARGET_ANNOTATION: &str = "nginx.ingress.kubernetes.io/rewrite-target";
pub const USE_REGEX_ANNOTATION: &str = "nginx.ingress.kubernetes.io/use-regex";
pub const CLUSTER_ISSUER_ANNOTATION: &str = "cert-manager.io/cluster-issuer";

fn backend(def: &Definition<'_>) -> IngressBackend {
    IngressBackend {
        service: Some(IngressServiceBackend {
            name: names::primary(def.iid()),
            port: Some(ServiceBackendPort {
                number: Some(i32::from(def.container.networking.container_port)),
                name: None,
            }),
        }),
        resource: None,
    }
}

fn rule(host: Option<String>, path: String, path_type: &str, backend: IngressBackend) -> IngressRule {
    IngressRule {
        host,
        http: Some(HTTPIngressRuleValue {
            paths: vec![HTTPIngressPath {
                path: Some(path),
                path_type: path_type.to_string(),
                backend,
            }],
        }),
    }
}

fn ingress(def: &Definition<'_>, name: &str, annotations: BTreeMap<String, String>, spec: IngressSpec) -> Ingress {
    let mut metadata = def.metadata(name);
    if !annotations.is_empty() {
        metadata.annotations = Some(annotations);
    }
    Ingress {
        metadata,
        spec: Some(IngressSpec {
            ingress_class_name: Some(def.config.ingress_class.clone()),
            ..spec
        }),
        status: None,
    }
}

/// Path strategy: `/<iid>(/|$)(.*)` on the shared host, rewritten to `/$2`
pub fn render_path(def: &Definition<'_>) -> Ingress {
    let iid = def.iid();
    let annotations = BTreeMap::from([
        (REWRITE_TARGET_ANNOTATION.to_string(), "/$2".to_string()),
        (USE_REGEX_ANNOTATION.to_string(), "true".to_string()),
    ]);
    let host = def.config.primary_domain().map(str::to_string);
    ingress(
        def,
        &names::path_ingress(iid),
        annotations,
        IngressSpec {
            rules: Some(vec![rule(
                host,
                format!("/{}(/|$)(.*)", iid),
                "ImplementationSpecific",
                backend(def),
            )]),
            ..Default::default()
        },
    )
}

/// Subdomain strategy: `<iid>.<domain>` for every cluster domain
pub fn render_subdomain(def: &Definition<'_>) -> Result<Ingress, ReconcileError> {
    let iid = def.iid();
    if def.config.cluster_domains.is_empty() {
        return Err(ReconcileError::Validation(format!(
            "subdomain ingress for {} needs at least one cluster domain",
            iid
        )));
    }
    let rules = def
        .config
        .cluster_domains
        .iter()
        .map(|domain| rule(Some(format!("{}.{}", iid, domain)), "/".to_string(), "Prefix", backend(def)))
        .collect();
    Ok(ingress(
        def,
        &names::subdomain_ingress(iid),
        BTreeMap::new(),
        IngressSpec {
            rules: Some(rules),
            ..Default::default()
        },
    ))
}

/// Custom domain object; TLS through cert-manager when an issuer is configured
pub fn render_custom_domain(def: &Definition<'_>, domain: &str) -> Ingress {
    let iid = def.iid();
    let mut annotations = BTreeMap::new();
    let tls = def.config.cert_issuer.as_ref().map(|issuer| {
        annotations.insert(CLUSTER_ISSUER_ANNOTATION.to_string(), issuer.clone());
        vec![IngressTLS {
            hosts: Some(vec![domain.to_string()]),
            secret_name: Some(names::custom_domain_tls(iid)),
        }]
    });
    ingress(
        def,
        &names::custom_domain_ingress(iid),
        annotations,
        IngressSpec {
            rules: Some(vec![rule(Some(domain.to_string()), "/".to_string(), "Prefix", backend(def))]),
            tls,
            ..Default::default()
        },
    )
}

/// Create, or replace the live spec keeping its identity
async fn upsert(cluster: &dyn ClusterApi, namespace: &str, desired: Ingress) -> Result<(), ReconcileError> {
    let name = desired.metadata.name.clone().unwrap_or_default();
    let live: Option<Ingress> = get_typed(cluster, ResourceKind::Ingress, namespace, &name).await?;
    match live {
        Some(live) => {
            let merged = Ingress {
                metadata: adopt_metadata(live.metadata, desired.metadata),
                spec: desired.spec,
                status: None,
            };
            replace_typed(cluster, ResourceKind::Ingress, namespace, &name, &merged).await?;
        }
        None => {
            info!("Creating Ingress {}/{}", namespace, name);
            create_typed(cluster, ResourceKind::Ingress, namespace, &desired).await?;
        }
    }
    Ok(())
}

async fn remove(cluster: &dyn ClusterApi, namespace: &str, name: &str) -> Result<(), ReconcileError> {
    if delete_if_exists(cluster, ResourceKind::Ingress, namespace, name).await? {
        info!("Deleted Ingress {}/{}", namespace, name);
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct IngressReconciler {
    cluster: Arc<dyn ClusterApi>,
}

impl IngressReconciler {
    pub fn new(cluster: Arc<dyn ClusterApi>) -> Self {
        Self { cluster }
    }

    /// Rendered object for the active strategy and the name of the other one
    fn strategy(def: &Definition<'_>) -> Result<(Ingress, String), ReconcileError> {
        let iid = def.iid();
        match def.container.networking.ingress.ingress_type {
            IngressType::Path => Ok((render_path(def), names::subdomain_ingress(iid))),
            IngressType::Subdomain => Ok((render_subdomain(def)?, names::path_ingress(iid))),
        }
    }

    fn enabled(def: &Definition<'_>) -> bool {
        def.container.is_networked() && def.container.networking.ingress.enabled
    }
}

#[async_trait::async_trait]
impl ResourceReconciler for IngressReconciler {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Ingress
    }

    async fn create(&self, def: &Definition<'_>, _name: &str, namespace: &str) -> Result<(), ReconcileError> {
        if !Self::enabled(def) {
            return Ok(());
        }
        let (desired, _) = Self::strategy(def)?;
        info!(
            "Creating {} Ingress {}/{}",
            def.container.networking.ingress.ingress_type.as_str(),
            namespace,
            desired.metadata.name.as_deref().unwrap_or_default()
        );
        create_typed(self.cluster.as_ref(), ResourceKind::Ingress, namespace, &desired).await?;
        Ok(())
    }

    async fn update(&self, def: &Definition<'_>, name: &str, namespace: &str) -> Result<(), ReconcileError> {
        info!("Reconciling Ingress for {}/{}", namespace, name);
        if !Self::enabled(def) {
            debug!("Ingress disabled for {}/{}", namespace, name);
            return self.delete(name, namespace).await;
        }
        let (desired, other) = Self::strategy(def)?;
        remove(self.cluster.as_ref(), namespace, &other).await?;
        upsert(self.cluster.as_ref(), namespace, desired).await
    }

    async fn delete(&self, name: &str, namespace: &str) -> Result<(), ReconcileError> {
        remove(self.cluster.as_ref(), namespace, &names::path_ingress(name)).await?;
        remove(self.cluster.as_ref(), namespace, &names::subdomain_ingress(name)).await
    }
}

#[derive(Debug, Clone)]
pub struct CustomDomainReconciler {
    cluster: Arc<dyn ClusterApi>,
}

impl CustomDomainReconciler {
    pub fn new(cluster: Arc<dyn ClusterApi>) -> Self {
        Self { cluster }
    }

    fn domain<'a>(def: &Definition<'a>) -> Option<&'a str> {
        let custom = &def.container.networking.custom_domain;
        if !def.container.is_networked() || !custom.enabled {
            return None;
        }
        custom.domain.as_deref().filter(|d| !d.is_empty())
    }
}

#[async_trait::async_trait]
impl ResourceReconciler for CustomDomainReconciler {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Ingress
    }

    async fn create(&self, def: &Definition<'_>, name: &str, namespace: &str) -> Result<(), ReconcileError> {
        let Some(domain) = Self::domain(def) else {
            return Ok(());
        };
        info!("Creating custom domain Ingress {}/{} for {}", namespace, name, domain);
        let desired = render_custom_domain(def, domain);
        create_typed(self.cluster.as_ref(), ResourceKind::Ingress, namespace, &desired).await?;
        Ok(())
    }

    async fn update(&self, def: &Definition<'_>, name: &str, namespace: &str) -> Result<(), ReconcileError> {
        info!("Reconciling custom domain for {}/{}", namespace, name);
        match Self::domain(def) {
            Some(domain) => upsert(self.cluster.as_ref(), namespace, render_custom_domain(def, domain)).await,
            None => self.delete(name, namespace).await,
        }
    }

    async fn delete(&self, name: &str, namespace: &str) -> Result<(), ReconcileError> {
        remove(self.cluster.as_ref(), namespace, &names::custom_domain_ingress(name)).await
    }
}
