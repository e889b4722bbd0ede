//! Change detection
//!
//! Compares two snapshots of a container and reports which reconcilers have
//! something to do. Each category compares only the fields its reconciler
//! reads, so an autoscaling tweak never rolls the Deployment.

use platform_model::{ContainerSpec, ContainerType, DeploymentConfig, WorkloadConfig};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Unit of work in an update
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResourceCategory {
    Repo,
    Deployment,
    StatefulSet,
    CronJob,
    Pvc,
    Service,
    Hpa,
    Ingress,
    CustomDomain,
    TcpProxy,
}

impl ResourceCategory {
    pub const ALL: [ResourceCategory; 10] = [
        Self::Repo,
        Self::Deployment,
        Self::StatefulSet,
        Self::CronJob,
        Self::Pvc,
        Self::Service,
        Self::Hpa,
        Self::Ingress,
        Self::CustomDomain,
        Self::TcpProxy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Repo => "repo",
            Self::Deployment => "deployment",
            Self::StatefulSet => "statefulSet",
            Self::CronJob => "cronJob",
            Self::Pvc => "pvc",
            Self::Service => "service",
            Self::Hpa => "hpa",
            Self::Ingress => "ingress",
            Self::CustomDomain => "customDomain",
            Self::TcpProxy => "tcpProxy",
        }
    }

    /// Category of the primary workload for a container type
    pub fn workload(container_type: ContainerType) -> Self {
        match container_type {
            ContainerType::Deployment => Self::Deployment,
            ContainerType::StatefulSet => Self::StatefulSet,
            ContainerType::CronJob => Self::CronJob,
        }
    }
}

impl fmt::Display for ResourceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceCategory {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(value))
            .ok_or_else(|| format!("unknown resource category '{}'", value))
    }
}

/// Set of categories to reconcile
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeSet(BTreeSet<ResourceCategory>);

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every category that applies to `container`
    pub fn all_for(container: &ContainerSpec) -> Self {
        Self::collect(container, |view| view(container).is_some())
    }

    /// Categories whose inputs differ between `previous` and `next`
    ///
    /// No previous snapshot means no update is in progress and nothing is
    /// reported. A field absent from `previous` but present in `next`
    /// counts as a change.
    pub fn between(previous: Option<&ContainerSpec>, next: &ContainerSpec) -> Self {
        match previous {
            Some(previous) => Self::collect(next, |view| view(previous) != view(next)),
            None => Self::new(),
        }
    }

    fn collect(next: &ContainerSpec, differs: impl Fn(View) -> bool) -> Self {
        let mut changes = Self::new();
        if differs(repo_view) {
            changes.insert(ResourceCategory::Repo);
        }
        if differs(workload_view) {
            changes.insert(ResourceCategory::workload(next.container_type));
        }
        if differs(pvc_view) {
            changes.insert(ResourceCategory::Pvc);
        }
        if next.is_networked() {
            if differs(service_view) {
                changes.insert(ResourceCategory::Service);
            }
            if differs(ingress_view) {
                changes.insert(ResourceCategory::Ingress);
            }
            if differs(custom_domain_view) {
                changes.insert(ResourceCategory::CustomDomain);
            }
            if differs(tcp_proxy_view) {
                changes.insert(ResourceCategory::TcpProxy);
            }
        }
        if next.container_type == ContainerType::Deployment && differs(hpa_view) {
            changes.insert(ResourceCategory::Hpa);
        }
        changes
    }

    pub fn insert(&mut self, category: ResourceCategory) -> bool {
        self.0.insert(category)
    }

    pub fn contains(&self, category: ResourceCategory) -> bool {
        self.0.contains(&category)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = ResourceCategory> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<ResourceCategory> for ChangeSet {
    fn from_iter<I: IntoIterator<Item = ResourceCategory>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for ChangeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<_> = self.iter().map(|c| c.as_str()).collect();
        write!(f, "{{{}}}", names.join(", "))
    }
}

/// Projection of the fields one category reads; `None` when the category
/// has no inputs on this container
type View = fn(&ContainerSpec) -> Option<Value>;

fn to_json<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

fn repo_view(spec: &ContainerSpec) -> Option<Value> {
    match spec.repo() {
        Some(repo) => Some(to_json(&repo.without_webhook())),
        None => Some(Value::String("registry".to_string())),
    }
}

/// Deployment settings that the autoscaler owns are blanked
fn without_autoscaling(config: &DeploymentConfig) -> DeploymentConfig {
    DeploymentConfig {
        min_replicas: 0,
        max_replicas: 0,
        cpu_metric: Default::default(),
        memory_metric: Default::default(),
        ..config.clone()
    }
}

fn workload_view(spec: &ContainerSpec) -> Option<Value> {
    let workload = match &spec.workload {
        WorkloadConfig::Deployment(config) => to_json(&without_autoscaling(config)),
        WorkloadConfig::StatefulSet(config) => to_json(config),
        WorkloadConfig::CronJob(config) => to_json(config),
    };
    Some(json!({
        "podConfig": to_json(&spec.pod_config),
        "probes": to_json(&spec.probes),
        "variables": to_json(&spec.variables),
        "containerPort": spec.networking.container_port,
        "image": spec.source.registry_image(),
        "mountPath": spec.storage().map(|s| s.mount_path.as_str()),
        "workload": workload,
    }))
}

fn pvc_view(spec: &ContainerSpec) -> Option<Value> {
    spec.storage_config.as_ref().map(to_json)
}

fn service_view(spec: &ContainerSpec) -> Option<Value> {
    Some(json!(spec.networking.container_port))
}

fn hpa_view(spec: &ContainerSpec) -> Option<Value> {
    spec.deployment_config().map(|config| {
        json!({
            "minReplicas": config.min_replicas,
            "maxReplicas": config.max_replicas,
            "cpuMetric": to_json(&config.cpu_metric),
            "memoryMetric": to_json(&config.memory_metric),
        })
    })
}

fn ingress_view(spec: &ContainerSpec) -> Option<Value> {
    Some(json!([spec.networking.container_port, to_json(&spec.networking.ingress)]))
}

fn custom_domain_view(spec: &ContainerSpec) -> Option<Value> {
    Some(json!([spec.networking.container_port, to_json(&spec.networking.custom_domain)]))
}

fn tcp_proxy_view(spec: &ContainerSpec) -> Option<Value> {
    Some(json!([spec.networking.container_port, to_json(&spec.networking.tcp_proxy)]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use platform_model::{ContainerSource, IngressType, RegistryImage};

    #[test]
    fn test_identical_snapshots_have_no_changes() {
        let container = deployment_container("web");
        assert!(ChangeSet::between(Some(&container), &container).is_empty());
    }

    #[test]
    fn test_without_previous_nothing_is_reported() {
        assert!(ChangeSet::between(None, &deployment_container("web")).is_empty());
    }

    #[test]
    fn test_all_for_container_type() {
        let changes = ChangeSet::all_for(&deployment_container("web"));
        assert!(changes.contains(ResourceCategory::Deployment));
        assert!(changes.contains(ResourceCategory::Hpa));
        assert!(changes.contains(ResourceCategory::Service));
        assert!(!changes.contains(ResourceCategory::StatefulSet));
        assert!(!changes.contains(ResourceCategory::Pvc));

        let cron = ChangeSet::all_for(&cronjob_container("nightly"));
        assert!(cron.contains(ResourceCategory::CronJob));
        assert!(!cron.contains(ResourceCategory::Service));
        assert!(!cron.contains(ResourceCategory::Hpa));
    }

    #[test]
    fn test_metric_change_touches_only_hpa() {
        let previous = deployment_container("web");
        let mut next = previous.clone();
        if let WorkloadConfig::Deployment(config) = &mut next.workload {
            config.cpu_metric.enabled = true;
            config.cpu_metric.metric_value = 80.0;
            config.max_replicas = 8;
        }
        let changes = ChangeSet::between(Some(&previous), &next);
        assert_eq!(changes, [ResourceCategory::Hpa].into_iter().collect());
    }

    #[test]
    fn test_port_change_fans_out() {
        let previous = deployment_container("web");
        let mut next = previous.clone();
        next.networking.container_port = 9000;
        let changes = ChangeSet::between(Some(&previous), &next);
        for category in [
            ResourceCategory::Deployment,
            ResourceCategory::Service,
            ResourceCategory::Ingress,
            ResourceCategory::CustomDomain,
            ResourceCategory::TcpProxy,
        ] {
            assert!(changes.contains(category), "{} missing", category);
        }
        assert!(!changes.contains(ResourceCategory::Hpa));
        assert!(!changes.contains(ResourceCategory::Pvc));
    }

    #[test]
    fn test_webhook_id_is_ignored() {
        let previous = repo_container("web", true);
        let mut next = previous.clone();
        if let Some(repo) = next.source.repo_mut() {
            repo.webhook_id = Some("42".to_string());
        }
        assert!(ChangeSet::between(Some(&previous), &next).is_empty());

        if let Some(repo) = next.source.repo_mut() {
            repo.branch = "release".to_string();
        }
        let changes = ChangeSet::between(Some(&previous), &next);
        assert_eq!(changes, [ResourceCategory::Repo].into_iter().collect());
    }

    #[test]
    fn test_source_switch() {
        let previous = repo_container("web", true);
        let mut next = previous.clone();
        next.source = ContainerSource::Registry(RegistryImage {
            image: "nginx:1.27".to_string(),
        });
        let changes = ChangeSet::between(Some(&previous), &next);
        assert!(changes.contains(ResourceCategory::Repo));
        assert!(changes.contains(ResourceCategory::Deployment));
    }

    #[test]
    fn test_storage_added_touches_pvc_and_workload() {
        let previous = deployment_container("web");
        let mut next = previous.clone();
        next.storage_config = Some(test_storage(1.0));
        let changes = ChangeSet::between(Some(&previous), &next);
        assert!(changes.contains(ResourceCategory::Pvc));
        assert!(changes.contains(ResourceCategory::Deployment));
    }

    #[test]
    fn test_ingress_strategy_switch() {
        let previous = deployment_container("web");
        let mut next = previous.clone();
        next.networking.ingress.enabled = true;
        next.networking.ingress.ingress_type = IngressType::Subdomain;
        let changes = ChangeSet::between(Some(&previous), &next);
        assert_eq!(changes, [ResourceCategory::Ingress].into_iter().collect());
    }

    #[test]
    fn test_category_parsing() {
        assert_eq!("hpa".parse::<ResourceCategory>(), Ok(ResourceCategory::Hpa));
        assert_eq!("customDomain".parse::<ResourceCategory>(), Ok(ResourceCategory::CustomDomain));
        assert_eq!("tcpproxy".parse::<ResourceCategory>(), Ok(ResourceCategory::TcpProxy));
        assert!("everything".parse::<ResourceCategory>().is_err());
    }
}
