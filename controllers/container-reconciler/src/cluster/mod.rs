//! Cluster access layer
//!
//! Every component talks to the cluster through `ClusterApi`, an object-safe
//! trait over JSON objects addressed by `ResourceKind`. The production
//! implementation wraps one long-lived `kube::Client`; tests use the
//! in-memory `MockCluster`.

pub mod kube_cluster;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

use crate::error::ClusterError;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use tracing::debug;

pub use kube_cluster::KubeCluster;
#[cfg(any(test, feature = "test-util"))]
pub use mock::{ClusterCall, MockCluster, Verb};

/// Every object kind the engine reads or writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Namespace,
    Deployment,
    StatefulSet,
    CronJob,
    Service,
    HorizontalPodAutoscaler,
    PersistentVolumeClaim,
    Ingress,
    ConfigMap,
    ServiceAccount,
    Secret,
    RoleBinding,
    ClusterRoleBinding,
    TriggerBinding,
    TriggerTemplate,
    EventListener,
    PipelineRun,
}

impl ResourceKind {
    /// API group ("" for core)
    pub fn group(self) -> &'static str {
        match self {
            ResourceKind::Namespace
            | ResourceKind::Service
            | ResourceKind::PersistentVolumeClaim
            | ResourceKind::ConfigMap
            | ResourceKind::ServiceAccount
            | ResourceKind::Secret => "",
            ResourceKind::Deployment | ResourceKind::StatefulSet => "apps",
            ResourceKind::CronJob => "batch",
            ResourceKind::HorizontalPodAutoscaler => "autoscaling",
            ResourceKind::Ingress => "networking.k8s.io",
            ResourceKind::RoleBinding | ResourceKind::ClusterRoleBinding => "rbac.authorization.k8s.io",
            ResourceKind::TriggerBinding | ResourceKind::TriggerTemplate | ResourceKind::EventListener => {
                "triggers.tekton.dev"
            }
            ResourceKind::PipelineRun => "tekton.dev",
        }
    }

    pub fn version(self) -> &'static str {
        match self {
            ResourceKind::HorizontalPodAutoscaler => "v2",
            ResourceKind::TriggerBinding | ResourceKind::TriggerTemplate | ResourceKind::EventListener => {
                "v1beta1"
            }
            _ => "v1",
        }
    }

    pub fn kind(self) -> &'static str {
        match self {
            ResourceKind::Namespace => "Namespace",
            ResourceKind::Deployment => "Deployment",
            ResourceKind::StatefulSet => "StatefulSet",
            ResourceKind::CronJob => "CronJob",
            ResourceKind::Service => "Service",
            ResourceKind::HorizontalPodAutoscaler => "HorizontalPodAutoscaler",
            ResourceKind::PersistentVolumeClaim => "PersistentVolumeClaim",
            ResourceKind::Ingress => "Ingress",
            ResourceKind::ConfigMap => "ConfigMap",
            ResourceKind::ServiceAccount => "ServiceAccount",
            ResourceKind::Secret => "Secret",
            ResourceKind::RoleBinding => "RoleBinding",
            ResourceKind::ClusterRoleBinding => "ClusterRoleBinding",
            ResourceKind::TriggerBinding => "TriggerBinding",
            ResourceKind::TriggerTemplate => "TriggerTemplate",
            ResourceKind::EventListener => "EventListener",
            ResourceKind::PipelineRun => "PipelineRun",
        }
    }

    /// Resource plural used in API paths
    pub fn plural(self) -> &'static str {
        match self {
            ResourceKind::Namespace => "namespaces",
            ResourceKind::Deployment => "deployments",
            ResourceKind::StatefulSet => "statefulsets",
            ResourceKind::CronJob => "cronjobs",
            ResourceKind::Service => "services",
            ResourceKind::HorizontalPodAutoscaler => "horizontalpodautoscalers",
            ResourceKind::PersistentVolumeClaim => "persistentvolumeclaims",
            ResourceKind::Ingress => "ingresses",
            ResourceKind::ConfigMap => "configmaps",
            ResourceKind::ServiceAccount => "serviceaccounts",
            ResourceKind::Secret => "secrets",
            ResourceKind::RoleBinding => "rolebindings",
            ResourceKind::ClusterRoleBinding => "clusterrolebindings",
            ResourceKind::TriggerBinding => "triggerbindings",
            ResourceKind::TriggerTemplate => "triggertemplates",
            ResourceKind::EventListener => "eventlisteners",
            ResourceKind::PipelineRun => "pipelineruns",
        }
    }

    pub fn namespaced(self) -> bool {
        !matches!(self, ResourceKind::Namespace | ResourceKind::ClusterRoleBinding)
    }

    /// `apiVersion` as written in manifests
    pub fn api_version(self) -> String {
        if self.group().is_empty() {
            self.version().to_string()
        } else {
            format!("{}/{}", self.group(), self.version())
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

/// Cluster operations used by the engine
///
/// `namespace` is ignored for cluster-scoped kinds. Objects are plain JSON
/// so the trait stays object safe; see the typed helpers below.
#[async_trait::async_trait]
pub trait ClusterApi: Send + Sync + fmt::Debug {
    /// Fetch an object, `None` when it does not exist
    async fn get(&self, kind: ResourceKind, namespace: &str, name: &str) -> Result<Option<Value>, ClusterError>;

    /// List objects, optionally filtered by an equality label selector
    async fn list(
        &self,
        kind: ResourceKind,
        namespace: &str,
        label_selector: Option<&str>,
    ) -> Result<Vec<Value>, ClusterError>;

    async fn create(&self, kind: ResourceKind, namespace: &str, object: &Value) -> Result<Value, ClusterError>;

    /// Full replace, guarded by the object's `resourceVersion` when present
    async fn replace(&self, kind: ResourceKind, namespace: &str, name: &str, object: &Value)
    -> Result<Value, ClusterError>;

    /// JSON merge patch
    async fn patch(&self, kind: ResourceKind, namespace: &str, name: &str, patch: &Value) -> Result<Value, ClusterError>;

    /// Delete an object, returns `false` when it was already gone
    async fn delete(&self, kind: ResourceKind, namespace: &str, name: &str) -> Result<bool, ClusterError>;
}

/// Serialize a typed manifest, stamping `apiVersion` and `kind`
pub fn manifest<T: Serialize>(kind: ResourceKind, object: &T) -> Result<Value, ClusterError> {
    let mut value = serde_json::to_value(object)?;
    if let Some(map) = value.as_object_mut() {
        map.insert("apiVersion".to_string(), Value::String(kind.api_version()));
        map.insert("kind".to_string(), Value::String(kind.kind().to_string()));
    }
    Ok(value)
}

/// Get and deserialize into a typed object
pub async fn get_typed<T: DeserializeOwned>(
    cluster: &dyn ClusterApi,
    kind: ResourceKind,
    namespace: &str,
    name: &str,
) -> Result<Option<T>, ClusterError> {
    match cluster.get(kind, namespace, name).await? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

/// Create from a typed manifest
pub async fn create_typed<T: Serialize>(
    cluster: &dyn ClusterApi,
    kind: ResourceKind,
    namespace: &str,
    object: &T,
) -> Result<Value, ClusterError> {
    cluster.create(kind, namespace, &manifest(kind, object)?).await
}

/// Replace with a typed manifest
pub async fn replace_typed<T: Serialize>(
    cluster: &dyn ClusterApi,
    kind: ResourceKind,
    namespace: &str,
    name: &str,
    object: &T,
) -> Result<Value, ClusterError> {
    cluster.replace(kind, namespace, name, &manifest(kind, object)?).await
}

/// Delete only when present
///
/// Reads first so that deleting something already gone issues no write.
pub async fn delete_if_exists(
    cluster: &dyn ClusterApi,
    kind: ResourceKind,
    namespace: &str,
    name: &str,
) -> Result<bool, ClusterError> {
    if cluster.get(kind, namespace, name).await?.is_none() {
        debug!("{} {}/{} already absent", kind, namespace, name);
        return Ok(false);
    }
    cluster.delete(kind, namespace, name).await
}

/// Create, or replace the existing object keeping its resourceVersion
pub async fn apply(
    cluster: &dyn ClusterApi,
    kind: ResourceKind,
    namespace: &str,
    name: &str,
    mut object: Value,
) -> Result<Value, ClusterError> {
    match cluster.get(kind, namespace, name).await? {
        None => cluster.create(kind, namespace, &object).await,
        Some(live) => {
            if let (Some(version), Some(metadata)) = (
                live.pointer("/metadata/resourceVersion").cloned(),
                object.get_mut("metadata").and_then(Value::as_object_mut),
            ) {
                metadata.insert("resourceVersion".to_string(), version);
            }
            cluster.replace(kind, namespace, name, &object).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_versions() {
        assert_eq!(ResourceKind::Service.api_version(), "v1");
        assert_eq!(ResourceKind::HorizontalPodAutoscaler.api_version(), "autoscaling/v2");
        assert_eq!(ResourceKind::EventListener.api_version(), "triggers.tekton.dev/v1beta1");
        assert_eq!(ResourceKind::PipelineRun.api_version(), "tekton.dev/v1");
        assert!(!ResourceKind::ClusterRoleBinding.namespaced());
    }
}
