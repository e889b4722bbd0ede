//! Resource reconcilers
//!
//! One reconciler per Kubernetes kind. Each renders its object from the
//! container definition and exposes create / update / delete. Updates are
//! read-modify-write against the live object so fields written by other
//! controllers survive; write conflicts are surfaced, not retried.

pub mod cronjob;
pub mod deployment;
pub mod hpa;
pub mod ingress;
pub mod pvc;
pub mod service;
pub mod statefulset;

#[cfg(test)]
mod hpa_test;
#[cfg(test)]
mod pvc_test;

use crate::cluster::{ClusterApi, ResourceKind};
use crate::error::ReconcileError;
use crate::manifest::Definition;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::sync::Arc;

pub use cronjob::CronJobReconciler;
pub use deployment::DeploymentReconciler;
pub use hpa::HpaReconciler;
pub use ingress::{CustomDomainReconciler, IngressReconciler};
pub use pvc::PvcReconciler;
pub use service::ServiceReconciler;
pub use statefulset::StatefulSetReconciler;

/// Create, update and delete one kind of object for a container
#[async_trait::async_trait]
pub trait ResourceReconciler: Send + Sync {
    /// Primary kind this reconciler writes
    fn kind(&self) -> ResourceKind;

    /// Write the object for a new container
    async fn create(&self, definition: &Definition<'_>, name: &str, namespace: &str) -> Result<(), ReconcileError>;

    /// Bring the live object in line with the definition
    async fn update(&self, definition: &Definition<'_>, name: &str, namespace: &str) -> Result<(), ReconcileError>;

    /// Deleting something already absent succeeds
    async fn delete(&self, name: &str, namespace: &str) -> Result<(), ReconcileError>;
}

/// All resource reconcilers sharing one cluster client
#[derive(Debug, Clone)]
pub struct ResourceReconcilers {
    /// Deployment workloads
    pub deployment: DeploymentReconciler,
    /// StatefulSet workloads
    pub statefulset: StatefulSetReconciler,
    /// CronJob workloads
    pub cronjob: CronJobReconciler,
    /// Primary and headless Services
    pub service: ServiceReconciler,
    /// HorizontalPodAutoscaler
    pub hpa: HpaReconciler,
    /// PersistentVolumeClaims, including StatefulSet claims
    pub pvc: PvcReconciler,
    /// Path or subdomain Ingress
    pub ingress: IngressReconciler,
    /// Custom domain Ingress
    pub custom_domain: CustomDomainReconciler,
}

impl ResourceReconcilers {
    /// Build every reconciler over one cluster client
    pub fn new(cluster: Arc<dyn ClusterApi>) -> Self {
        Self {
            deployment: DeploymentReconciler::new(cluster.clone()),
            statefulset: StatefulSetReconciler::new(cluster.clone()),
            cronjob: CronJobReconciler::new(cluster.clone()),
            service: ServiceReconciler::new(cluster.clone()),
            hpa: HpaReconciler::new(cluster.clone()),
            pvc: PvcReconciler::new(cluster.clone()),
            ingress: IngressReconciler::new(cluster.clone()),
            custom_domain: CustomDomainReconciler::new(cluster),
        }
    }
}

/// Keep the live identity (resourceVersion, uid, foreign labels and
/// annotations) on an object we are about to replace
pub(crate) fn adopt_metadata(live: ObjectMeta, desired: ObjectMeta) -> ObjectMeta {
    let mut merged = live;
    merged
        .labels
        .get_or_insert_with(Default::default)
        .extend(desired.labels.unwrap_or_default());
    if let Some(annotations) = desired.annotations {
        merged.annotations.get_or_insert_with(Default::default).extend(annotations);
    }
    merged.managed_fields = None;
    merged
}

/// Parse a storage quantity into mebibytes
///
/// Handles binary (`Ki`, `Mi`, `Gi`, `Ti`) and decimal (`k`, `M`, `G`, `T`)
/// suffixes and plain byte counts.
pub(crate) fn quantity_mebibytes(quantity: &str) -> Option<f64> {
    const MIB: f64 = 1024.0 * 1024.0;
    let quantity = quantity.trim();
    let split = quantity
        .find(|c: char| c.is_ascii_alphabetic())
        .unwrap_or(quantity.len());
    let (number, suffix) = quantity.split_at(split);
    let number: f64 = number.parse().ok()?;
    let bytes = match suffix {
        "" => 1.0,
        "Ki" => 1024.0,
        "Mi" => MIB,
        "Gi" => MIB * 1024.0,
        "Ti" => MIB * 1024.0 * 1024.0,
        "k" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        "T" => 1e12,
        _ => return None,
    };
    Some(number * bytes / MIB)
}
