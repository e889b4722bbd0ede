//! StatefulSet reconciler
//!
//! Claim templates, selector, service name and pod management policy are
//! immutable once the set exists. Storage growth is applied to the claims by
//! the PVC reconciler.

use super::pvc::claim_spec;
use super::{adopt_metadata, ResourceReconciler};
use crate::cluster::{create_typed, delete_if_exists, get_typed, replace_typed, ClusterApi, ResourceKind};
use crate::error::ReconcileError;
use crate::manifest::pod::{live_image, merge_pod_template, pod_template, DataVolume};
use crate::manifest::{label_selector, names, Definition};
use k8s_openapi::api::apps::v1::{
    RollingUpdateStatefulSetStrategy, StatefulSet, StatefulSetPersistentVolumeClaimRetentionPolicy, StatefulSetSpec,
    StatefulSetUpdateStrategy,
};
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use platform_model::{StatefulSetConfig, StatefulSetStrategy};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct StatefulSetReconciler {
    cluster: Arc<dyn ClusterApi>,
}

fn update_strategy(config: &StatefulSetConfig) -> StatefulSetUpdateStrategy {
    StatefulSetUpdateStrategy {
        type_: Some(config.strategy.as_str().to_string()),
        rolling_update: match config.strategy {
            StatefulSetStrategy::RollingUpdate => config.rolling_update_partition.map(|partition| {
                RollingUpdateStatefulSetStrategy {
                    partition: Some(partition),
                    ..Default::default()
                }
            }),
            StatefulSetStrategy::OnDelete => None,
        },
    }
}

/// Render the StatefulSet for a container
pub fn render(def: &Definition<'_>, name: &str, image: &str) -> Result<StatefulSet, ReconcileError> {
    let config = def.container.stateful_set_config().ok_or_else(|| {
        ReconcileError::Validation(format!("container {} has no statefulset settings", def.iid()))
    })?;
    let storage = def.container.storage();
    let data = if storage.is_some() {
        DataVolume::Template
    } else {
        DataVolume::None
    };
    let claim_templates = match storage {
        Some(storage) => Some(vec![PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some(names::CLAIM_TEMPLATE.to_string()),
                labels: Some(def.labels()),
                ..Default::default()
            },
            spec: Some(claim_spec(storage)?),
            status: None,
        }]),
        None => None,
    };
    let retention = &config.persistent_volume_claim_retention_policy;

    Ok(StatefulSet {
        metadata: def.metadata(name),
        spec: Some(StatefulSetSpec {
            replicas: Some(config.desired_replicas),
            selector: label_selector(def.iid()),
            service_name: names::headless_service(def.iid()).into(),
            template: pod_template(def, image, &data)?,
            volume_claim_templates: claim_templates,
            update_strategy: Some(update_strategy(config)),
            pod_management_policy: Some(config.pod_management_policy.as_str().to_string()),
            revision_history_limit: config.revision_history_limit,
            persistent_volume_claim_retention_policy: Some(StatefulSetPersistentVolumeClaimRetentionPolicy {
                when_deleted: Some(retention.when_deleted.as_str().to_string()),
                when_scaled: Some(retention.when_scaled.as_str().to_string()),
            }),
            ..Default::default()
        }),
        status: None,
    })
}

/// Fold a rendered StatefulSet into the live one, keeping immutable fields
pub fn merge(live: StatefulSet, desired: StatefulSet, keep_image: bool) -> StatefulSet {
    let mut spec = live.spec.unwrap_or_default();
    if let Some(desired_spec) = desired.spec {
        spec.replicas = desired_spec.replicas;
        spec.update_strategy = desired_spec.update_strategy;
        spec.revision_history_limit = desired_spec.revision_history_limit;
        spec.persistent_volume_claim_retention_policy = desired_spec.persistent_volume_claim_retention_policy;
        merge_pod_template(&mut spec.template, desired_spec.template, keep_image);
    }
    StatefulSet {
        metadata: adopt_metadata(live.metadata, desired.metadata),
        spec: Some(spec),
        status: None,
    }
}

impl StatefulSetReconciler {
    pub fn new(cluster: Arc<dyn ClusterApi>) -> Self {
        Self { cluster }
    }
}

#[async_trait::async_trait]
impl ResourceReconciler for StatefulSetReconciler {
    fn kind(&self) -> ResourceKind {
        ResourceKind::StatefulSet
    }

    async fn create(&self, def: &Definition<'_>, name: &str, namespace: &str) -> Result<(), ReconcileError> {
        info!("Creating StatefulSet {}/{}", namespace, name);
        let statefulset = render(def, name, &def.image()?)?;
        create_typed(self.cluster.as_ref(), ResourceKind::StatefulSet, namespace, &statefulset).await?;
        Ok(())
    }

    async fn update(&self, def: &Definition<'_>, name: &str, namespace: &str) -> Result<(), ReconcileError> {
        info!("Reconciling StatefulSet {}/{}", namespace, name);
        let live: Option<StatefulSet> =
            get_typed(self.cluster.as_ref(), ResourceKind::StatefulSet, namespace, name).await?;
        let Some(live) = live else {
            info!("StatefulSet {}/{} is missing, recreating", namespace, name);
            return self.create(def, name, namespace).await;
        };

        let live_spec = live.spec.as_ref();
        let has_templates = live_spec
            .and_then(|s| s.volume_claim_templates.as_ref())
            .is_some_and(|t| !t.is_empty());
        if has_templates != def.container.storage().is_some() {
            return Err(ReconcileError::Validation(format!(
                "storage cannot be enabled or disabled on existing StatefulSet {}/{}",
                namespace, name
            )));
        }

        let desired_policy = def
            .container
            .stateful_set_config()
            .map(|c| c.pod_management_policy.as_str());
        let live_policy = live_spec.and_then(|s| s.pod_management_policy.as_deref());
        if live_policy.is_some() && live_policy != desired_policy {
            warn!(
                "StatefulSet {}/{} keeps pod management policy {:?}; it cannot change after creation",
                namespace, name, live_policy
            );
        }

        let image = match live_image(live_spec.map(|s| &s.template)) {
            Some(image) if def.pipeline_owns_image() => image,
            _ => def.image()?,
        };
        let desired = render(def, name, &image)?;
        let merged = merge(live, desired, def.pipeline_owns_image());
        replace_typed(self.cluster.as_ref(), ResourceKind::StatefulSet, namespace, name, &merged).await?;
        Ok(())
    }

    async fn delete(&self, name: &str, namespace: &str) -> Result<(), ReconcileError> {
        if delete_if_exists(self.cluster.as_ref(), ResourceKind::StatefulSet, namespace, name).await? {
            info!("Deleted StatefulSet {}/{}", namespace, name);
        }
        Ok(())
    }
}
