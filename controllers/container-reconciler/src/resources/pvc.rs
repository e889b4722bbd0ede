//! PersistentVolumeClaim reconciler
//!
//! Deployments and CronJobs mount a single claim named after the container.
//! StatefulSet claims are created by the StatefulSet controller from the
//! `data` template; here they are only expanded, pruned on scale-down and
//! removed on delete, each gated by the container's retention policy.

use super::{quantity_mebibytes, ResourceReconciler};
use crate::cluster::{create_typed, delete_if_exists, get_typed, ClusterApi, ResourceKind};
use crate::error::ReconcileError;
use crate::manifest::{names, selector_string, Definition};
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, PersistentVolumeClaimSpec, VolumeResourceRequirements};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use platform_model::{memory_mebibytes, memory_quantity, ContainerType, RetentionPolicy, StorageConfig};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct PvcReconciler {
    cluster: Arc<dyn ClusterApi>,
}

/// Claim spec shared by standalone claims and StatefulSet templates
pub fn claim_spec(storage: &StorageConfig) -> Result<PersistentVolumeClaimSpec, ReconcileError> {
    Ok(PersistentVolumeClaimSpec {
        access_modes: Some(storage.access_modes.iter().map(|m| m.as_str().to_string()).collect()),
        resources: Some(VolumeResourceRequirements {
            requests: Some(BTreeMap::from([(
                "storage".to_string(),
                Quantity(memory_quantity("storageConfig.size", storage.size, storage.size_type)?),
            )])),
            ..Default::default()
        }),
        storage_class_name: storage.storage_class.clone(),
        ..Default::default()
    })
}

pub fn render(def: &Definition<'_>, name: &str, storage: &StorageConfig) -> Result<PersistentVolumeClaim, ReconcileError> {
    Ok(PersistentVolumeClaim {
        metadata: def.metadata(name),
        spec: Some(claim_spec(storage)?),
        status: None,
    })
}

/// Requested storage of a live claim in mebibytes
fn live_size(claim: &PersistentVolumeClaim) -> Option<f64> {
    claim
        .spec
        .as_ref()?
        .resources
        .as_ref()?
        .requests
        .as_ref()?
        .get("storage")
        .and_then(|q| quantity_mebibytes(&q.0))
}

fn live_access_modes(claim: &PersistentVolumeClaim) -> Vec<String> {
    claim
        .spec
        .as_ref()
        .and_then(|s| s.access_modes.clone())
        .unwrap_or_default()
}

fn claim_name(claim: &PersistentVolumeClaim) -> String {
    claim.metadata.name.clone().unwrap_or_default()
}

impl PvcReconciler {
    pub fn new(cluster: Arc<dyn ClusterApi>) -> Self {
        Self { cluster }
    }

    /// Grow a live claim to the desired size; shrinking and access-mode
    /// changes are rejected.
    async fn resize(
        &self,
        claim: &PersistentVolumeClaim,
        storage: &StorageConfig,
        namespace: &str,
    ) -> Result<(), ReconcileError> {
        let name = claim_name(claim);
        let desired_modes: Vec<String> = storage.access_modes.iter().map(|m| m.as_str().to_string()).collect();
        if live_access_modes(claim) != desired_modes {
            return Err(ReconcileError::Validation(format!(
                "access modes of PersistentVolumeClaim {}/{} cannot change",
                namespace, name
            )));
        }

        let desired = memory_mebibytes(storage.size, storage.size_type);
        let current = live_size(claim).unwrap_or(0.0);
        if desired < current {
            return Err(ReconcileError::Validation(format!(
                "PersistentVolumeClaim {}/{} cannot shrink from {}Mi to {}Mi",
                namespace, name, current, desired
            )));
        }
        if desired > current {
            let quantity = memory_quantity("storageConfig.size", storage.size, storage.size_type)?;
            info!("Expanding PersistentVolumeClaim {}/{} to {}", namespace, name, quantity);
            let patch = json!({"spec": {"resources": {"requests": {"storage": quantity}}}});
            self.cluster
                .patch(ResourceKind::PersistentVolumeClaim, namespace, &name, &patch)
                .await?;
        } else {
            debug!("PersistentVolumeClaim {}/{} already at desired size", namespace, name);
        }
        Ok(())
    }

    /// Claims created from the StatefulSet template, with their ordinals
    pub async fn stateful_claims(
        &self,
        iid: &str,
        namespace: &str,
    ) -> Result<Vec<(i32, PersistentVolumeClaim)>, ReconcileError> {
        let listed = self
            .cluster
            .list(ResourceKind::PersistentVolumeClaim, namespace, Some(&selector_string(iid)))
            .await?;
        let mut claims = Vec::new();
        for value in listed {
            let claim: PersistentVolumeClaim = serde_json::from_value(value)?;
            if let Some(ordinal) = names::stateful_claim_ordinal(iid, &claim_name(&claim)) {
                claims.push((ordinal, claim));
            }
        }
        claims.sort_by_key(|(ordinal, _)| *ordinal);
        Ok(claims)
    }

    /// After a scale-down, drop claims above the new replica count when the
    /// "when scaled" policy is Delete
    pub async fn prune_scaled_claims(&self, def: &Definition<'_>, namespace: &str) -> Result<(), ReconcileError> {
        let Some(config) = def.container.stateful_set_config() else {
            return Ok(());
        };
        let policy = config.persistent_volume_claim_retention_policy.when_scaled;
        for (ordinal, claim) in self.stateful_claims(def.iid(), namespace).await? {
            if ordinal < config.desired_replicas {
                continue;
            }
            let name = claim_name(&claim);
            match policy {
                RetentionPolicy::Delete => {
                    info!("Deleting scaled-down PersistentVolumeClaim {}/{}", namespace, name);
                    delete_if_exists(self.cluster.as_ref(), ResourceKind::PersistentVolumeClaim, namespace, &name)
                        .await?;
                }
                RetentionPolicy::Retain => {
                    debug!("Retaining scaled-down PersistentVolumeClaim {}/{}", namespace, name);
                }
            }
        }
        Ok(())
    }

    /// Remove a container's claims on container deletion
    pub async fn delete_for(&self, def: &Definition<'_>, namespace: &str) -> Result<(), ReconcileError> {
        match def.container.stateful_set_config() {
            Some(config) => match config.persistent_volume_claim_retention_policy.when_deleted {
                RetentionPolicy::Delete => {
                    for (_, claim) in self.stateful_claims(def.iid(), namespace).await? {
                        self.delete(&claim_name(&claim), namespace).await?;
                    }
                    Ok(())
                }
                RetentionPolicy::Retain => {
                    info!("Retaining PersistentVolumeClaims of StatefulSet {}/{}", namespace, def.iid());
                    Ok(())
                }
            },
            None => self.delete(&names::primary(def.iid()), namespace).await,
        }
    }
}

#[async_trait::async_trait]
impl ResourceReconciler for PvcReconciler {
    fn kind(&self) -> ResourceKind {
        ResourceKind::PersistentVolumeClaim
    }

    async fn create(&self, def: &Definition<'_>, name: &str, namespace: &str) -> Result<(), ReconcileError> {
        if def.container.container_type == ContainerType::StatefulSet {
            return Ok(());
        }
        let Some(storage) = def.container.storage() else {
            return Ok(());
        };
        info!("Creating PersistentVolumeClaim {}/{}", namespace, name);
        let claim = render(def, name, storage)?;
        create_typed(self.cluster.as_ref(), ResourceKind::PersistentVolumeClaim, namespace, &claim).await?;
        Ok(())
    }

    async fn update(&self, def: &Definition<'_>, name: &str, namespace: &str) -> Result<(), ReconcileError> {
        info!("Reconciling PersistentVolumeClaim {}/{}", namespace, name);
        let storage = def.container.storage();

        if def.container.container_type == ContainerType::StatefulSet {
            let Some(storage) = storage else {
                return Ok(());
            };
            for (_, claim) in self.stateful_claims(def.iid(), namespace).await? {
                self.resize(&claim, storage, namespace).await?;
            }
            return Ok(());
        }

        let live: Option<PersistentVolumeClaim> =
            get_typed(self.cluster.as_ref(), ResourceKind::PersistentVolumeClaim, namespace, name).await?;
        match (live, storage) {
            (None, Some(_)) => self.create(def, name, namespace).await,
            (Some(_), None) => self.delete(name, namespace).await,
            (Some(claim), Some(storage)) => self.resize(&claim, storage, namespace).await,
            (None, None) => Ok(()),
        }
    }

    async fn delete(&self, name: &str, namespace: &str) -> Result<(), ReconcileError> {
        if delete_if_exists(self.cluster.as_ref(), ResourceKind::PersistentVolumeClaim, namespace, name).await? {
            info!("Deleted PersistentVolumeClaim {}/{}", namespace, name);
        }
        Ok(())
    }
}
