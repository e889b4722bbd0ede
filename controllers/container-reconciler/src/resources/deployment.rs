//! Deployment reconciler

use super::{adopt_metadata, ResourceReconciler};
use crate::cluster::{create_typed, delete_if_exists, get_typed, replace_typed, ClusterApi, ResourceKind};
use crate::error::ReconcileError;
use crate::manifest::pod::{live_image, merge_pod_template, pod_template, DataVolume};
use crate::manifest::{label_selector, names, Definition};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, DeploymentStrategy, RollingUpdateDeployment};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use platform_model::{DeploymentConfig, DeploymentStrategy as Strategy, SurgeType};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone)]
pub struct DeploymentReconciler {
    cluster: Arc<dyn ClusterApi>,
}

fn surge(value: u32, kind: SurgeType) -> IntOrString {
    match kind {
        SurgeType::Number => IntOrString::Int(i32::try_from(value).unwrap_or(i32::MAX)),
        SurgeType::Percentage => IntOrString::String(format!("{}%", value)),
    }
}

fn strategy(config: &DeploymentConfig) -> DeploymentStrategy {
    match config.strategy {
        Strategy::Recreate => DeploymentStrategy {
            type_: Some(Strategy::Recreate.as_str().to_string()),
            rolling_update: None,
        },
        Strategy::RollingUpdate => DeploymentStrategy {
            type_: Some(Strategy::RollingUpdate.as_str().to_string()),
            rolling_update: config.rolling_update.as_ref().map(|r| RollingUpdateDeployment {
                max_surge: Some(surge(r.max_surge, r.max_surge_type)),
                max_unavailable: Some(surge(r.max_unavailable, r.max_unavailable_type)),
            }),
        },
    }
}

/// Render the Deployment for a container
pub fn render(def: &Definition<'_>, name: &str, image: &str) -> Result<Deployment, ReconcileError> {
    let config = def.container.deployment_config().ok_or_else(|| {
        ReconcileError::Validation(format!("container {} has no deployment settings", def.iid()))
    })?;
    let data = if def.container.storage().is_some() {
        DataVolume::Claim(names::primary(def.iid()))
    } else {
        DataVolume::None
    };

    Ok(Deployment {
        metadata: def.metadata(name),
        spec: Some(DeploymentSpec {
            replicas: Some(config.desired_replicas),
            selector: label_selector(def.iid()),
            template: pod_template(def, image, &data)?,
            strategy: Some(strategy(config)),
            revision_history_limit: config.revision_history_limit,
            ..Default::default()
        }),
        status: None,
    })
}

/// Fold a rendered Deployment into the live one
///
/// The selector is immutable and kept. Replicas stay with the autoscaler
/// when one is active.
pub fn merge(live: Deployment, desired: Deployment, keep_image: bool, autoscaled: bool) -> Deployment {
    let mut spec = live.spec.unwrap_or_default();
    if let Some(desired_spec) = desired.spec {
        if !autoscaled {
            spec.replicas = desired_spec.replicas;
        }
        spec.strategy = desired_spec.strategy;
        spec.revision_history_limit = desired_spec.revision_history_limit;
        merge_pod_template(&mut spec.template, desired_spec.template, keep_image);
    }
    Deployment {
        metadata: adopt_metadata(live.metadata, desired.metadata),
        spec: Some(spec),
        status: None,
    }
}

impl DeploymentReconciler {
    pub fn new(cluster: Arc<dyn ClusterApi>) -> Self {
        Self { cluster }
    }
}

#[async_trait::async_trait]
impl ResourceReconciler for DeploymentReconciler {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Deployment
    }

    async fn create(&self, def: &Definition<'_>, name: &str, namespace: &str) -> Result<(), ReconcileError> {
        info!("Creating Deployment {}/{}", namespace, name);
        let deployment = render(def, name, &def.image()?)?;
        create_typed(self.cluster.as_ref(), ResourceKind::Deployment, namespace, &deployment).await?;
        Ok(())
    }

    async fn update(&self, def: &Definition<'_>, name: &str, namespace: &str) -> Result<(), ReconcileError> {
        info!("Reconciling Deployment {}/{}", namespace, name);
        let live: Option<Deployment> =
            get_typed(self.cluster.as_ref(), ResourceKind::Deployment, namespace, name).await?;
        let Some(live) = live else {
            info!("Deployment {}/{} is missing, recreating", namespace, name);
            return self.create(def, name, namespace).await;
        };

        let live_image = live_image(live.spec.as_ref().map(|s| &s.template));
        let image = match live_image {
            Some(image) if def.pipeline_owns_image() => image,
            _ => def.image()?,
        };
        let autoscaled = def
            .container
            .deployment_config()
            .is_some_and(DeploymentConfig::autoscaling_enabled);

        let desired = render(def, name, &image)?;
        let merged = merge(live, desired, def.pipeline_owns_image(), autoscaled);
        replace_typed(self.cluster.as_ref(), ResourceKind::Deployment, namespace, name, &merged).await?;
        Ok(())
    }

    async fn delete(&self, name: &str, namespace: &str) -> Result<(), ReconcileError> {
        if delete_if_exists(self.cluster.as_ref(), ResourceKind::Deployment, namespace, name).await? {
            info!("Deleted Deployment {}/{}", namespace, name);
        }
        Ok(())
    }
}
