//! HorizontalPodAutoscaler reconciler
//!
//! An autoscaler exists iff the Deployment has a CPU or memory metric
//! enabled. `update` derives create / replace / delete from the live
//! cluster, so toggling metrics on and off needs no stored state.

use super::{adopt_metadata, ResourceReconciler};
use crate::cluster::{create_typed, delete_if_exists, get_typed, replace_typed, ClusterApi, ResourceKind};
use crate::error::ReconcileError;
use crate::manifest::{names, Definition};
use k8s_openapi::api::autoscaling::v2::{
    CrossVersionObjectReference, HorizontalPodAutoscaler, HorizontalPodAutoscalerSpec, MetricSpec, MetricTarget,
    ResourceMetricSource,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use platform_model::{
    cpu_quantity, memory_quantity, CpuMetricType, CpuUnit, DeploymentConfig, MemoryMetricType, MemoryUnit,
};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone)]
pub struct HpaReconciler {
    cluster: Arc<dyn ClusterApi>,
}

fn resource_metric(resource: &str, target: MetricTarget) -> MetricSpec {
    MetricSpec {
        type_: "Resource".to_string(),
        resource: Some(ResourceMetricSource {
            name: resource.to_string(),
            target,
        }),
        ..Default::default()
    }
}

fn average_value(quantity: String) -> MetricTarget {
    MetricTarget {
        type_: "AverageValue".to_string(),
        average_value: Some(Quantity(quantity)),
        ..Default::default()
    }
}

/// Metric list for the enabled CPU and memory targets
pub fn metrics(config: &DeploymentConfig) -> Result<Vec<MetricSpec>, ReconcileError> {
    let mut metrics = Vec::new();
    let cpu = &config.cpu_metric;
    if cpu.enabled {
        let target = match cpu.metric_type {
            CpuMetricType::AverageUtilization => MetricTarget {
                type_: "Utilization".to_string(),
                average_utilization: Some(cpu.metric_value.round() as i32),
                ..Default::default()
            },
            CpuMetricType::AverageValueMillicores => average_value(cpu_quantity(
                "deploymentConfig.cpuMetric",
                cpu.metric_value,
                CpuUnit::Millicores,
            )?),
            CpuMetricType::AverageValueCores => average_value(cpu_quantity(
                "deploymentConfig.cpuMetric",
                cpu.metric_value,
                CpuUnit::Cores,
            )?),
        };
        metrics.push(resource_metric("cpu", target));
    }
    let memory = &config.memory_metric;
    if memory.enabled {
        let unit = match memory.metric_type {
            MemoryMetricType::AverageValueMebibyte => MemoryUnit::Mebibyte,
            MemoryMetricType::AverageValueGibibyte => MemoryUnit::Gibibyte,
        };
        metrics.push(resource_metric(
            "memory",
            average_value(memory_quantity("deploymentConfig.memoryMetric", memory.metric_value, unit)?),
        ));
    }
    Ok(metrics)
}

/// Render the autoscaler; `None` when no metric is enabled
pub fn render(def: &Definition<'_>, name: &str) -> Result<Option<HorizontalPodAutoscaler>, ReconcileError> {
    let Some(config) = def.container.deployment_config().filter(|c| c.autoscaling_enabled()) else {
        return Ok(None);
    };
    Ok(Some(HorizontalPodAutoscaler {
        metadata: def.metadata(name),
        spec: Some(HorizontalPodAutoscalerSpec {
            scale_target_ref: CrossVersionObjectReference {
                api_version: Some(ResourceKind::Deployment.api_version()),
                kind: ResourceKind::Deployment.kind().to_string(),
                name: names::primary(def.iid()),
            },
            min_replicas: Some(config.min_replicas),
            max_replicas: config.max_replicas,
            metrics: Some(metrics(config)?),
            behavior: None,
        }),
        status: None,
    }))
}

impl HpaReconciler {
    pub fn new(cluster: Arc<dyn ClusterApi>) -> Self {
        Self { cluster }
    }
}

#[async_trait::async_trait]
impl ResourceReconciler for HpaReconciler {
    fn kind(&self) -> ResourceKind {
        ResourceKind::HorizontalPodAutoscaler
    }

    async fn create(&self, def: &Definition<'_>, name: &str, namespace: &str) -> Result<(), ReconcileError> {
        let Some(hpa) = render(def, name)? else {
            return Ok(());
        };
        info!("Creating HorizontalPodAutoscaler {}/{}", namespace, name);
        create_typed(self.cluster.as_ref(), ResourceKind::HorizontalPodAutoscaler, namespace, &hpa).await?;
        Ok(())
    }

    async fn update(&self, def: &Definition<'_>, name: &str, namespace: &str) -> Result<(), ReconcileError> {
        info!("Reconciling HorizontalPodAutoscaler {}/{}", namespace, name);
        let live: Option<HorizontalPodAutoscaler> =
            get_typed(self.cluster.as_ref(), ResourceKind::HorizontalPodAutoscaler, namespace, name).await?;

        match (live, render(def, name)?) {
            (Some(_), None) => self.delete(name, namespace).await,
            (None, Some(_)) => self.create(def, name, namespace).await,
            (Some(live), Some(desired)) => {
                let merged = HorizontalPodAutoscaler {
                    metadata: adopt_metadata(live.metadata, desired.metadata),
                    spec: desired.spec,
                    status: None,
                };
                replace_typed(
                    self.cluster.as_ref(),
                    ResourceKind::HorizontalPodAutoscaler,
                    namespace,
                    name,
                    &merged,
                )
                .await?;
                Ok(())
            }
            (None, None) => Ok(()),
        }
    }

    async fn delete(&self, name: &str, namespace: &str) -> Result<(), ReconcileError> {
        if delete_if_exists(self.cluster.as_ref(), ResourceKind::HorizontalPodAutoscaler, namespace, name).await? {
            info!("Deleted HorizontalPodAutoscaler {}/{}", namespace, name);
        }
        Ok(())
    }
}
