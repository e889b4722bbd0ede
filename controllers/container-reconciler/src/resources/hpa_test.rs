//! Unit tests for the HorizontalPodAutoscaler reconciler

#[cfg(test)]
mod tests {
    use crate::cluster::{ClusterApi, MockCluster, ResourceKind};
    use crate::manifest::Definition;
    use crate::resources::{HpaReconciler, ResourceReconciler};
    use crate::test_utils::*;
    use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
    use platform_model::{ContainerSpec, CpuMetricType, MemoryMetricType, WorkloadConfig};
    use std::sync::Arc;

    fn reconciler(cluster: &MockCluster) -> HpaReconciler {
        let shared: Arc<dyn ClusterApi> = Arc::new(cluster.clone());
        HpaReconciler::new(shared)
    }

    fn stored(cluster: &MockCluster, name: &str) -> Option<HorizontalPodAutoscaler> {
        cluster
            .object(ResourceKind::HorizontalPodAutoscaler, TEST_NAMESPACE, name)
            .map(|value| serde_json::from_value(value).unwrap())
    }

    fn with_cpu(enabled: bool) -> ContainerSpec {
        let mut container = deployment_container("web");
        if let WorkloadConfig::Deployment(config) = &mut container.workload {
            config.cpu_metric.enabled = enabled;
            config.cpu_metric.metric_type = CpuMetricType::AverageUtilization;
            config.cpu_metric.metric_value = 70.0;
        }
        container
    }

    #[tokio::test]
    async fn test_no_metrics_no_autoscaler() {
        let cluster = MockCluster::new();
        let container = with_cpu(false);
        let environment = test_environment();
        let config = test_config();
        let def = Definition::new(&container, &environment, None, &config);

        reconciler(&cluster).create(&def, "web", TEST_NAMESPACE).await.unwrap();

        assert!(stored(&cluster, "web").is_none());
        assert!(cluster.calls().is_empty());
    }

    #[tokio::test]
    async fn test_cpu_and_memory_metrics() {
        let cluster = MockCluster::new();
        let mut container = with_cpu(true);
        if let WorkloadConfig::Deployment(config) = &mut container.workload {
            config.memory_metric.enabled = true;
            config.memory_metric.metric_type = MemoryMetricType::AverageValueMebibyte;
            config.memory_metric.metric_value = 512.0;
        }
        let environment = test_environment();
        let config = test_config();
        let def = Definition::new(&container, &environment, None, &config);

        reconciler(&cluster).create(&def, "web", TEST_NAMESPACE).await.unwrap();

        let spec = stored(&cluster, "web").unwrap().spec.unwrap();
        assert_eq!(spec.scale_target_ref.kind, "Deployment");
        assert_eq!(spec.scale_target_ref.name, "web");
        assert_eq!(spec.min_replicas, Some(2));
        assert_eq!(spec.max_replicas, 5);
        let metrics = spec.metrics.unwrap();
        let cpu = metrics[0].resource.as_ref().unwrap();
        assert_eq!(cpu.name, "cpu");
        assert_eq!(cpu.target.type_, "Utilization");
        assert_eq!(cpu.target.average_utilization, Some(70));
        let memory = metrics[1].resource.as_ref().unwrap();
        assert_eq!(memory.target.type_, "AverageValue");
        assert_eq!(memory.target.average_value.as_ref().unwrap().0, "512Mi");
    }

    #[tokio::test]
    async fn test_disable_then_enable_metric() {
        let cluster = MockCluster::new();
        let environment = test_environment();
        let config = test_config();
        let autoscalers = reconciler(&cluster);
        let enabled = with_cpu(true);
        autoscalers
            .create(&Definition::new(&enabled, &environment, None, &config), "web", TEST_NAMESPACE)
            .await
            .unwrap();

        let disabled = with_cpu(false);
        autoscalers
            .update(&Definition::new(&disabled, &environment, None, &config), "web", TEST_NAMESPACE)
            .await
            .unwrap();
        assert!(stored(&cluster, "web").is_none());

        autoscalers
            .update(&Definition::new(&enabled, &environment, None, &config), "web", TEST_NAMESPACE)
            .await
            .unwrap();
        let spec = stored(&cluster, "web").unwrap().spec.unwrap();
        assert_eq!(spec.min_replicas, Some(2));
        assert_eq!(spec.max_replicas, 5);
    }
}
