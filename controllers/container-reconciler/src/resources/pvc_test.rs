//! Unit tests for the PersistentVolumeClaim reconciler

#[cfg(test)]
mod tests {
    use crate::cluster::{ClusterApi, MockCluster, ResourceKind, Verb};
    use crate::error::ReconcileError;
    use crate::manifest::Definition;
    use crate::resources::{PvcReconciler, ResourceReconciler};
    use crate::test_utils::*;
    use platform_model::{AccessMode, ContainerSpec, RetentionPolicy, WorkloadConfig};
    use serde_json::json;
    use std::sync::Arc;

    fn reconciler(cluster: &MockCluster) -> PvcReconciler {
        let shared: Arc<dyn ClusterApi> = Arc::new(cluster.clone());
        PvcReconciler::new(shared)
    }

    fn requested(cluster: &MockCluster, name: &str) -> String {
        let claim = cluster
            .object(ResourceKind::PersistentVolumeClaim, TEST_NAMESPACE, name)
            .unwrap();
        claim["spec"]["resources"]["requests"]["storage"].as_str().unwrap().to_string()
    }

    /// Claim as the StatefulSet controller would create it
    fn seed_stateful_claim(cluster: &MockCluster, iid: &str, ordinal: i32) {
        cluster.insert(
            ResourceKind::PersistentVolumeClaim,
            TEST_NAMESPACE,
            json!({
                "metadata": {
                    "name": format!("data-{}-{}", iid, ordinal),
                    "labels": {"app": iid},
                },
                "spec": {
                    "accessModes": ["ReadWriteOnce"],
                    "resources": {"requests": {"storage": "1Gi"}},
                },
            }),
        );
    }

    fn with_retention(mut container: ContainerSpec, when_deleted: RetentionPolicy, when_scaled: RetentionPolicy) -> ContainerSpec {
        if let WorkloadConfig::StatefulSet(config) = &mut container.workload {
            config.persistent_volume_claim_retention_policy.when_deleted = when_deleted;
            config.persistent_volume_claim_retention_policy.when_scaled = when_scaled;
        }
        container
    }

    #[tokio::test]
    async fn test_deployment_claim_grows() {
        let cluster = MockCluster::new();
        let mut container = deployment_container("web");
        container.storage_config = Some(test_storage(1.0));
        let environment = test_environment();
        let config = test_config();
        let claims = reconciler(&cluster);
        claims
            .create(&Definition::new(&container, &environment, None, &config), "web", TEST_NAMESPACE)
            .await
            .unwrap();
        assert_eq!(requested(&cluster, "web"), "1Gi");

        container.storage_config = Some(test_storage(2.0));
        claims
            .update(&Definition::new(&container, &environment, None, &config), "web", TEST_NAMESPACE)
            .await
            .unwrap();

        assert_eq!(requested(&cluster, "web"), "2Gi");
    }

    #[tokio::test]
    async fn test_shrink_is_rejected() {
        let cluster = MockCluster::new();
        let mut container = deployment_container("web");
        container.storage_config = Some(test_storage(2.0));
        let environment = test_environment();
        let config = test_config();
        let claims = reconciler(&cluster);
        claims
            .create(&Definition::new(&container, &environment, None, &config), "web", TEST_NAMESPACE)
            .await
            .unwrap();

        container.storage_config = Some(test_storage(1.0));
        let result = claims
            .update(&Definition::new(&container, &environment, None, &config), "web", TEST_NAMESPACE)
            .await;

        assert!(matches!(result, Err(ReconcileError::Validation(_))));
        assert_eq!(requested(&cluster, "web"), "2Gi");
    }

    #[tokio::test]
    async fn test_access_mode_change_is_rejected() {
        let cluster = MockCluster::new();
        let mut container = deployment_container("web");
        container.storage_config = Some(test_storage(1.0));
        let environment = test_environment();
        let config = test_config();
        let claims = reconciler(&cluster);
        claims
            .create(&Definition::new(&container, &environment, None, &config), "web", TEST_NAMESPACE)
            .await
            .unwrap();

        let mut storage = test_storage(1.0);
        storage.access_modes = vec![AccessMode::ReadWriteMany];
        container.storage_config = Some(storage);
        let result = claims
            .update(&Definition::new(&container, &environment, None, &config), "web", TEST_NAMESPACE)
            .await;

        assert!(matches!(result, Err(ReconcileError::Validation(_))));
    }

    #[tokio::test]
    async fn test_statefulset_create_leaves_claims_to_controller() {
        let cluster = MockCluster::new();
        let container = statefulset_container("db", 2);
        let environment = test_environment();
        let config = test_config();

        reconciler(&cluster)
            .create(&Definition::new(&container, &environment, None, &config), "db", TEST_NAMESPACE)
            .await
            .unwrap();

        assert!(cluster.calls().is_empty());
    }

    #[tokio::test]
    async fn test_statefulset_expands_every_claim() {
        let cluster = MockCluster::new();
        seed_stateful_claim(&cluster, "db", 0);
        seed_stateful_claim(&cluster, "db", 1);
        let mut container = statefulset_container("db", 2);
        container.storage_config = Some(test_storage(5.0));
        let environment = test_environment();
        let config = test_config();

        reconciler(&cluster)
            .update(&Definition::new(&container, &environment, None, &config), "db", TEST_NAMESPACE)
            .await
            .unwrap();

        assert_eq!(requested(&cluster, "data-db-0"), "5Gi");
        assert_eq!(requested(&cluster, "data-db-1"), "5Gi");
        let patches = cluster.calls().into_iter().filter(|c| c.verb == Verb::Patch).count();
        assert_eq!(patches, 2);
    }

    #[tokio::test]
    async fn test_scale_down_prunes_only_with_delete_policy() {
        let cluster = MockCluster::new();
        for ordinal in 0..3 {
            seed_stateful_claim(&cluster, "db", ordinal);
        }
        let environment = test_environment();
        let config = test_config();
        let claims = reconciler(&cluster);

        let retained = with_retention(statefulset_container("db", 1), RetentionPolicy::Retain, RetentionPolicy::Retain);
        claims
            .prune_scaled_claims(&Definition::new(&retained, &environment, None, &config), TEST_NAMESPACE)
            .await
            .unwrap();
        assert_eq!(cluster.names(ResourceKind::PersistentVolumeClaim, TEST_NAMESPACE).len(), 3);

        let pruned = with_retention(statefulset_container("db", 1), RetentionPolicy::Retain, RetentionPolicy::Delete);
        claims
            .prune_scaled_claims(&Definition::new(&pruned, &environment, None, &config), TEST_NAMESPACE)
            .await
            .unwrap();
        assert_eq!(
            cluster.names(ResourceKind::PersistentVolumeClaim, TEST_NAMESPACE),
            vec!["data-db-0".to_string()]
        );
    }

    #[tokio::test]
    async fn test_delete_for_statefulset_follows_policy() {
        let cluster = MockCluster::new();
        seed_stateful_claim(&cluster, "db", 0);
        seed_stateful_claim(&cluster, "db", 1);
        let environment = test_environment();
        let config = test_config();
        let claims = reconciler(&cluster);

        let retained = with_retention(statefulset_container("db", 2), RetentionPolicy::Retain, RetentionPolicy::Retain);
        claims
            .delete_for(&Definition::new(&retained, &environment, None, &config), TEST_NAMESPACE)
            .await
            .unwrap();
        assert_eq!(cluster.names(ResourceKind::PersistentVolumeClaim, TEST_NAMESPACE).len(), 2);

        let deleted = with_retention(statefulset_container("db", 2), RetentionPolicy::Delete, RetentionPolicy::Retain);
        claims
            .delete_for(&Definition::new(&deleted, &environment, None, &config), TEST_NAMESPACE)
            .await
            .unwrap();
        assert!(cluster.names(ResourceKind::PersistentVolumeClaim, TEST_NAMESPACE).is_empty());
    }
}
