//! Unit tests for the coordinator

#[cfg(test)]
mod tests {
    use crate::changes::{ChangeSet, ResourceCategory};
    use crate::cluster::{ResourceKind, Verb};
    use crate::config::EngineConfig;
    use crate::coordinator::Action;
    use crate::error::ReconcileError;
    use crate::test_utils::*;
    use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Service};
    use platform_model::{ContainerSpec, ContainerType, IngressType};
    use serde_json::json;
    use std::time::Duration;

    fn exposed(iid: &str) -> ContainerSpec {
        let mut container = deployment_container(iid);
        container.networking.ingress.enabled = true;
        container.networking.ingress.ingress_type = IngressType::Path;
        container.storage_config = Some(test_storage(1.0));
        container
    }

    fn update(previous: &ContainerSpec) -> Action {
        Action::Update {
            previous: Box::new(previous.clone()),
        }
    }

    fn seed_ingress_controller(engine: &TestEngine) {
        engine.cluster.insert(
            ResourceKind::Service,
            "ingress-nginx",
            json!({
                "metadata": {"name": "ingress-nginx-controller"},
                "spec": {"ports": [{"name": "http", "port": 80, "protocol": "TCP"}]},
            }),
        );
        engine.cluster.insert(
            ResourceKind::Deployment,
            "ingress-nginx",
            json!({
                "metadata": {"name": "ingress-nginx-controller"},
                "spec": {
                    "selector": {"matchLabels": {"app": "ingress-nginx"}},
                    "template": {"spec": {"containers": [{
                        "name": "controller",
                        "args": ["/nginx-ingress-controller"],
                    }]}},
                },
            }),
        );
    }

    fn seed_backend(engine: &TestEngine) {
        engine.cluster.insert(
            ResourceKind::Service,
            TEST_NAMESPACE,
            json!({
                "metadata": {"name": "db"},
                "spec": {"ports": [{"name": "main", "port": 5432, "protocol": "TCP"}]},
            }),
        );
    }

    fn proxied_ports(engine: &TestEngine) -> Vec<String> {
        let service: Service = serde_json::from_value(
            engine
                .cluster
                .object(ResourceKind::Service, "ingress-nginx", "ingress-nginx-controller")
                .unwrap(),
        )
        .unwrap();
        service
            .spec
            .unwrap()
            .ports
            .unwrap_or_default()
            .into_iter()
            .filter_map(|p| p.name)
            .filter(|n| n.starts_with("proxied-tcp-"))
            .collect()
    }

    /// Poll until a detached sweep has landed
    async fn eventually(check: impl Fn() -> bool) {
        for _ in 0..400 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn controller_writes(engine: &TestEngine) -> usize {
        engine
            .cluster
            .mutating_calls()
            .into_iter()
            .filter(|c| c.namespace == "ingress-nginx" && c.kind != ResourceKind::ConfigMap)
            .count()
    }

    #[tokio::test]
    async fn test_create_runs_in_dependency_order() {
        let engine = test_engine(test_config());
        let environment = test_environment();
        let mut container = exposed("web");

        let outcome = engine
            .coordinator
            .reconcile(&Action::Create, &mut container, &environment, None, None, &ChangeSet::new())
            .await
            .unwrap();

        let created: Vec<ResourceKind> = engine
            .cluster
            .mutating_calls()
            .into_iter()
            .filter(|c| c.verb == Verb::Create)
            .map(|c| c.kind)
            .collect();
        assert_eq!(
            created,
            vec![
                ResourceKind::PersistentVolumeClaim,
                ResourceKind::Service,
                ResourceKind::Deployment,
                ResourceKind::Ingress,
            ]
        );
        assert!(outcome.touched.contains(ResourceCategory::Deployment));
        assert!(!outcome.touched.contains(ResourceCategory::Repo));
        assert!(!outcome.touched.contains(ResourceCategory::TcpProxy));
        assert_eq!(outcome.webhook_id, None);
    }

    #[tokio::test]
    async fn test_update_only_touches_changed_categories() {
        let engine = test_engine(test_config());
        let environment = test_environment();
        let mut previous = exposed("web");
        engine
            .coordinator
            .reconcile(&Action::Create, &mut previous, &environment, None, None, &ChangeSet::new())
            .await
            .unwrap();
        engine.cluster.clear_calls();

        let mut next = previous.clone();
        if let platform_model::WorkloadConfig::Deployment(config) = &mut next.workload {
            config.cpu_metric.enabled = true;
            config.cpu_metric.metric_value = 70.0;
        }
        let changes = ChangeSet::between(Some(&previous), &next);
        assert_eq!(changes.iter().collect::<Vec<_>>(), vec![ResourceCategory::Hpa]);

        let outcome = engine
            .coordinator
            .reconcile(&update(&previous), &mut next, &environment, None, None, &changes)
            .await
            .unwrap();

        assert_eq!(engine.cluster.touched_kinds(), vec![ResourceKind::HorizontalPodAutoscaler]);
        assert_eq!(outcome.touched, changes);
        assert!(engine
            .cluster
            .object(ResourceKind::HorizontalPodAutoscaler, TEST_NAMESPACE, "web")
            .is_some());
    }

    #[tokio::test]
    async fn test_webhook_follows_connected_flag() {
        let engine = test_engine(test_config());
        let environment = test_environment();
        let registry = test_registry();
        let git_provider = test_git_provider();

        let mut detached = repo_container("web", false);
        engine
            .coordinator
            .reconcile(
                &Action::Create,
                &mut detached,
                &environment,
                Some(&git_provider),
                Some(&registry),
                &ChangeSet::new(),
            )
            .await
            .unwrap();
        assert!(engine.git.hooks().is_empty());

        let mut connected = detached.clone();
        if let Some(repo) = connected.source.repo_mut() {
            repo.connected = true;
        }
        let changes = ChangeSet::between(Some(&detached), &connected);
        assert!(changes.contains(ResourceCategory::Repo));
        let outcome = engine
            .coordinator
            .reconcile(
                &update(&detached),
                &mut connected,
                &environment,
                Some(&git_provider),
                Some(&registry),
                &changes,
            )
            .await
            .unwrap();
        let id = outcome.webhook_id.unwrap();
        assert_eq!(engine.git.hooks().len(), 1);
        assert_eq!(connected.repo().unwrap().webhook_id.as_deref(), Some(id.as_str()));

        let mut disconnected = connected.clone();
        if let Some(repo) = disconnected.source.repo_mut() {
            repo.connected = false;
        }
        let changes = ChangeSet::between(Some(&connected), &disconnected);
        let outcome = engine
            .coordinator
            .reconcile(
                &update(&connected),
                &mut disconnected,
                &environment,
                Some(&git_provider),
                Some(&registry),
                &changes,
            )
            .await
            .unwrap();
        assert_eq!(outcome.webhook_id, None);
        assert_eq!(engine.git.deleted(), vec![id]);
        assert_eq!(disconnected.repo().unwrap().webhook_id, None);
    }

    #[tokio::test]
    async fn test_connected_repo_requires_git_provider() {
        let engine = test_engine(test_config());
        let mut container = repo_container("web", true);
        let registry = test_registry();

        let result = engine
            .coordinator
            .reconcile(
                &Action::Create,
                &mut container,
                &test_environment(),
                None,
                Some(&registry),
                &ChangeSet::new(),
            )
            .await;

        assert!(matches!(result, Err(ReconcileError::Validation(_))));
        assert!(engine.cluster.calls().is_empty());
    }

    #[tokio::test]
    async fn test_delete_twice_is_quiet() {
        let engine = test_engine(test_config());
        let environment = test_environment();
        let mut container = exposed("web");
        let none = ChangeSet::new();
        engine
            .coordinator
            .reconcile(&Action::Create, &mut container, &environment, None, None, &none)
            .await
            .unwrap();

        engine
            .coordinator
            .reconcile(&Action::Delete, &mut container, &environment, None, None, &none)
            .await
            .unwrap();
        for kind in [
            ResourceKind::Deployment,
            ResourceKind::Service,
            ResourceKind::PersistentVolumeClaim,
            ResourceKind::Ingress,
        ] {
            assert!(engine.cluster.names(kind, TEST_NAMESPACE).is_empty(), "{} left behind", kind);
        }

        engine.cluster.clear_calls();
        engine
            .coordinator
            .reconcile(&Action::Delete, &mut container, &environment, None, None, &none)
            .await
            .unwrap();
        assert!(engine.cluster.mutating_calls().is_empty());
    }

    #[tokio::test]
    async fn test_type_change_is_rejected() {
        let engine = test_engine(test_config());
        let previous = deployment_container("web");
        let mut next = statefulset_container("web", 1);
        let changes = ChangeSet::all_for(&next);

        let result = engine
            .coordinator
            .reconcile(&update(&previous), &mut next, &test_environment(), None, None, &changes)
            .await;

        assert!(matches!(result, Err(ReconcileError::Validation(_))));
        assert!(engine.cluster.calls().is_empty());
    }

    #[tokio::test]
    async fn test_statefulset_storage_toggle_is_rejected() {
        let engine = test_engine(test_config());
        let previous = statefulset_container("db", 1);
        let mut next = previous.clone();
        next.storage_config = None;
        assert_eq!(next.container_type, ContainerType::StatefulSet);
        let changes = ChangeSet::between(Some(&previous), &next);

        let result = engine
            .coordinator
            .reconcile(&update(&previous), &mut next, &test_environment(), None, None, &changes)
            .await;

        assert!(matches!(result, Err(ReconcileError::Validation(_))));
        assert!(engine.cluster.calls().is_empty());
    }

    #[tokio::test]
    async fn test_public_port_change_moves_proxy_entry() {
        let engine = test_engine(EngineConfig {
            await_proxy_sweep: true,
            ..test_config()
        });
        seed_ingress_controller(&engine);
        let environment = test_environment();
        let mut previous = deployment_container("db");
        previous.networking.tcp_proxy.enabled = true;
        previous.networking.tcp_proxy.public_port = Some(30001);
        engine
            .coordinator
            .reconcile(&Action::Create, &mut previous, &environment, None, None, &ChangeSet::new())
            .await
            .unwrap();

        let mut next = previous.clone();
        next.networking.tcp_proxy.public_port = Some(30002);
        let changes = ChangeSet::between(Some(&previous), &next);
        assert!(changes.contains(ResourceCategory::TcpProxy));
        engine
            .coordinator
            .reconcile(&update(&previous), &mut next, &environment, None, None, &changes)
            .await
            .unwrap();

        let tcp_services: ConfigMap = serde_json::from_value(
            engine
                .cluster
                .object(ResourceKind::ConfigMap, "ingress-nginx", "tcp-services")
                .unwrap(),
        )
        .unwrap();
        let data = tcp_services.data.unwrap();
        assert_eq!(data.len(), 1);
        assert_eq!(data["30002"], "env-abc123/db:8080");
    }

    #[tokio::test]
    async fn test_environment_lifecycle() {
        let engine = test_engine(test_config());
        let environment = test_environment();
        let coordinator = &engine.coordinator;

        coordinator.create_environment(&environment).await.unwrap();
        coordinator.create_environment(&environment).await.unwrap();
        let namespace: Namespace =
            serde_json::from_value(engine.cluster.object(ResourceKind::Namespace, "", TEST_NAMESPACE).unwrap())
                .unwrap();
        assert_eq!(namespace.metadata.labels.unwrap()["app.kubernetes.io/managed-by"], "keel");
        let creates = engine
            .cluster
            .mutating_calls()
            .into_iter()
            .filter(|c| c.kind == ResourceKind::Namespace)
            .count();
        assert_eq!(creates, 1);

        let mut members = vec![deployment_container("web"), cronjob_container("report")];
        for member in members.iter_mut() {
            coordinator
                .reconcile(&Action::Create, member, &environment, None, None, &ChangeSet::new())
                .await
                .unwrap();
        }
        engine.cluster.fail_on_name(Verb::Delete, ResourceKind::CronJob, "report");

        let result = coordinator.delete_environment(&environment, &mut members, &[]).await;

        assert!(matches!(result, Err(ReconcileError::Cluster(_))));
        assert!(engine.cluster.names(ResourceKind::Deployment, TEST_NAMESPACE).is_empty());
        assert!(engine.cluster.object(ResourceKind::Namespace, "", TEST_NAMESPACE).is_none());
    }

    #[tokio::test]
    async fn test_one_shot_proxy_is_complete_on_return() {
        let engine = test_engine(test_config().one_shot());
        seed_ingress_controller(&engine);
        seed_backend(&engine);

        engine
            .coordinator
            .enable_proxy("db", TEST_NAMESPACE, 30432, 5432)
            .await
            .unwrap();

        assert_eq!(proxied_ports(&engine), vec!["proxied-tcp-30432".to_string()]);
        assert_eq!(controller_writes(&engine), 2);
    }

    #[tokio::test]
    async fn test_detached_proxy_sweep_finishes_in_background() {
        let engine = test_engine(test_config());
        assert!(!engine.coordinator.config().await_proxy_sweep);
        seed_ingress_controller(&engine);
        seed_backend(&engine);

        engine
            .coordinator
            .enable_proxy("db", TEST_NAMESPACE, 30432, 5432)
            .await
            .unwrap();

        eventually(|| controller_writes(&engine) == 2).await;
        assert_eq!(proxied_ports(&engine), vec!["proxied-tcp-30432".to_string()]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_detached_port_move_is_one_sweep() {
        let engine = test_engine(test_config());
        seed_ingress_controller(&engine);
        let environment = test_environment();
        let mut previous = deployment_container("db");
        previous.networking.tcp_proxy.enabled = true;
        previous.networking.tcp_proxy.public_port = Some(30001);
        engine
            .coordinator
            .reconcile(&Action::Create, &mut previous, &environment, None, None, &ChangeSet::new())
            .await
            .unwrap();
        eventually(|| controller_writes(&engine) == 2).await;
        assert_eq!(proxied_ports(&engine), vec!["proxied-tcp-30001".to_string()]);
        engine.cluster.clear_calls();

        let mut next = previous.clone();
        next.networking.tcp_proxy.public_port = Some(30002);
        let changes = ChangeSet::between(Some(&previous), &next);
        engine
            .coordinator
            .reconcile(&update(&previous), &mut next, &environment, None, None, &changes)
            .await
            .unwrap();

        eventually(|| controller_writes(&engine) >= 2).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(proxied_ports(&engine), vec!["proxied-tcp-30002".to_string()]);
        assert_eq!(controller_writes(&engine), 2);
    }
}
