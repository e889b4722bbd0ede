//! Unit tests for the TCP proxy manager

#[cfg(test)]
mod tests {
    use crate::cluster::{ClusterApi, MockCluster, ResourceKind, Verb};
    use crate::error::ReconcileError;
    use crate::tcp_proxy::TcpProxyManager;
    use crate::test_utils::*;
    use k8s_openapi::api::apps::v1::Deployment;
    use k8s_openapi::api::core::v1::{ConfigMap, Service};
    use serde_json::json;
    use std::sync::Arc;

    const INGRESS_NS: &str = "ingress-nginx";

    fn seed_controller(cluster: &MockCluster) {
        cluster.insert(
            ResourceKind::Service,
            INGRESS_NS,
            json!({
                "metadata": {"name": "ingress-nginx-controller"},
                "spec": {"type": "LoadBalancer", "ports": [
                    {"name": "http", "port": 80, "protocol": "TCP"},
                    {"name": "https", "port": 443, "protocol": "TCP"},
                ]},
            }),
        );
        cluster.insert(
            ResourceKind::Service,
            INGRESS_NS,
            json!({
                "metadata": {"name": "ingress-nginx-controller-admission"},
                "spec": {"ports": [{"name": "https-webhook", "port": 443}]},
            }),
        );
        cluster.insert(
            ResourceKind::Deployment,
            INGRESS_NS,
            json!({
                "metadata": {"name": "ingress-nginx-controller"},
                "spec": {
                    "selector": {"matchLabels": {"app": "ingress-nginx"}},
                    "template": {"spec": {"containers": [{
                        "name": "controller",
                        "image": "registry.k8s.io/ingress-nginx/controller:v1.11.2",
                        "args": ["/nginx-ingress-controller", "--election-id=ingress-nginx-leader"],
                        "ports": [{"name": "http", "containerPort": 80}],
                    }]}},
                },
            }),
        );
    }

    fn seed_backend(cluster: &MockCluster, protocol: &str) {
        cluster.insert(
            ResourceKind::Service,
            TEST_NAMESPACE,
            json!({
                "metadata": {"name": "db"},
                "spec": {"ports": [{"name": "main", "port": 5432, "protocol": protocol}]},
            }),
        );
    }

    fn manager(cluster: &MockCluster) -> TcpProxyManager {
        let shared: Arc<dyn ClusterApi> = Arc::new(cluster.clone());
        TcpProxyManager::new(shared, &test_config())
    }

    fn controller_service(cluster: &MockCluster, name: &str) -> Service {
        serde_json::from_value(cluster.object(ResourceKind::Service, INGRESS_NS, name).unwrap()).unwrap()
    }

    fn controller_deployment(cluster: &MockCluster) -> Deployment {
        serde_json::from_value(
            cluster
                .object(ResourceKind::Deployment, INGRESS_NS, "ingress-nginx-controller")
                .unwrap(),
        )
        .unwrap()
    }

    fn tcp_services(cluster: &MockCluster) -> ConfigMap {
        serde_json::from_value(cluster.object(ResourceKind::ConfigMap, INGRESS_NS, "tcp-services").unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_enable_twice_yields_single_entries() {
        let cluster = MockCluster::new();
        seed_controller(&cluster);
        seed_backend(&cluster, "TCP");
        let proxy = manager(&cluster);

        for _ in 0..2 {
            let sweep = proxy.enable("db", TEST_NAMESPACE, 30432, 5432).await.unwrap();
            assert_eq!(sweep.len(), 2);
            sweep.wait().await.unwrap();
        }

        let data = tcp_services(&cluster).data.unwrap();
        assert_eq!(data.len(), 1);
        assert_eq!(data["30432"], "env-abc123/db:5432");

        let ports = controller_service(&cluster, "ingress-nginx-controller").spec.unwrap().ports.unwrap();
        let proxied: Vec<_> = ports
            .iter()
            .filter(|p| p.name.as_deref() == Some("proxied-tcp-30432"))
            .collect();
        assert_eq!(proxied.len(), 1);
        assert_eq!(proxied[0].port, 30432);
        assert_eq!(ports.len(), 3);

        let container = controller_deployment(&cluster).spec.unwrap().template.spec.unwrap().containers[0].clone();
        let tcp: Vec<_> = container
            .ports
            .unwrap()
            .into_iter()
            .filter(|p| p.container_port == 30432)
            .collect();
        assert_eq!(tcp.len(), 1);
        assert_eq!(tcp[0].host_port, Some(30432));
        assert_eq!(tcp[0].name.as_deref(), Some("tcp-30432"));
        let flags: Vec<_> = container
            .args
            .unwrap()
            .into_iter()
            .filter(|a| a.starts_with("--tcp-services-configmap="))
            .collect();
        assert_eq!(flags, vec!["--tcp-services-configmap=ingress-nginx/tcp-services".to_string()]);
    }

    #[tokio::test]
    async fn test_exact_controller_name_wins() {
        let cluster = MockCluster::new();
        seed_controller(&cluster);
        seed_backend(&cluster, "TCP");

        manager(&cluster)
            .enable("db", TEST_NAMESPACE, 30432, 5432)
            .await
            .unwrap()
            .wait()
            .await
            .unwrap();

        let admission = controller_service(&cluster, "ingress-nginx-controller-admission");
        assert_eq!(admission.spec.unwrap().ports.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_backend_protocol_is_mirrored() {
        let cluster = MockCluster::new();
        seed_controller(&cluster);
        seed_backend(&cluster, "UDP");

        manager(&cluster)
            .enable("db", TEST_NAMESPACE, 30053, 5432)
            .await
            .unwrap()
            .wait()
            .await
            .unwrap();

        let ports = controller_service(&cluster, "ingress-nginx-controller").spec.unwrap().ports.unwrap();
        let proxied = ports.iter().find(|p| p.port == 30053).unwrap();
        assert_eq!(proxied.protocol.as_deref(), Some("UDP"));
    }

    #[tokio::test]
    async fn test_missing_backend_writes_nothing() {
        let cluster = MockCluster::new();
        seed_controller(&cluster);

        let result = manager(&cluster).enable("db", TEST_NAMESPACE, 30432, 5432).await;

        assert!(matches!(result, Err(ReconcileError::NotFound(_))));
        assert!(cluster.mutating_calls().is_empty());
    }

    #[tokio::test]
    async fn test_disable_many_then_again_is_quiet() {
        let cluster = MockCluster::new();
        seed_controller(&cluster);
        seed_backend(&cluster, "TCP");
        let proxy = manager(&cluster);
        for port in [30432, 30433] {
            proxy.enable("db", TEST_NAMESPACE, port, 5432).await.unwrap().wait().await.unwrap();
        }

        proxy.disable_many(&[30432, 30433]).await.unwrap().wait().await.unwrap();

        assert!(tcp_services(&cluster).data.unwrap().is_empty());
        let ports = controller_service(&cluster, "ingress-nginx-controller").spec.unwrap().ports.unwrap();
        assert_eq!(ports.len(), 2);
        let container = controller_deployment(&cluster).spec.unwrap().template.spec.unwrap().containers[0].clone();
        assert_eq!(container.ports.unwrap().len(), 1);

        cluster.clear_calls();
        proxy.disable(30432).await.unwrap().wait().await.unwrap();
        assert!(cluster.calls().iter().all(|c| !c.verb.is_mutating()));
        assert!(cluster.calls().iter().any(|c| c.verb == Verb::List));
    }

    #[tokio::test]
    async fn test_failed_controller_edit_surfaces_on_wait() {
        let cluster = MockCluster::new();
        seed_controller(&cluster);
        seed_backend(&cluster, "TCP");
        cluster.fail_on(Verb::Replace, ResourceKind::Deployment);

        let sweep = manager(&cluster).enable("db", TEST_NAMESPACE, 30432, 5432).await.unwrap();
        let result = sweep.wait().await;

        assert!(matches!(result, Err(ReconcileError::Cluster(_))));
        assert_eq!(tcp_services(&cluster).data.unwrap()["30432"], "env-abc123/db:5432");
    }

    #[tokio::test]
    async fn test_controller_port_is_refused() {
        let cluster = MockCluster::new();
        seed_controller(&cluster);
        seed_backend(&cluster, "TCP");

        let result = manager(&cluster).enable("db", TEST_NAMESPACE, 443, 5432).await;

        assert!(matches!(result, Err(ReconcileError::Validation(_))));
        assert!(cluster.mutating_calls().is_empty());
    }

    #[tokio::test]
    async fn test_disable_leaves_controller_ports_alone() {
        let cluster = MockCluster::new();
        seed_controller(&cluster);

        manager(&cluster).disable(80).await.unwrap().wait().await.unwrap();

        let ports = controller_service(&cluster, "ingress-nginx-controller").spec.unwrap().ports.unwrap();
        let names: Vec<_> = ports.iter().filter_map(|p| p.name.clone()).collect();
        assert_eq!(names, vec!["http".to_string(), "https".to_string()]);
        let container = controller_deployment(&cluster).spec.unwrap().template.spec.unwrap().containers[0].clone();
        assert_eq!(container.ports.unwrap()[0].container_port, 80);
        assert!(cluster.mutating_calls().is_empty());
    }

    #[tokio::test]
    async fn test_moving_a_port_edits_each_object_once() {
        let cluster = MockCluster::new();
        seed_controller(&cluster);
        seed_backend(&cluster, "TCP");
        let proxy = manager(&cluster);
        proxy.enable("db", TEST_NAMESPACE, 30432, 5432).await.unwrap().wait().await.unwrap();
        cluster.clear_calls();

        let sweep = proxy
            .enable_replacing("db", TEST_NAMESPACE, 30433, 5432, &[30432])
            .await
            .unwrap();
        assert_eq!(sweep.len(), 2);
        sweep.wait().await.unwrap();

        let data = tcp_services(&cluster).data.unwrap();
        assert_eq!(data.len(), 1);
        assert_eq!(data["30433"], "env-abc123/db:5432");
        let ports = controller_service(&cluster, "ingress-nginx-controller").spec.unwrap().ports.unwrap();
        let proxied: Vec<_> = ports
            .iter()
            .filter_map(|p| p.name.clone())
            .filter(|n| n.starts_with("proxied-tcp-"))
            .collect();
        assert_eq!(proxied, vec!["proxied-tcp-30433".to_string()]);
        let controller_writes = cluster
            .mutating_calls()
            .into_iter()
            .filter(|c| c.namespace == INGRESS_NS && c.kind != ResourceKind::ConfigMap)
            .count();
        assert_eq!(controller_writes, 2);
    }
}
