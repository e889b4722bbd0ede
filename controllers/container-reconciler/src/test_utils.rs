//! Test utilities for unit testing reconcilers
//!
//! Fixture builders for containers, environments and registries plus a
//! helper that wires an engine onto the in-memory cluster.

use crate::cluster::{ClusterApi, MockCluster};
use crate::config::EngineConfig;
use crate::coordinator::Coordinator;
use git_provider_client::{MockGitProviderClient, MockProviderFactory};
use platform_model::*;
use std::collections::BTreeMap;
use std::sync::Arc;

pub const TEST_NAMESPACE: &str = "env-abc123";

pub fn test_environment() -> Environment {
    Environment {
        iid: TEST_NAMESPACE.to_string(),
        name: "Staging".to_string(),
        labels: BTreeMap::new(),
    }
}

/// Cluster with one custom domain and a public IP
pub fn test_config() -> EngineConfig {
    EngineConfig {
        cluster_domains: vec!["apps.example.com".to_string()],
        cluster_ip: Some("203.0.113.10".to_string()),
        ..EngineConfig::default()
    }
}

pub fn test_pod_config(restart_policy: RestartPolicy) -> PodConfig {
    PodConfig {
        cpu_request: 250.0,
        cpu_request_type: CpuUnit::Millicores,
        cpu_limit: 1.0,
        cpu_limit_type: CpuUnit::Cores,
        memory_request: 256.0,
        memory_request_type: MemoryUnit::Mebibyte,
        memory_limit: 1.0,
        memory_limit_type: MemoryUnit::Gibibyte,
        restart_policy,
    }
}

pub fn test_storage(size_gib: f64) -> StorageConfig {
    StorageConfig {
        enabled: true,
        mount_path: "/data".to_string(),
        size: size_gib,
        size_type: MemoryUnit::Gibibyte,
        access_modes: vec![AccessMode::ReadWriteOnce],
        storage_class: None,
    }
}

pub fn test_deployment_config() -> DeploymentConfig {
    DeploymentConfig {
        desired_replicas: 2,
        min_replicas: 2,
        max_replicas: 5,
        cpu_metric: CpuMetric::default(),
        memory_metric: MemoryMetric::default(),
        strategy: DeploymentStrategy::RollingUpdate,
        rolling_update: None,
        revision_history_limit: None,
    }
}

/// Registry-sourced deployment listening on 8080, nothing exposed
pub fn deployment_container(iid: &str) -> ContainerSpec {
    ContainerSpec {
        iid: iid.to_string(),
        slug: format!("{}-s", iid),
        name: iid.to_string(),
        container_type: ContainerType::Deployment,
        networking: Networking {
            container_port: 8080,
            ..Networking::default()
        },
        pod_config: test_pod_config(RestartPolicy::Always),
        probes: Probes::default(),
        storage_config: None,
        workload: WorkloadConfig::Deployment(test_deployment_config()),
        source: ContainerSource::Registry(RegistryImage {
            image: "nginx:1.27".to_string(),
        }),
        variables: Vec::new(),
    }
}

pub fn statefulset_container(iid: &str, replicas: i32) -> ContainerSpec {
    ContainerSpec {
        container_type: ContainerType::StatefulSet,
        storage_config: Some(test_storage(1.0)),
        workload: WorkloadConfig::StatefulSet(StatefulSetConfig {
            desired_replicas: replicas,
            strategy: StatefulSetStrategy::RollingUpdate,
            rolling_update_partition: None,
            revision_history_limit: None,
            pod_management_policy: PodManagementPolicy::OrderedReady,
            persistent_volume_claim_retention_policy: PvcRetentionPolicy::default(),
        }),
        source: ContainerSource::Registry(RegistryImage {
            image: "postgres:16".to_string(),
        }),
        ..deployment_container(iid)
    }
}

pub fn cronjob_container(iid: &str) -> ContainerSpec {
    ContainerSpec {
        container_type: ContainerType::CronJob,
        networking: Networking::default(),
        pod_config: test_pod_config(RestartPolicy::OnFailure),
        workload: WorkloadConfig::CronJob(CronJobConfig {
            schedule: "*/15 * * * *".to_string(),
            time_zone: None,
            concurrency_policy: ConcurrencyPolicy::Forbid,
            suspend: false,
            successful_jobs_history_limit: Some(3),
            failed_jobs_history_limit: Some(1),
            starting_deadline_seconds: None,
            backoff_limit: Some(2),
            active_deadline_seconds: None,
        }),
        source: ContainerSource::Registry(RegistryImage {
            image: "busybox:1.36".to_string(),
        }),
        ..deployment_container(iid)
    }
}

pub fn test_repo(connected: bool) -> RepoConfig {
    RepoConfig {
        connected,
        provider: ProviderKind::GitHub,
        url: "https://github.com/acme/web".to_string(),
        branch: "main".to_string(),
        path: "/".to_string(),
        dockerfile: "Dockerfile".to_string(),
        watch_path: None,
        webhook_id: None,
    }
}

/// Deployment built from a GitHub repository
pub fn repo_container(iid: &str, connected: bool) -> ContainerSpec {
    ContainerSpec {
        source: ContainerSource::Repo(test_repo(connected)),
        ..deployment_container(iid)
    }
}

pub fn test_registry() -> Registry {
    Registry {
        iid: "reg1".to_string(),
        name: "Local".to_string(),
        registry_type: RegistryType::Local,
        endpoint: "registry.local:5000".to_string(),
        repository: None,
        push_secret: Some("registry-push".to_string()),
        pull_secret: None,
    }
}

pub fn test_git_provider() -> GitProvider {
    GitProvider {
        iid: "gp1".to_string(),
        provider: ProviderKind::GitHub,
        access_token: "ghp_test".to_string(),
        username: Some("octocat".to_string()),
        api_url: None,
    }
}

/// Engine over an empty mock cluster and a mock git provider
pub struct TestEngine {
    pub cluster: MockCluster,
    pub git: MockGitProviderClient,
    pub coordinator: Coordinator,
}

pub fn test_engine(config: EngineConfig) -> TestEngine {
    let cluster = MockCluster::new();
    let factory = MockProviderFactory::default();
    let git = factory.client.clone();
    let shared: Arc<dyn ClusterApi> = Arc::new(cluster.clone());
    let coordinator = Coordinator::new(shared, Arc::new(factory), config);
    TestEngine {
        cluster,
        git,
        coordinator,
    }
}
