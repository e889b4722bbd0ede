//! Container specification
//!
//! The declarative description of one workload. `iid` is used verbatim as
//! the base name of every generated cluster object.

use crate::networking::Networking;
use crate::pod::{EnvVariable, PodConfig, Probes};
use crate::source::{ContainerSource, RepoConfig};
use crate::units::MemoryUnit;
use crate::workload::{ContainerType, CronJobConfig, DeploymentConfig, StatefulSetConfig, WorkloadConfig};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSpec {
    /// Immutable, Kubernetes name safe identifier
    pub iid: String,
    /// Short identifier suffixed to pipeline object names
    pub slug: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub container_type: ContainerType,
    #[serde(default)]
    pub networking: Networking,
    pub pod_config: PodConfig,
    #[serde(default)]
    pub probes: Probes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_config: Option<StorageConfig>,
    #[serde(flatten)]
    pub workload: WorkloadConfig,
    #[serde(flatten)]
    pub source: ContainerSource,
    #[serde(default)]
    pub variables: Vec<EnvVariable>,
}

impl ContainerSpec {
    /// Storage settings, only when enabled
    pub fn storage(&self) -> Option<&StorageConfig> {
        self.storage_config.as_ref().filter(|s| s.enabled)
    }

    pub fn repo(&self) -> Option<&RepoConfig> {
        self.source.repo()
    }

    /// The repo block, only when connected to a provider
    pub fn connected_repo(&self) -> Option<&RepoConfig> {
        self.source.repo().filter(|r| r.connected)
    }

    pub fn deployment_config(&self) -> Option<&DeploymentConfig> {
        match &self.workload {
            WorkloadConfig::Deployment(config) => Some(config),
            _ => None,
        }
    }

    pub fn stateful_set_config(&self) -> Option<&StatefulSetConfig> {
        match &self.workload {
            WorkloadConfig::StatefulSet(config) => Some(config),
            _ => None,
        }
    }

    pub fn cron_job_config(&self) -> Option<&CronJobConfig> {
        match &self.workload {
            WorkloadConfig::CronJob(config) => Some(config),
            _ => None,
        }
    }

    /// Whether this container gets a Service and network exposure at all
    pub fn is_networked(&self) -> bool {
        self.container_type != ContainerType::CronJob
    }
}

/// Persistent storage settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    pub enabled: bool,
    #[serde(default)]
    pub mount_path: String,
    pub size: f64,
    pub size_type: MemoryUnit,
    #[serde(default = "default_access_modes")]
    pub access_modes: Vec<AccessMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,
}

fn default_access_modes() -> Vec<AccessMode> {
    vec![AccessMode::ReadWriteOnce]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum AccessMode {
    ReadWriteOnce,
    ReadOnlyMany,
    ReadWriteMany,
    ReadWriteOncePod,
}

impl AccessMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReadWriteOnce => "ReadWriteOnce",
            Self::ReadOnlyMany => "ReadOnlyMany",
            Self::ReadWriteMany => "ReadWriteMany",
            Self::ReadWriteOncePod => "ReadWriteOncePod",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git_provider::ProviderKind;

    const DEPLOYMENT_YAML: &str = r#"
iid: web-x1y2z3
slug: x1y2z3
name: web
type: deployment
networking:
  containerPort: 8080
  ingress:
    enabled: true
    type: subdomain
  tcpProxy:
    enabled: false
podConfig:
  cpuRequest: 250
  cpuRequestType: millicores
  cpuLimit: 1
  cpuLimitType: cores
  memoryRequest: 256
  memoryRequestType: mebibyte
  memoryLimit: 1
  memoryLimitType: gibibyte
probes:
  readiness:
    enabled: true
    httpGet:
      path: /healthz
      port: 8080
deploymentConfig:
  desiredReplicas: 2
  minReplicas: 1
  maxReplicas: 4
  cpuMetric:
    enabled: true
    metricType: averageUtilization
    metricValue: 80
repo:
  connected: true
  provider: github
  url: https://github.com/acme/web
  branch: main
  webHookId: "42"
variables:
  - name: LOG_LEVEL
    value: debug
"#;

    #[test]
    fn test_deserialize_deployment_container() {
        let spec: ContainerSpec = serde_yaml::from_str(DEPLOYMENT_YAML).unwrap();
        assert_eq!(spec.container_type, ContainerType::Deployment);
        assert_eq!(spec.networking.container_port, 8080);
        assert!(spec.deployment_config().unwrap().autoscaling_enabled());
        let repo = spec.connected_repo().unwrap();
        assert_eq!(repo.provider, ProviderKind::GitHub);
        assert_eq!(repo.webhook_id.as_deref(), Some("42"));
        assert_eq!(repo.dockerfile, "Dockerfile");
        assert!(spec.probes.liveness.is_none());
        assert!(spec.storage().is_none());
    }

    #[test]
    fn test_serialize_keeps_wire_names() {
        let spec: ContainerSpec = serde_yaml::from_str(DEPLOYMENT_YAML).unwrap();
        let value = serde_json::to_value(&spec).unwrap();
        assert!(value.get("deploymentConfig").is_some());
        assert_eq!(value["repo"]["webHookId"], "42");
        assert!(value.get("registry").is_none());
        assert_eq!(value["type"], "deployment");
    }

    #[test]
    fn test_registry_source() {
        let yaml = DEPLOYMENT_YAML.replace(
            "repo:\n  connected: true\n  provider: github\n  url: https://github.com/acme/web\n  branch: main\n  webHookId: \"42\"\n",
            "registry:\n  image: nginx:1.27\n",
        );
        let spec: ContainerSpec = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(spec.source.registry_image(), Some("nginx:1.27"));
        assert!(spec.repo().is_none());
    }
}
