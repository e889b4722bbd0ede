//! Workload configuration: exactly one of deployment, stateful set or cron
//! job settings, selected by the container type.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Container type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ContainerType {
    Deployment,
    StatefulSet,
    CronJob,
}

impl ContainerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deployment => "deployment",
            Self::StatefulSet => "statefulset",
            Self::CronJob => "cronjob",
        }
    }
}

impl std::fmt::Display for ContainerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Type specific workload settings. Serialized under `deploymentConfig`,
/// `statefulSetConfig` or `cronJobConfig`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub enum WorkloadConfig {
    #[serde(rename = "deploymentConfig")]
    Deployment(DeploymentConfig),
    #[serde(rename = "statefulSetConfig")]
    StatefulSet(StatefulSetConfig),
    #[serde(rename = "cronJobConfig")]
    CronJob(CronJobConfig),
}

impl WorkloadConfig {
    /// The container type this configuration belongs to
    pub fn container_type(&self) -> ContainerType {
        match self {
            Self::Deployment(_) => ContainerType::Deployment,
            Self::StatefulSet(_) => ContainerType::StatefulSet,
            Self::CronJob(_) => ContainerType::CronJob,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentConfig {
    pub desired_replicas: i32,
    #[serde(default = "default_replicas")]
    pub min_replicas: i32,
    #[serde(default = "default_replicas")]
    pub max_replicas: i32,
    #[serde(default)]
    pub cpu_metric: CpuMetric,
    #[serde(default)]
    pub memory_metric: MemoryMetric,
    #[serde(default)]
    pub strategy: DeploymentStrategy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rolling_update: Option<RollingUpdate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision_history_limit: Option<i32>,
}

impl DeploymentConfig {
    /// An autoscaler exists iff at least one metric is enabled.
    pub fn autoscaling_enabled(&self) -> bool {
        self.cpu_metric.enabled || self.memory_metric.enabled
    }
}

fn default_replicas() -> i32 {
    1
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CpuMetric {
    pub enabled: bool,
    #[serde(default)]
    pub metric_type: CpuMetricType,
    #[serde(default)]
    pub metric_value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum CpuMetricType {
    #[default]
    AverageUtilization,
    AverageValueMillicores,
    AverageValueCores,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MemoryMetric {
    pub enabled: bool,
    #[serde(default)]
    pub metric_type: MemoryMetricType,
    #[serde(default)]
    pub metric_value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum MemoryMetricType {
    #[default]
    AverageValueMebibyte,
    AverageValueGibibyte,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub enum DeploymentStrategy {
    #[default]
    RollingUpdate,
    Recreate,
}

impl DeploymentStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RollingUpdate => "RollingUpdate",
            Self::Recreate => "Recreate",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RollingUpdate {
    pub max_surge: u32,
    #[serde(default)]
    pub max_surge_type: SurgeType,
    pub max_unavailable: u32,
    #[serde(default)]
    pub max_unavailable_type: SurgeType,
}

/// Whether a surge value is an absolute pod count or a percentage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum SurgeType {
    #[default]
    Number,
    Percentage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StatefulSetConfig {
    pub desired_replicas: i32,
    #[serde(default)]
    pub strategy: StatefulSetStrategy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rolling_update_partition: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision_history_limit: Option<i32>,
    #[serde(default)]
    pub pod_management_policy: PodManagementPolicy,
    #[serde(default)]
    pub persistent_volume_claim_retention_policy: PvcRetentionPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub enum StatefulSetStrategy {
    #[default]
    RollingUpdate,
    OnDelete,
}

impl StatefulSetStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RollingUpdate => "RollingUpdate",
            Self::OnDelete => "OnDelete",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub enum PodManagementPolicy {
    #[default]
    OrderedReady,
    Parallel,
}

impl PodManagementPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OrderedReady => "OrderedReady",
            Self::Parallel => "Parallel",
        }
    }
}

/// What happens to stateful set claims when the set is deleted or scaled down
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PvcRetentionPolicy {
    #[serde(default)]
    pub when_deleted: RetentionPolicy,
    #[serde(default)]
    pub when_scaled: RetentionPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub enum RetentionPolicy {
    #[default]
    Retain,
    Delete,
}

impl RetentionPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Retain => "Retain",
            Self::Delete => "Delete",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CronJobConfig {
    pub schedule: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
    #[serde(default)]
    pub concurrency_policy: ConcurrencyPolicy,
    #[serde(default)]
    pub suspend: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub successful_jobs_history_limit: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_jobs_history_limit: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starting_deadline_seconds: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_limit: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_deadline_seconds: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub enum ConcurrencyPolicy {
    #[default]
    Allow,
    Forbid,
    Replace,
}

impl ConcurrencyPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allow => "Allow",
            Self::Forbid => "Forbid",
            Self::Replace => "Replace",
        }
    }
}
