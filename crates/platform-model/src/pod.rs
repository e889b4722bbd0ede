//! Pod-level settings: resources, restart policy, probes and variables.

use crate::units::{CpuUnit, MemoryUnit};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// CPU and memory requests/limits, each tagged with its unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PodConfig {
    pub cpu_request: f64,
    pub cpu_request_type: CpuUnit,
    pub cpu_limit: f64,
    pub cpu_limit_type: CpuUnit,
    pub memory_request: f64,
    pub memory_request_type: MemoryUnit,
    pub memory_limit: f64,
    pub memory_limit_type: MemoryUnit,
    #[serde(default)]
    pub restart_policy: RestartPolicy,
}

/// Pod restart policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub enum RestartPolicy {
    #[default]
    Always,
    OnFailure,
    Never,
}

impl RestartPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Always => "Always",
            Self::OnFailure => "OnFailure",
            Self::Never => "Never",
        }
    }
}

/// The three container probes. Absent and disabled probes are both left out
/// of the generated manifest.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Probes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub startup: Option<Probe>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readiness: Option<Probe>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub liveness: Option<Probe>,
}

/// A single probe definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Probe {
    pub enabled: bool,

    /// Exactly one of `exec`, `httpGet` or `tcpSocket`
    #[serde(flatten)]
    pub check: ProbeCheck,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_delay_seconds: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period_seconds: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_threshold: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_threshold: Option<i32>,
}

/// Probe handler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum ProbeCheck {
    Exec { command: Vec<String> },
    HttpGet { path: String, port: u16 },
    TcpSocket { port: u16 },
}

/// User supplied environment variable. Order is preserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct EnvVariable {
    pub name: String,
    pub value: String,
}
