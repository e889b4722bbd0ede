//! Network exposure settings.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Networking {
    /// Port the container listens on. Unused by cron jobs.
    #[serde(default)]
    pub container_port: u16,
    #[serde(default)]
    pub ingress: IngressConfig,
    #[serde(default)]
    pub custom_domain: CustomDomainConfig,
    #[serde(default)]
    pub tcp_proxy: TcpProxyConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IngressConfig {
    pub enabled: bool,
    #[serde(default, rename = "type")]
    pub ingress_type: IngressType,
}

/// Ingress strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum IngressType {
    /// Shared cluster host, routed by path prefix
    #[default]
    Path,
    /// One host per cluster domain: `<iid>.<domain>`
    Subdomain,
}

impl IngressType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Path => "path",
            Self::Subdomain => "subdomain",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CustomDomainConfig {
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TcpProxyConfig {
    pub enabled: bool,
    /// Allocated by the caller; unique cluster-wide
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_port: Option<u16>,
}
