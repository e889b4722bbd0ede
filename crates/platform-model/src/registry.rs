//! Container image registries the pipeline pushes to.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Registry {
    pub iid: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub registry_type: RegistryType,
    /// Host (and optional port), e.g. `registry.example.com:5000`
    pub endpoint: String,
    /// Optional repository prefix placed between endpoint and image name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    /// Docker config secret mounted by the build step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push_secret: Option<String>,
    /// Image pull secret referenced by workloads
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_secret: Option<String>,
}

impl Registry {
    /// Image name (without tag) the pipeline builds for a container.
    pub fn image_name(&self, container_iid: &str) -> String {
        let endpoint = self.endpoint.trim_end_matches('/');
        match self.repository.as_deref().map(|r| r.trim_matches('/')) {
            Some(repository) if !repository.is_empty() => {
                format!("{}/{}/{}", endpoint, repository, container_iid)
            }
            _ => format!("{}/{}", endpoint, container_iid),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum RegistryType {
    Local,
    Generic,
    Ecr,
    Gcr,
    Acr,
    Quay,
    DockerHub,
}
