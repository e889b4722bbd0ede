//! Where a container's image comes from: a connected git repository built
//! by the pipeline, or a prebuilt registry image.

use crate::git_provider::ProviderKind;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Image source. Serialized under `repo` or `registry`, never both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum ContainerSource {
    Repo(RepoConfig),
    Registry(RegistryImage),
}

impl ContainerSource {
    pub fn repo(&self) -> Option<&RepoConfig> {
        match self {
            Self::Repo(repo) => Some(repo),
            Self::Registry(_) => None,
        }
    }

    pub fn repo_mut(&mut self) -> Option<&mut RepoConfig> {
        match self {
            Self::Repo(repo) => Some(repo),
            Self::Registry(_) => None,
        }
    }

    pub fn registry_image(&self) -> Option<&str> {
        match self {
            Self::Repo(_) => None,
            Self::Registry(registry) => Some(&registry.image),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RepoConfig {
    pub connected: bool,
    pub provider: ProviderKind,
    /// Clone URL, e.g. `https://github.com/acme/api`
    pub url: String,
    pub branch: String,
    /// Build context inside the repository
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default = "default_dockerfile")]
    pub dockerfile: String,
    /// Only pushes touching this path trigger a build
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watch_path: Option<String>,
    /// Issued by the git provider when the webhook is registered
    #[serde(default, rename = "webHookId", skip_serializing_if = "Option::is_none")]
    pub webhook_id: Option<String>,
}

impl RepoConfig {
    /// The repo block with the provider-issued webhook id blanked, for
    /// comparisons that must ignore it.
    pub fn without_webhook(&self) -> Self {
        Self {
            webhook_id: None,
            ..self.clone()
        }
    }
}

fn default_path() -> String {
    "/".to_string()
}

fn default_dockerfile() -> String {
    "Dockerfile".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RegistryImage {
    pub image: String,
}
