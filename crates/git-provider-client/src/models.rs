//! Git provider API models
//!
//! Request and response bodies for the webhook endpoints of each provider.

use serde::{Deserialize, Serialize};

/// Provider independent webhook registration request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookRequest {
    /// Public URL of the pipeline event listener
    pub url: String,
    /// Shared secret the listener's interceptor verifies
    pub secret: String,
    /// Whether the provider should verify the listener's TLS certificate
    pub verify_ssl: bool,
    /// Branch the webhook is for (GitLab filters server side)
    pub branch: String,
}

/// GitHub `POST /repos/{owner}/{repo}/hooks` body
#[derive(Debug, Clone, Serialize)]
pub struct GitHubCreateHook {
    pub name: String,
    pub active: bool,
    pub events: Vec<String>,
    pub config: GitHubHookConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct GitHubHookConfig {
    pub url: String,
    pub content_type: String,
    pub secret: String,
    /// "0" verifies certificates, "1" skips verification
    pub insecure_ssl: String,
}

/// GitHub and GitLab hooks carry numeric ids
#[derive(Debug, Clone, Deserialize)]
pub struct NumericHook {
    pub id: u64,
}

/// GitLab `POST /projects/{id}/hooks` body
#[derive(Debug, Clone, Serialize)]
pub struct GitLabCreateHook {
    pub url: String,
    pub token: String,
    pub push_events: bool,
    pub push_events_branch_filter: String,
    pub enable_ssl_verification: bool,
}

/// Bitbucket `POST /repositories/{workspace}/{repo}/hooks` body
#[derive(Debug, Clone, Serialize)]
pub struct BitbucketCreateHook {
    pub description: String,
    pub url: String,
    pub active: bool,
    pub events: Vec<String>,
    pub skip_cert_verification: bool,
    pub secret: String,
}

/// Bitbucket hooks are identified by a braced UUID
#[derive(Debug, Clone, Deserialize)]
pub struct BitbucketHook {
    pub uuid: String,
}
