//! Bitbucket Cloud webhook client
//!
//! Uses the 2.0 repository hooks endpoints. Hook ids are braced UUIDs and
//! have to be URL-encoded when addressed.

use crate::common::repository::owner_and_repo;
use crate::common::HttpClient;
use crate::error::GitProviderError;
use crate::models::{BitbucketCreateHook, BitbucketHook, WebhookRequest};
use crate::provider_trait::{cel_string, GitProviderClient};
use platform_model::ProviderKind;
use reqwest::header::HeaderMap;
use tracing::{debug, info};

/// Public Bitbucket API
pub const BITBUCKET_API_URL: &str = "https://api.bitbucket.org/2.0";

/// Bitbucket API client
#[derive(Debug, Clone)]
pub struct BitbucketClient {
    http: HttpClient,
}

impl BitbucketClient {
    /// Create a new Bitbucket client
    ///
    /// # Arguments
    /// * `token` - OAuth access token
    /// * `api_url` - Optional API URL override
    pub fn new(token: &str, api_url: Option<&str>) -> Result<Self, GitProviderError> {
        Ok(Self {
            http: HttpClient::new(api_url.unwrap_or(BITBUCKET_API_URL), token, HeaderMap::new())?,
        })
    }

    pub fn hook_payload(request: &WebhookRequest) -> BitbucketCreateHook {
        BitbucketCreateHook {
            description: "Keel build trigger".to_string(),
            url: request.url.clone(),
            active: true,
            events: vec!["repo:push".to_string()],
            skip_cert_verification: !request.verify_ssl,
            secret: request.secret.clone(),
        }
    }
}

/// Bitbucket puts the pushed branch under `push.changes[].new.name`
pub fn branch_filter(branch: &str) -> String {
    format!("body.push.changes[0].new.name == '{}'", cel_string(branch))
}

#[async_trait::async_trait]
impl GitProviderClient for BitbucketClient {
    fn provider(&self) -> ProviderKind {
        ProviderKind::Bitbucket
    }

    async fn create_webhook(&self, repo_url: &str, request: &WebhookRequest) -> Result<String, GitProviderError> {
        let (workspace, repo) = owner_and_repo(repo_url)?;
        let body = serde_json::to_value(Self::hook_payload(request))?;
        debug!("Registering Bitbucket webhook on {}/{} for {}", workspace, repo, request.url);

        let hook: BitbucketHook = self
            .http
            .post(&format!("/repositories/{}/{}/hooks", workspace, repo), &body)
            .await?;
        info!("Created Bitbucket webhook {} on {}/{}", hook.uuid, workspace, repo);
        Ok(hook.uuid)
    }

    async fn delete_webhook(&self, repo_url: &str, webhook_id: &str) -> Result<(), GitProviderError> {
        let (workspace, repo) = owner_and_repo(repo_url)?;
        self.http
            .delete(&format!(
                "/repositories/{}/{}/hooks/{}",
                workspace,
                repo,
                urlencoding::encode(webhook_id)
            ))
            .await?;
        info!("Deleted Bitbucket webhook {} on {}/{}", webhook_id, workspace, repo);
        Ok(())
    }

    fn branch_filter_expression(&self, branch: &str) -> String {
        branch_filter(branch)
    }
}
