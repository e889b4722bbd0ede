//! GitHub webhook client
//!
//! Uses the REST v3 hooks endpoints: `/repos/{owner}/{repo}/hooks`.

use crate::common::repository::owner_and_repo;
use crate::common::HttpClient;
use crate::error::GitProviderError;
use crate::models::{GitHubCreateHook, GitHubHookConfig, NumericHook, WebhookRequest};
use crate::provider_trait::{cel_string, GitProviderClient};
use platform_model::ProviderKind;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use tracing::{debug, info};

/// Public GitHub API
pub const GITHUB_API_URL: &str = "https://api.github.com";

/// GitHub API client
#[derive(Debug, Clone)]
pub struct GitHubClient {
    http: HttpClient,
}

impl GitHubClient {
    /// Create a new GitHub client
    ///
    /// # Arguments
    /// * `token` - OAuth or personal access token
    /// * `api_url` - Optional GitHub Enterprise API URL
    pub fn new(token: &str, api_url: Option<&str>) -> Result<Self, GitProviderError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert("X-GitHub-Api-Version", HeaderValue::from_static("2022-11-28"));

        Ok(Self {
            http: HttpClient::new(api_url.unwrap_or(GITHUB_API_URL), token, headers)?,
        })
    }

    /// Build the hook creation body
    pub fn hook_payload(request: &WebhookRequest) -> GitHubCreateHook {
        GitHubCreateHook {
            name: "web".to_string(),
            active: true,
            events: vec!["push".to_string()],
            config: GitHubHookConfig {
                url: request.url.clone(),
                content_type: "json".to_string(),
                secret: request.secret.clone(),
                insecure_ssl: if request.verify_ssl { "0" } else { "1" }.to_string(),
            },
        }
    }
}

/// `body.ref` carries the full ref name on push events
pub fn branch_filter(branch: &str) -> String {
    format!("body.ref == 'refs/heads/{}'", cel_string(branch))
}

#[async_trait::async_trait]
impl GitProviderClient for GitHubClient {
    fn provider(&self) -> ProviderKind {
        ProviderKind::GitHub
    }

    async fn create_webhook(&self, repo_url: &str, request: &WebhookRequest) -> Result<String, GitProviderError> {
        let (owner, repo) = owner_and_repo(repo_url)?;
        let body = serde_json::to_value(Self::hook_payload(request))?;
        debug!("Registering GitHub webhook on {}/{} for {}", owner, repo, request.url);

        let hook: NumericHook = self.http.post(&format!("/repos/{}/{}/hooks", owner, repo), &body).await?;
        info!("Created GitHub webhook {} on {}/{}", hook.id, owner, repo);
        Ok(hook.id.to_string())
    }

    async fn delete_webhook(&self, repo_url: &str, webhook_id: &str) -> Result<(), GitProviderError> {
        let (owner, repo) = owner_and_repo(repo_url)?;
        self.http
            .delete(&format!("/repos/{}/{}/hooks/{}", owner, repo, webhook_id))
            .await?;
        info!("Deleted GitHub webhook {} on {}/{}", webhook_id, owner, repo);
        Ok(())
    }

    fn branch_filter_expression(&self, branch: &str) -> String {
        branch_filter(branch)
    }
}
