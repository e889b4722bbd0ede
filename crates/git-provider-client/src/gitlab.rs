//! GitLab webhook client
//!
//! Uses the v4 project hooks endpoints. Projects are addressed by their
//! URL-encoded full path so nested groups work.

use crate::common::repository::repository_path;
use crate::common::HttpClient;
use crate::error::GitProviderError;
use crate::models::{GitLabCreateHook, NumericHook, WebhookRequest};
use crate::provider_trait::{cel_string, GitProviderClient};
use platform_model::ProviderKind;
use reqwest::header::HeaderMap;
use tracing::{debug, info};

/// Public GitLab API
pub const GITLAB_API_URL: &str = "https://gitlab.com/api/v4";

/// GitLab API client
#[derive(Debug, Clone)]
pub struct GitLabClient {
    http: HttpClient,
}

impl GitLabClient {
    /// Create a new GitLab client
    ///
    /// # Arguments
    /// * `token` - OAuth or personal access token
    /// * `api_url` - Optional self-hosted API URL (including `/api/v4`)
    pub fn new(token: &str, api_url: Option<&str>) -> Result<Self, GitProviderError> {
        Ok(Self {
            http: HttpClient::new(api_url.unwrap_or(GITLAB_API_URL), token, HeaderMap::new())?,
        })
    }

    pub fn hook_payload(request: &WebhookRequest) -> GitLabCreateHook {
        GitLabCreateHook {
            url: request.url.clone(),
            token: request.secret.clone(),
            push_events: true,
            push_events_branch_filter: request.branch.clone(),
            enable_ssl_verification: request.verify_ssl,
        }
    }

    fn project_path(repo_url: &str) -> Result<String, GitProviderError> {
        Ok(format!("/projects/{}", urlencoding::encode(&repository_path(repo_url)?)))
    }
}

/// GitLab push events carry the full ref name, like GitHub
pub fn branch_filter(branch: &str) -> String {
    format!("body.ref == 'refs/heads/{}'", cel_string(branch))
}

#[async_trait::async_trait]
impl GitProviderClient for GitLabClient {
    fn provider(&self) -> ProviderKind {
        ProviderKind::GitLab
    }

    async fn create_webhook(&self, repo_url: &str, request: &WebhookRequest) -> Result<String, GitProviderError> {
        let project = Self::project_path(repo_url)?;
        let body = serde_json::to_value(Self::hook_payload(request))?;
        debug!("Registering GitLab webhook on {} for {}", project, request.url);

        let hook: NumericHook = self.http.post(&format!("{}/hooks", project), &body).await?;
        info!("Created GitLab webhook {} on {}", hook.id, project);
        Ok(hook.id.to_string())
    }

    async fn delete_webhook(&self, repo_url: &str, webhook_id: &str) -> Result<(), GitProviderError> {
        let project = Self::project_path(repo_url)?;
        self.http.delete(&format!("{}/hooks/{}", project, webhook_id)).await?;
        info!("Deleted GitLab webhook {} on {}", webhook_id, project);
        Ok(())
    }

    fn branch_filter_expression(&self, branch: &str) -> String {
        branch_filter(branch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_path_is_encoded() {
        assert_eq!(
            GitLabClient::project_path("https://gitlab.com/group/sub/project.git").unwrap(),
            "/projects/group%2Fsub%2Fproject"
        );
    }

    #[test]
    fn test_hook_payload_filters_branch() {
        let request = WebhookRequest {
            url: "http://10.0.0.1/tekton-ab12cd".to_string(),
            secret: "token".to_string(),
            verify_ssl: false,
            branch: "release".to_string(),
        };
        let body = serde_json::to_value(GitLabClient::hook_payload(&request)).unwrap();
        assert_eq!(body["push_events_branch_filter"], "release");
        assert_eq!(body["enable_ssl_verification"], false);
        assert_eq!(body["token"], "token");
    }
}
