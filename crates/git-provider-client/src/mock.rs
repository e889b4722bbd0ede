//! Mock git provider clients for unit testing
//!
//! Webhooks are kept in memory so tests can assert that a pipeline create
//! registered exactly one hook and that delete removed it again.

use crate::error::GitProviderError;
use crate::factory::GitProviderFactory;
use crate::models::WebhookRequest;
use crate::provider_trait::GitProviderClient;
use crate::{bitbucket, github, gitlab};
use platform_model::{GitProvider, ProviderKind};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// A webhook registered through the mock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredHook {
    pub repo_url: String,
    pub request: WebhookRequest,
}

#[derive(Debug, Default)]
struct MockState {
    hooks: HashMap<String, RegisteredHook>,
    deleted: Vec<String>,
    next_id: u64,
    fail_create: bool,
    fail_delete: bool,
}

/// Mock client for any provider
///
/// Clones share state, so a clone handed to the factory stays observable.
#[derive(Debug, Clone)]
pub struct MockGitProviderClient {
    provider: ProviderKind,
    state: Arc<Mutex<MockState>>,
}

impl Default for MockGitProviderClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGitProviderClient {
    /// Create a new mock (GitHub flavoured)
    pub fn new() -> Self {
        Self::with_provider(ProviderKind::GitHub)
    }

    pub fn with_provider(provider: ProviderKind) -> Self {
        Self {
            provider,
            state: Arc::new(Mutex::new(MockState {
                next_id: 1,
                ..MockState::default()
            })),
        }
    }

    /// Same state, different provider flavour
    pub fn as_provider(&self, provider: ProviderKind) -> Self {
        Self {
            provider,
            state: self.state.clone(),
        }
    }

    /// Make subsequent `create_webhook` calls fail
    pub fn set_fail_create(&self, fail: bool) {
        self.state.lock().unwrap().fail_create = fail;
    }

    /// Make subsequent `delete_webhook` calls fail
    pub fn set_fail_delete(&self, fail: bool) {
        self.state.lock().unwrap().fail_delete = fail;
    }

    /// Currently registered hooks keyed by id
    pub fn hooks(&self) -> HashMap<String, RegisteredHook> {
        self.state.lock().unwrap().hooks.clone()
    }

    /// Ids passed to `delete_webhook`, in call order
    pub fn deleted(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted.clone()
    }
}

#[async_trait::async_trait]
impl GitProviderClient for MockGitProviderClient {
    fn provider(&self) -> ProviderKind {
        self.provider
    }

    async fn create_webhook(&self, repo_url: &str, request: &WebhookRequest) -> Result<String, GitProviderError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_create {
            return Err(GitProviderError::Api("mock webhook creation failure".to_string()));
        }
        let id = state.next_id.to_string();
        state.next_id += 1;
        state.hooks.insert(
            id.clone(),
            RegisteredHook {
                repo_url: repo_url.to_string(),
                request: request.clone(),
            },
        );
        Ok(id)
    }

    async fn delete_webhook(&self, _repo_url: &str, webhook_id: &str) -> Result<(), GitProviderError> {
        let mut state = self.state.lock().unwrap();
        state.deleted.push(webhook_id.to_string());
        if state.fail_delete {
            return Err(GitProviderError::Api("mock webhook deletion failure".to_string()));
        }
        state
            .hooks
            .remove(webhook_id)
            .map(|_| ())
            .ok_or_else(|| GitProviderError::NotFound(format!("webhook {}", webhook_id)))
    }

    fn branch_filter_expression(&self, branch: &str) -> String {
        match self.provider {
            ProviderKind::GitHub => github::branch_filter(branch),
            ProviderKind::GitLab => gitlab::branch_filter(branch),
            ProviderKind::Bitbucket => bitbucket::branch_filter(branch),
        }
    }
}

/// Factory handing out mocks that share one state
#[derive(Debug, Clone, Default)]
pub struct MockProviderFactory {
    pub client: MockGitProviderClient,
}

impl GitProviderFactory for MockProviderFactory {
    fn client_for(&self, provider: &GitProvider) -> Result<Arc<dyn GitProviderClient>, GitProviderError> {
        Ok(Arc::new(self.client.as_provider(provider.provider)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> WebhookRequest {
        WebhookRequest {
            url: "https://apps.example.com/tekton-web".to_string(),
            secret: "secret".to_string(),
            verify_ssl: true,
            branch: "main".to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_then_delete() {
        let mock = MockGitProviderClient::new();
        let id = mock.create_webhook("https://github.com/acme/web", &request()).await.unwrap();
        assert_eq!(mock.hooks().len(), 1);

        mock.delete_webhook("https://github.com/acme/web", &id).await.unwrap();
        assert!(mock.hooks().is_empty());
        assert_eq!(mock.deleted(), vec![id.clone()]);

        let again = mock.delete_webhook("https://github.com/acme/web", &id).await;
        assert!(matches!(again, Err(GitProviderError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_factory_shares_state() {
        let factory = MockProviderFactory::default();
        let record = GitProvider {
            iid: "gp".to_string(),
            provider: ProviderKind::GitLab,
            access_token: "t".to_string(),
            username: None,
            api_url: None,
        };
        let client = factory.client_for(&record).unwrap();
        assert_eq!(client.provider(), ProviderKind::GitLab);
        client.create_webhook("https://gitlab.com/acme/web", &request()).await.unwrap();
        assert_eq!(factory.client.hooks().len(), 1);
    }

    #[tokio::test]
    async fn test_fail_create() {
        let mock = MockGitProviderClient::new();
        mock.set_fail_create(true);
        assert!(mock.create_webhook("https://github.com/acme/web", &request()).await.is_err());
        assert!(mock.hooks().is_empty());
    }
}
