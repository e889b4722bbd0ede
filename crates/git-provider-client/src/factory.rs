//! Provider client construction
//!
//! The pipeline manager receives a `GitProvider` record and needs a client
//! for it. Going through a factory lets tests swap in the mock.

use crate::bitbucket::BitbucketClient;
use crate::error::GitProviderError;
use crate::github::GitHubClient;
use crate::gitlab::GitLabClient;
use crate::provider_trait::GitProviderClient;
use platform_model::{GitProvider, ProviderKind};
use std::sync::Arc;

/// Builds a webhook client for a git provider record
pub trait GitProviderFactory: Send + Sync {
    fn client_for(&self, provider: &GitProvider) -> Result<Arc<dyn GitProviderClient>, GitProviderError>;
}

/// Factory producing real HTTP clients
#[derive(Debug, Clone, Default)]
pub struct HttpProviderFactory;

impl GitProviderFactory for HttpProviderFactory {
    fn client_for(&self, provider: &GitProvider) -> Result<Arc<dyn GitProviderClient>, GitProviderError> {
        if provider.access_token.is_empty() {
            return Err(GitProviderError::Authentication(format!(
                "git provider {} has no access token",
                provider.iid
            )));
        }

        let token = provider.access_token.as_str();
        let api_url = provider.api_url.as_deref();
        Ok(match provider.provider {
            ProviderKind::GitHub => Arc::new(GitHubClient::new(token, api_url)?),
            ProviderKind::GitLab => Arc::new(GitLabClient::new(token, api_url)?),
            ProviderKind::Bitbucket => Arc::new(BitbucketClient::new(token, api_url)?),
        })
    }
}
