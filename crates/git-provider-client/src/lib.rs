//! Git provider webhook clients
//!
//! Registers and removes the push webhooks that drive container builds on
//! GitHub, GitLab and Bitbucket. Each provider also knows the CEL expression
//! that narrows a trigger to a single branch.
//!
//! # Example
//!
//! ```no_run
//! use git_provider_client::{GitHubClient, GitProviderClient, WebhookRequest};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = GitHubClient::new("ghp_token", None)?;
//! let request = WebhookRequest {
//!     url: "https://apps.example.com/tekton-web".to_string(),
//!     secret: "shared-secret".to_string(),
//!     verify_ssl: true,
//!     branch: "main".to_string(),
//! };
//! let id = client.create_webhook("https://github.com/acme/web", &request).await?;
//! client.delete_webhook("https://github.com/acme/web", &id).await?;
//! # Ok(())
//! # }
//! ```

pub mod bitbucket;
pub mod common;
pub mod error;
pub mod factory;
pub mod github;
pub mod gitlab;
pub mod models;
#[path = "trait.rs"]
pub mod provider_trait;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use bitbucket::BitbucketClient;
pub use common::HttpClient;
pub use error::GitProviderError;
pub use factory::{GitProviderFactory, HttpProviderFactory};
pub use github::GitHubClient;
pub use gitlab::GitLabClient;
pub use models::WebhookRequest;
pub use provider_trait::GitProviderClient;
#[cfg(any(test, feature = "test-util"))]
pub use mock::{MockGitProviderClient, MockProviderFactory};
