//! GitProviderClient trait
//!
//! Every provider difference the pipeline manager cares about sits behind
//! this trait: webhook creation, webhook deletion and the CEL expression
//! that restricts a trigger to one branch. Tests use the mock implementation.

use crate::error::GitProviderError;
use crate::models::WebhookRequest;
use platform_model::ProviderKind;

/// Trait for git provider webhook operations
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait GitProviderClient: Send + Sync {
    /// Which provider this client talks to
    fn provider(&self) -> ProviderKind;

    /// Register a push webhook on the repository and return its id
    async fn create_webhook(&self, repo_url: &str, request: &WebhookRequest) -> Result<String, GitProviderError>;

    /// Remove a previously registered webhook
    async fn delete_webhook(&self, repo_url: &str, webhook_id: &str) -> Result<(), GitProviderError>;

    /// CEL expression over the provider's push payload that matches `branch`
    fn branch_filter_expression(&self, branch: &str) -> String;
}

/// Escapes a value for use inside a single-quoted CEL string literal.
pub fn cel_string(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}
