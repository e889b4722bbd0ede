//! Integration tests for the git provider clients
//!
//! These tests talk to the real provider APIs and create webhooks on a
//! scratch repository. Set GITHUB_TOKEN and GITHUB_TEST_REPO to run.

use git_provider_client::{GitHubClient, GitProviderClient, WebhookRequest};

#[tokio::test]
#[ignore] // Requires a GitHub token and a scratch repository
async fn test_github_webhook_lifecycle() {
    let token = std::env::var("GITHUB_TOKEN").expect("GITHUB_TOKEN environment variable must be set");
    let repo = std::env::var("GITHUB_TEST_REPO").expect("GITHUB_TEST_REPO environment variable must be set");

    let client = GitHubClient::new(&token, None).expect("Failed to create client");
    let request = WebhookRequest {
        url: "https://example.com/tekton-integration".to_string(),
        secret: "integration-secret".to_string(),
        verify_ssl: true,
        branch: "main".to_string(),
    };

    let id = client
        .create_webhook(&repo, &request)
        .await
        .expect("Failed to create webhook");
    println!("Created webhook {}", id);

    client
        .delete_webhook(&repo, &id)
        .await
        .expect("Failed to delete webhook");
}

#[tokio::test]
#[ignore]
async fn test_github_delete_unknown_webhook() {
    let token = std::env::var("GITHUB_TOKEN").expect("GITHUB_TOKEN environment variable must be set");
    let repo = std::env::var("GITHUB_TEST_REPO").expect("GITHUB_TEST_REPO environment variable must be set");

    let client = GitHubClient::new(&token, None).expect("Failed to create client");
    let result = client.delete_webhook(&repo, "1").await;
    assert!(result.is_err(), "Deleting an unknown hook should fail");
}
