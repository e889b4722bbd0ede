//! Common utilities for git provider API clients
//!
//! Provides the authenticated HTTP wrapper shared by all providers.

pub mod repository;

use crate::error::GitProviderError;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// User agent sent to every provider (GitHub rejects requests without one)
const KEEL_USER_AGENT: &str = "keel-container-reconciler";

/// HTTP client wrapper with bearer authentication
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    base_url: String,
    token: String,
}

impl HttpClient {
    /// Create a new HTTP client wrapper
    ///
    /// # Arguments
    /// * `base_url` - API base URL (e.g., "https://api.github.com")
    /// * `token` - Bearer token
    /// * `headers` - Provider specific default headers
    pub fn new(base_url: &str, token: &str, mut headers: HeaderMap) -> Result<Self, GitProviderError> {
        headers.insert(USER_AGENT, HeaderValue::from_static(KEEL_USER_AGENT));
        headers
            .entry(ACCEPT)
            .or_insert(HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .default_headers(headers)
            .build()
            .map_err(GitProviderError::Http)?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build a full URL from a path
    pub fn build_url(&self, path: &str) -> String {
        if path.starts_with("http") {
            path.to_string()
        } else {
            format!("{}{}", self.base_url, path)
        }
    }

    /// Get authorization header value
    pub fn auth_header(&self) -> String {
        format!("Bearer {}", self.token)
    }

    /// Make a POST request
    pub async fn post<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, GitProviderError> {
        let url = self.build_url(path);
        debug!("POST {}", url);

        let response = self.client
            .post(&url)
            .header("Authorization", self.auth_header())
            .json(body)
            .send()
            .await
            .map_err(GitProviderError::Http)?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(Self::status_error("POST", path, status, body_text));
        }

        let response_text = response.text().await?;
        serde_json::from_str(&response_text).map_err(|e| {
            GitProviderError::Api(format!(
                "error decoding response body: {} - Response (first 500 chars): {}",
                e,
                response_text.chars().take(500).collect::<String>()
            ))
        })
    }

    /// Make a DELETE request
    pub async fn delete(&self, path: &str) -> Result<(), GitProviderError> {
        let url = self.build_url(path);
        debug!("DELETE {}", url);

        let response = self.client
            .delete(&url)
            .header("Authorization", self.auth_header())
            .send()
            .await
            .map_err(GitProviderError::Http)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::status_error("DELETE", path, status, body));
        }

        Ok(())
    }

    fn status_error(method: &str, path: &str, status: StatusCode, body: String) -> GitProviderError {
        match status {
            StatusCode::NOT_FOUND => GitProviderError::NotFound(format!("{} {} - {}", method, path, body)),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                GitProviderError::Authentication(format!("{} {} failed: {} - {}", method, path, status, body))
            }
            _ => GitProviderError::Api(format!("{} {} failed: {} - {}", method, path, status, body)),
        }
    }
}
