//! Repository URL parsing
//!
//! Webhook endpoints are addressed by repository path, which is recovered
//! from the clone URL stored on the container.

use crate::error::GitProviderError;

/// Extracts the repository path (`owner/repo`, or `group/sub/project` on
/// GitLab) from an HTTPS or SSH clone URL.
pub fn repository_path(repo_url: &str) -> Result<String, GitProviderError> {
    let trimmed = repo_url.trim().trim_end_matches('/');

    let path = if let Some(rest) = trimmed.split_once("://").map(|(_, rest)| rest) {
        // https://host[:port]/owner/repo
        rest.split_once('/').map(|(_, path)| path)
    } else if let Some((_, path)) = trimmed.split_once(':') {
        // git@host:owner/repo.git
        Some(path)
    } else {
        None
    };

    let path = path
        .map(|p| p.trim_matches('/').trim_end_matches(".git"))
        .filter(|p| p.contains('/') && !p.split('/').any(str::is_empty))
        .ok_or_else(|| GitProviderError::InvalidRequest(format!("Cannot parse repository URL '{}'", repo_url)))?;

    Ok(path.to_string())
}

/// Splits a repository path into `(owner, repo)`. GitHub and Bitbucket only
/// have two levels.
pub fn owner_and_repo(repo_url: &str) -> Result<(String, String), GitProviderError> {
    let path = repository_path(repo_url)?;
    match path.split_once('/') {
        Some((owner, repo)) if !repo.contains('/') => Ok((owner.to_string(), repo.to_string())),
        _ => Err(GitProviderError::InvalidRequest(format!(
            "Repository URL '{}' is not of the form <owner>/<repo>",
            repo_url
        ))),
    }
}
