//! GitHub remote parsing and pull request creation.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::FileError;

/// Owner and repository name of a GitHub remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitHubRepo {
    /// Account or organization.
    pub owner: String,
    /// Repository name.
    pub name: String,
}

/// Extract owner/repo from an https or ssh GitHub remote URL.
///
/// Accepts `https://github.com/o/r(.git)`, credentials in the authority,
/// `git@github.com:o/r.git` and `ssh://git@github.com/o/r.git`.
pub fn parse_github_remote(url: &str) -> Option<GitHubRepo> {
    let url = url.trim().trim_end_matches('/');
    let url = url.strip_suffix(".git").unwrap_or(url);

    let (_, rest) = url.split_once("github.com")?;
    let rest = rest.strip_prefix(':').or_else(|| rest.strip_prefix('/'))?;

    let mut parts = rest.split('/');
    let owner = parts.next().filter(|s| !s.is_empty())?;
    let name = parts.next().filter(|s| !s.is_empty())?;
    if parts.next().is_some() {
        return None;
    }

    Some(GitHubRepo {
        owner: owner.to_string(),
        name: name.to_string(),
    })
}

#[derive(Debug, Serialize)]
pub(crate) struct PullRequest<'a> {
    pub title: &'a str,
    pub body: &'a str,
    pub head: &'a str,
    pub base: &'a str,
}

#[derive(Debug, Deserialize)]
struct PullRequestResponse {
    #[serde(default)]
    html_url: String,
}

/// Open a pull request and return its web URL.
pub(crate) async fn open_pull_request(
    http: &reqwest::Client,
    api_url: &str,
    token: &str,
    repo: &GitHubRepo,
    request: &PullRequest<'_>,
) -> Result<String, FileError> {
    let url = format!(
        "{}/repos/{}/{}/pulls",
        api_url.trim_end_matches('/'),
        repo.owner,
        repo.name
    );
    debug!("Creating pull request on {}/{}", repo.owner, repo.name);

    let response = http
        .post(&url)
        .bearer_auth(token)
        .header(reqwest::header::ACCEPT, "application/vnd.github.v3+json")
        .header(
            reqwest::header::USER_AGENT,
            concat!("workcell/", env!("CARGO_PKG_VERSION")),
        )
        .json(request)
        .send()
        .await
        .map_err(|e| FileError::github_api(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(FileError::github_api(format!("{status}: {body}")));
    }

    let created: PullRequestResponse = response
        .json()
        .await
        .map_err(|e| FileError::github_api(e.to_string()))?;
    Ok(created.html_url)
}
