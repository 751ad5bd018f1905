//! Git operations on the sandbox workspace.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

use super::github::{open_pull_request, PullRequest};
use super::{parse_github_remote, FileError, FileMediator};

/// Parsed `git status --porcelain -b`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitStatus {
    /// Current branch, or `HEAD` when detached.
    pub branch: String,
    /// Tracked files changed in the working tree.
    pub modified: Vec<String>,
    /// Files with staged changes.
    pub staged: Vec<String>,
    /// Files git does not track.
    pub untracked: Vec<String>,
    /// True when any list is non-empty.
    pub has_changes: bool,
}

impl GitStatus {
    /// Parse porcelain v1 output with a `## ` branch header.
    ///
    /// `??` entries are untracked only. Otherwise the index column marks a
    /// staged path (M, A, D, R) and the worktree column a modified one (M, D);
    /// a path may be both.
    pub fn parse(output: &str) -> Self {
        let mut status = Self {
            branch: "main".to_string(),
            ..Self::default()
        };

        for line in output.lines() {
            if let Some(header) = line.strip_prefix("## ") {
                status.branch = parse_branch(header);
                continue;
            }

            let mut chars = line.chars();
            let (Some(index), Some(worktree), Some(' ')) = (chars.next(), chars.next(), chars.next())
            else {
                continue;
            };
            let path = unquote(chars.as_str());
            if path.is_empty() {
                continue;
            }
            // Renames list "old -> new"
            let path = path.rsplit(" -> ").next().unwrap_or(&path).to_string();

            if index == '?' && worktree == '?' {
                status.untracked.push(path);
                continue;
            }
            if matches!(index, 'M' | 'A' | 'D' | 'R') {
                status.staged.push(path.clone());
            }
            if matches!(worktree, 'M' | 'D') {
                status.modified.push(path);
            }
        }

        status.has_changes =
            !(status.modified.is_empty() && status.staged.is_empty() && status.untracked.is_empty());
        status
    }
}

fn parse_branch(header: &str) -> String {
    let header = header
        .strip_prefix("No commits yet on ")
        .or_else(|| header.strip_prefix("Initial commit on "))
        .unwrap_or(header);
    let branch = header.split("...").next().unwrap_or(header);
    let branch = branch.split(' ').next().unwrap_or(branch);
    branch.trim().to_string()
}

fn unquote(path: &str) -> String {
    path.strip_prefix('"')
        .and_then(|p| p.strip_suffix('"'))
        .unwrap_or(path)
        .to_string()
}

impl FileMediator {
    fn identity_args(&self) -> [String; 4] {
        [
            "-c".to_string(),
            format!("user.name={}", self.git.author_name),
            "-c".to_string(),
            format!("user.email={}", self.git.author_email),
        ]
    }

    /// Branch and file status of the workspace repository.
    pub async fn git_status(&self, container_id: &str) -> Result<GitStatus, FileError> {
        let result = self
            .exec_checked(
                container_id,
                "git status",
                &["git", "status", "--porcelain", "-b", "--untracked-files=all"],
            )
            .await?;
        Ok(GitStatus::parse(&result.stdout))
    }

    /// Unstaged diff of the workspace, or of one path.
    pub async fn git_diff(&self, container_id: &str, path: Option<&str>) -> Result<String, FileError> {
        let target = path.map(|p| self.resolve(p)).transpose()?;
        let arg = target.as_ref().map(super::WorkspacePath::arg);

        let mut argv = vec!["git", "diff"];
        if let Some(arg) = arg.as_deref() {
            argv.extend(["--", arg]);
        }
        let result = self.exec_checked(container_id, "git diff", &argv).await?;
        Ok(result.stdout)
    }

    /// Create a branch and switch to it.
    pub async fn create_branch(&self, container_id: &str, name: &str) -> Result<(), FileError> {
        self.exec_checked(container_id, "Create branch", &["git", "checkout", "-b", name])
            .await?;
        info!("Created branch {}", name);
        Ok(())
    }

    /// Stage everything, commit, and push to origin. Returns the commit SHA.
    ///
    /// A failed push (no remote, rejected) is logged and the commit is kept.
    pub async fn commit_and_push(&self, container_id: &str, message: &str) -> Result<String, FileError> {
        self.exec_checked(container_id, "git add", &["git", "add", "-A"])
            .await?;

        let identity = self.identity_args();
        let mut argv: Vec<&str> = vec!["git"];
        argv.extend(identity.iter().map(String::as_str));
        argv.extend(["commit", "-m", message]);
        self.exec_checked(container_id, "git commit", &argv).await?;

        let sha = self
            .exec_checked(container_id, "git rev-parse", &["git", "rev-parse", "HEAD"])
            .await?
            .stdout
            .trim()
            .to_string();

        let timeout = Duration::from_secs(self.git.push_timeout_secs);
        let push = self
            .exec_with_timeout(container_id, &["git", "push", "origin", "HEAD"], timeout)
            .await?;
        if push.success() {
            info!("Pushed {}", sha);
        } else {
            warn!("git push failed (no remote?): {}", push.error_output());
        }

        Ok(sha)
    }

    /// Open a GitHub pull request from the current branch into `base`.
    pub async fn create_pull_request(
        &self,
        container_id: &str,
        title: &str,
        body: &str,
        base: &str,
    ) -> Result<String, FileError> {
        let branch = self
            .exec_checked(
                container_id,
                "Get current branch",
                &["git", "rev-parse", "--abbrev-ref", "HEAD"],
            )
            .await?
            .stdout
            .trim()
            .to_string();

        let remote = self
            .exec(container_id, &["git", "config", "--get", "remote.origin.url"])
            .await?;
        if !remote.success() {
            return Err(FileError::pull_request_unsupported(
                "No remote.origin.url; push the repository first",
            ));
        }

        let repo = parse_github_remote(&remote.stdout)
            .ok_or_else(|| FileError::pull_request_unsupported("Only GitHub remotes are supported"))?;

        let token = self.git.resolve_token().ok_or_else(|| {
            FileError::pull_request_unsupported("GitHub token required (set GITHUB_TOKEN)")
        })?;

        let request = PullRequest {
            title,
            body,
            head: &branch,
            base,
        };
        let url = open_pull_request(&self.http, &self.git.github_api_url, &token, &repo, &request)
            .await?;
        info!("Pull request created: {}", url);
        Ok(url)
    }
}
