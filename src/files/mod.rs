//! File and git access inside a sandbox.
//!
//! Every operation resolves its path arguments against the workspace root
//! before any command runs, then drives plain commands (`find`, `stat`,
//! `base64`, `grep`, `git`) through the sandbox manager. Commands run with the
//! workspace root as working directory and receive paths as separate argv
//! entries, never inside a shell string.

mod error;
mod git;
mod github;
mod path;

pub use error::FileError;
pub use git::GitStatus;
pub use github::{parse_github_remote, GitHubRepo};
pub use path::WorkspacePath;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{FilesConfig, GitConfig};
use crate::sandbox::{ExecResult, SandboxManager};

/// Base64 characters per write command. A multiple of 4, well below the
/// kernel's per-argument limit.
const WRITE_CHUNK: usize = 64 * 1024;

/// Shell snippets for writes. Content and path arrive as `$1` and `$2`.
const WRITE_TRUNCATE: &str = r#"printf %s "$1" | base64 -d > "$2""#;
const WRITE_APPEND: &str = r#"printf %s "$1" | base64 -d >> "$2""#;

/// One directory entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Final path component.
    pub name: String,
    /// Workspace-relative path.
    pub path: String,
    /// True for directories.
    pub is_directory: bool,
    /// Size in bytes, files only.
    pub size: Option<u64>,
}

/// Text content of a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileContent {
    /// Workspace-relative path.
    pub path: String,
    /// File text.
    pub content: String,
    /// Size in bytes.
    pub size: u64,
    /// Number of lines.
    pub lines: usize,
}

/// One line matched by a content search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchMatch {
    /// Workspace-relative path of the file.
    pub path: String,
    /// 1-based line number.
    pub line_number: u64,
    /// The matching line.
    pub content: String,
}

/// File and git operations confined to a sandbox workspace.
pub struct FileMediator {
    sandbox: Arc<SandboxManager>,
    files: FilesConfig,
    git: GitConfig,
    http: reqwest::Client,
}

impl FileMediator {
    /// Mediator over `sandbox`, with file limits and git settings.
    pub fn new(sandbox: Arc<SandboxManager>, files: FilesConfig, git: GitConfig) -> Self {
        Self {
            sandbox,
            files,
            git,
            http: reqwest::Client::new(),
        }
    }

    /// The lifecycle manager commands run through.
    pub fn sandbox(&self) -> &Arc<SandboxManager> {
        &self.sandbox
    }

    /// Resolve `path` against this sandbox's workspace root.
    pub fn resolve(&self, path: &str) -> Result<WorkspacePath, FileError> {
        WorkspacePath::resolve(self.sandbox.workspace_root(), path)
    }

    async fn exec(&self, container_id: &str, argv: &[&str]) -> Result<ExecResult, FileError> {
        self.exec_with_timeout(container_id, argv, self.sandbox.default_exec_timeout())
            .await
    }

    async fn exec_with_timeout(
        &self,
        container_id: &str,
        argv: &[&str],
        timeout: Duration,
    ) -> Result<ExecResult, FileError> {
        let argv: Vec<String> = argv.iter().map(|s| (*s).to_string()).collect();
        Ok(self
            .sandbox
            .exec_command(container_id, &argv, timeout, None)
            .await?)
    }

    /// Run a command and fail with `CommandFailed` on a non-zero exit.
    async fn exec_checked(
        &self,
        container_id: &str,
        action: &str,
        argv: &[&str],
    ) -> Result<ExecResult, FileError> {
        let result = self.exec(container_id, argv).await?;
        if result.success() {
            Ok(result)
        } else {
            Err(FileError::command_failed(action, result.error_output()))
        }
    }

    /// List the entries under `path`, skipping `.git`.
    pub async fn list_files(
        &self,
        container_id: &str,
        path: &str,
        recursive: bool,
    ) -> Result<Vec<FileEntry>, FileError> {
        let dir = self.resolve(path)?;
        let start = dir.arg();

        let mut argv = vec!["find", start.as_str(), "-mindepth", "1"];
        if !recursive {
            argv.extend(["-maxdepth", "1"]);
        }
        argv.extend(["-name", ".git", "-prune", "-o", "-printf", "%y|%s|%P\\n"]);

        let result = self.exec(container_id, &argv).await?;
        if !result.success() {
            return Err(not_found_or_failed(&dir, "list", &result));
        }
        Ok(parse_find_output(&result.stdout, &dir))
    }

    /// Read a UTF-8 text file of at most `max_file_size` bytes.
    pub async fn read_file(&self, container_id: &str, path: &str) -> Result<FileContent, FileError> {
        let file = self.resolve(path)?;
        let arg = file.arg();

        let stat = self
            .exec(container_id, &["stat", "-L", "-c", "%s|%F", &arg])
            .await?;
        if !stat.success() {
            return Err(FileError::file_not_found(file.relative()));
        }
        let (size, kind) = parse_stat(&stat.stdout)
            .ok_or_else(|| FileError::command_failed("stat", stat.stdout.trim()))?;
        if kind == "directory" {
            return Err(FileError::command_failed(
                "read",
                format!("{} is a directory", file.relative()),
            ));
        }

        let max = self.files.max_file_size;
        if size > max {
            return Err(FileError::FileTooLarge { size, max });
        }

        let encoded = self
            .exec_checked(container_id, "read", &["base64", "-w", "0", &arg])
            .await?;
        let bytes = BASE64
            .decode(encoded.stdout.trim())
            .map_err(|e| FileError::command_failed("read", e.to_string()))?;

        let content = decode_text(bytes).ok_or_else(|| FileError::binary_file(file.relative()))?;
        let lines = count_lines(&content);

        Ok(FileContent {
            path: file.relative(),
            size: content.len() as u64,
            content,
            lines,
        })
    }

    /// Create or overwrite a file, creating parent directories.
    pub async fn write_file(
        &self,
        container_id: &str,
        path: &str,
        content: &str,
    ) -> Result<(), FileError> {
        let file = self.resolve(path)?;
        if file.is_root() {
            return Err(FileError::command_failed(
                "write",
                "cannot write to the workspace root",
            ));
        }

        let size = content.len() as u64;
        let max = self.files.max_file_size;
        if size > max {
            return Err(FileError::FileTooLarge { size, max });
        }

        if let Some(parent) = file.parent().filter(|p| !p.is_root()) {
            self.exec_checked(container_id, "mkdir", &["mkdir", "-p", &parent.arg()])
                .await?;
        }

        let encoded = BASE64.encode(content.as_bytes());
        let arg = file.arg();
        for (index, chunk) in base64_chunks(&encoded).enumerate() {
            let script = if index == 0 { WRITE_TRUNCATE } else { WRITE_APPEND };
            self.exec_checked(container_id, "write", &["sh", "-c", script, "sh", chunk, &arg])
                .await?;
        }

        info!("File written: {} ({} bytes)", file.relative(), size);
        Ok(())
    }

    /// Create a directory and any missing parents.
    pub async fn create_directory(&self, container_id: &str, path: &str) -> Result<(), FileError> {
        let dir = self.resolve(path)?;
        self.exec_checked(container_id, "mkdir", &["mkdir", "-p", &dir.arg()])
            .await?;
        Ok(())
    }

    /// Delete a file or directory tree. The workspace root itself is refused.
    pub async fn delete_file(&self, container_id: &str, path: &str) -> Result<(), FileError> {
        let target = self.resolve(path)?;
        if target.is_root() {
            return Err(FileError::RootDeletion);
        }
        self.exec_checked(container_id, "delete", &["rm", "-rf", &target.arg()])
            .await?;
        info!("Deleted: {}", target.relative());
        Ok(())
    }

    /// Extended-regex content search, skipping binary files and `.git`.
    pub async fn search_files(
        &self,
        container_id: &str,
        query: &str,
        glob: Option<&str>,
    ) -> Result<Vec<SearchMatch>, FileError> {
        let argv = search_argv(query, glob, self.files.max_search_matches);
        let argv: Vec<&str> = argv.iter().map(String::as_str).collect();

        let timeout = Duration::from_secs(self.files.search_timeout_secs);
        let result = self.exec_with_timeout(container_id, &argv, timeout).await?;

        if result.is_timeout() {
            warn!("Search for {:?} timed out", query);
        } else if result.exit_code > 1 && result.stdout.is_empty() {
            return Err(FileError::command_failed("search", result.error_output()));
        }

        let matches = parse_grep_output(&result.stdout, self.files.max_search_matches);
        debug!("Search {:?}: {} matches", query, matches.len());
        Ok(matches)
    }
}

/// `grep` invocation stopping after `max` matches per file.
fn search_argv(query: &str, glob: Option<&str>, max: usize) -> Vec<String> {
    let mut argv: Vec<String> = ["grep", "-rnIE", "-Z", "--exclude-dir=.git"]
        .into_iter()
        .map(String::from)
        .collect();
    argv.push(format!("--max-count={max}"));
    if let Some(glob) = glob {
        argv.push(format!("--include={glob}"));
    }
    argv.extend(["-e".to_string(), query.to_string(), "--".to_string(), ".".to_string()]);
    argv
}

fn not_found_or_failed(path: &WorkspacePath, action: &str, result: &ExecResult) -> FileError {
    if result.stderr.contains("No such file or directory") {
        FileError::file_not_found(path.relative())
    } else {
        FileError::command_failed(action, result.error_output())
    }
}

/// Parse `find -printf '%y|%s|%P\n'` lines below `dir` into sorted entries.
fn parse_find_output(output: &str, dir: &WorkspacePath) -> Vec<FileEntry> {
    let mut entries: Vec<FileEntry> = output
        .lines()
        .filter_map(|line| {
            let mut parts = line.splitn(3, '|');
            let kind = parts.next()?;
            let size = parts.next()?;
            let rel = parts.next().filter(|p| !p.is_empty())?;

            let path = if dir.is_root() {
                rel.to_string()
            } else {
                format!("{}/{}", dir.relative(), rel)
            };
            let is_directory = kind == "d";
            Some(FileEntry {
                name: rel.rsplit('/').next().unwrap_or(rel).to_string(),
                path,
                is_directory,
                size: if kind == "f" { size.parse().ok() } else { None },
            })
        })
        .collect();

    entries.sort_by(|a, b| {
        b.is_directory
            .cmp(&a.is_directory)
            .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
    });
    entries
}

/// Parse `stat -c '%s|%F'` output into size and file type.
fn parse_stat(output: &str) -> Option<(u64, &str)> {
    let (size, kind) = output.trim().split_once('|')?;
    Some((size.parse().ok()?, kind))
}

/// Text content, or `None` when the bytes look binary.
fn decode_text(bytes: Vec<u8>) -> Option<String> {
    if bytes.contains(&0) {
        return None;
    }
    String::from_utf8(bytes).ok()
}

/// Newline count, plus one for a trailing line without a newline.
pub fn count_lines(content: &str) -> usize {
    let newlines = content.matches('\n').count();
    if !content.is_empty() && !content.ends_with('\n') {
        newlines + 1
    } else {
        newlines
    }
}

fn base64_chunks(encoded: &str) -> impl Iterator<Item = &str> {
    let len = encoded.len();
    (0..len.max(1))
        .step_by(WRITE_CHUNK)
        .map(move |start| &encoded[start..(start + WRITE_CHUNK).min(len)])
}

/// Parse `grep -rnZ` output (`path\0line:text`) into at most `max` matches.
fn parse_grep_output(output: &str, max: usize) -> Vec<SearchMatch> {
    output
        .lines()
        .filter_map(|line| {
            let (path, rest) = line.split_once('\0')?;
            let (number, text) = rest.split_once(':')?;
            Some(SearchMatch {
                path: path.strip_prefix("./").unwrap_or(path).to_string(),
                line_number: number.parse().ok()?,
                content: text.to_string(),
            })
        })
        .take(max)
        .collect()
}
