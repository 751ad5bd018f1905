//! Configuration loaded from `workcell.toml`.
//!
//! Every field has a default so an absent or partial file is valid.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::agent::MAX_ITERATIONS;
use crate::backend::Provider;
use crate::sandbox::NetworkPolicy;

/// Default configuration file name, looked up in the working directory.
pub const CONFIG_FILE: &str = "workcell.toml";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Container engine selection.
    #[serde(default)]
    pub runtime: RuntimeConfig,
    /// How sandboxes are provisioned.
    #[serde(default)]
    pub sandbox: SandboxConfig,
    /// Limits on file operations.
    #[serde(default)]
    pub files: FilesConfig,
    /// Git identity and GitHub access.
    #[serde(default)]
    pub git: GitConfig,
    /// Agent loop tuning.
    #[serde(default)]
    pub agent: AgentConfig,
    /// Completion backend selection.
    #[serde(default)]
    pub backend: BackendConfig,
}

/// Which container engine backs the sandboxes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    /// Docker daemon via its HTTP API.
    #[default]
    Docker,
    /// Host processes in per-sandbox directories. No isolation.
    Local,
}

/// Container engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Which engine runs the sandboxes.
    #[serde(default)]
    pub engine: Engine,

    /// Maximum number of engine calls in flight at once.
    #[serde(default = "default_max_concurrent_ops")]
    pub max_concurrent_ops: usize,

    /// Host directory holding sandbox volumes when `engine = "local"`.
    #[serde(default = "default_local_root")]
    pub local_root: PathBuf,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            engine: Engine::default(),
            max_concurrent_ops: default_max_concurrent_ops(),
            local_root: default_local_root(),
        }
    }
}

/// Sandbox provisioning configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Image every sandbox container is created from
    #[serde(default = "default_image")]
    pub image: String,

    /// Name of the isolated bridge network
    #[serde(default = "default_network")]
    pub network: String,

    /// Network isolation of sandbox containers.
    #[serde(default)]
    pub network_policy: NetworkPolicy,

    /// Mount point of the sandbox volume inside the container
    #[serde(default = "default_workspace_root")]
    pub workspace_root: String,

    /// Command keeping the container alive
    #[serde(default = "default_command")]
    pub command: Vec<String>,

    /// Prefix for container, volume and label names
    #[serde(default = "default_label_prefix")]
    pub label_prefix: String,

    /// Resource limits and timeouts.
    #[serde(default)]
    pub resources: ResourceConfig,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            image: default_image(),
            network: default_network(),
            network_policy: NetworkPolicy::default(),
            workspace_root: default_workspace_root(),
            command: default_command(),
            label_prefix: default_label_prefix(),
            resources: ResourceConfig::default(),
        }
    }
}

/// Resource limits and timeouts applied to sandboxes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// CPU share per container.
    #[serde(default = "default_cpus")]
    pub cpus: f64,

    /// Memory ceiling per container, in MiB.
    #[serde(default = "default_memory_mb")]
    pub memory_mb: u64,

    /// Recorded on the sandbox; enforcement depends on the storage driver.
    #[serde(default = "default_disk_mb")]
    pub disk_mb: u64,

    /// Seconds a container gets to stop before it is killed.
    #[serde(default = "default_stop_grace")]
    pub stop_grace_secs: u64,

    /// Default timeout for commands run in a sandbox.
    #[serde(default = "default_exec_timeout")]
    pub exec_timeout_secs: u64,

    /// Timeout for the initial `git clone`.
    #[serde(default = "default_clone_timeout")]
    pub clone_timeout_secs: u64,

    /// Timeout for `git pull` when syncing.
    #[serde(default = "default_sync_timeout")]
    pub sync_timeout_secs: u64,

    /// Upper bound on lifecycle engine calls (create, start, stop, inspect, remove)
    #[serde(default = "default_engine_timeout")]
    pub engine_timeout_secs: u64,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            cpus: default_cpus(),
            memory_mb: default_memory_mb(),
            disk_mb: default_disk_mb(),
            stop_grace_secs: default_stop_grace(),
            exec_timeout_secs: default_exec_timeout(),
            clone_timeout_secs: default_clone_timeout(),
            sync_timeout_secs: default_sync_timeout(),
            engine_timeout_secs: default_engine_timeout(),
        }
    }
}

/// Guards for file operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesConfig {
    /// Largest file that may be read or written, in bytes
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// Cap on matches returned by a search.
    #[serde(default = "default_max_search_matches")]
    pub max_search_matches: usize,

    /// Timeout for a search.
    #[serde(default = "default_search_timeout")]
    pub search_timeout_secs: u64,
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            max_file_size: default_max_file_size(),
            max_search_matches: default_max_search_matches(),
            search_timeout_secs: default_search_timeout(),
        }
    }
}

/// Git identity and GitHub access.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitConfig {
    /// Commit author name.
    #[serde(default = "default_author_name")]
    pub author_name: String,

    /// Commit author email.
    #[serde(default = "default_author_email")]
    pub author_email: String,

    /// Timeout for `git push`.
    #[serde(default = "default_push_timeout")]
    pub push_timeout_secs: u64,

    /// GitHub REST API base URL.
    #[serde(default = "default_github_api_url")]
    pub github_api_url: String,

    /// Bearer token for pull requests. Falls back to `GITHUB_TOKEN`.
    #[serde(default)]
    pub github_token: Option<String>,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            author_name: default_author_name(),
            author_email: default_author_email(),
            push_timeout_secs: default_push_timeout(),
            github_api_url: default_github_api_url(),
            github_token: None,
        }
    }
}

impl GitConfig {
    /// Token from config, else from the `GITHUB_TOKEN` environment variable.
    pub fn resolve_token(&self) -> Option<String> {
        resolve_token_with_env(
            self.github_token.as_deref(),
            std::env::var("GITHUB_TOKEN").ok().as_deref(),
        )
    }
}

fn resolve_token_with_env(configured: Option<&str>, env: Option<&str>) -> Option<String> {
    configured
        .filter(|t| !t.trim().is_empty())
        .or_else(|| env.filter(|t| !t.trim().is_empty()))
        .map(|t| t.trim().to_string())
}

/// Reason-act loop tuning.
///
/// `max_iterations` may lower the completion-call ceiling but never raise it
/// above [`MAX_ITERATIONS`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Completion calls per turn, at most 15.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Cap on generated tokens per call.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Characters of tool output kept in `tool_result` events
    #[serde(default = "default_tool_result_preview")]
    pub tool_result_preview: usize,

    /// Characters of shell output kept in `command_output` events
    #[serde(default = "default_command_output_preview")]
    pub command_output_preview: usize,

    /// Timeout for `run_command`.
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            tool_result_preview: default_tool_result_preview(),
            command_output_preview: default_command_output_preview(),
            command_timeout_secs: default_command_timeout(),
        }
    }
}

/// Completion backend selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Which backend to use: "openai" or "anthropic"
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Model name (provider default when unset)
    #[serde(default)]
    pub model: Option<String>,

    /// API base URL (provider default when unset)
    #[serde(default)]
    pub base_url: Option<String>,

    /// Environment variable holding the API key (provider default when unset)
    #[serde(default)]
    pub api_key_env: Option<String>,

    /// Retries on rate limits, server errors and network failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Timeout for one HTTP request.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            base_url: None,
            api_key_env: None,
            max_retries: default_max_retries(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl BackendConfig {
    /// Parse the provider string into a Provider enum
    pub fn get_provider(&self) -> Result<Provider> {
        self.provider.parse()
    }
}

// Default value functions
fn default_max_concurrent_ops() -> usize {
    8
}

fn default_local_root() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("workcell")
}

fn default_image() -> String {
    "workcell/sandbox:latest".to_string()
}

fn default_network() -> String {
    "workcell-sandbox".to_string()
}

fn default_workspace_root() -> String {
    "/workspace".to_string()
}

fn default_command() -> Vec<String> {
    vec!["sleep".to_string(), "infinity".to_string()]
}

fn default_label_prefix() -> String {
    "workcell".to_string()
}

fn default_cpus() -> f64 {
    1.0
}

fn default_memory_mb() -> u64 {
    512
}

fn default_disk_mb() -> u64 {
    2048
}

fn default_stop_grace() -> u64 {
    10
}

fn default_exec_timeout() -> u64 {
    30
}

fn default_clone_timeout() -> u64 {
    120
}

fn default_sync_timeout() -> u64 {
    60
}

fn default_engine_timeout() -> u64 {
    60
}

fn default_max_file_size() -> u64 {
    1024 * 1024
}

fn default_max_search_matches() -> usize {
    50
}

fn default_search_timeout() -> u64 {
    15
}

fn default_author_name() -> String {
    "workcell".to_string()
}

fn default_author_email() -> String {
    "workcell@localhost".to_string()
}

fn default_push_timeout() -> u64 {
    60
}

fn default_github_api_url() -> String {
    "https://api.github.com".to_string()
}

fn default_max_iterations() -> u32 {
    MAX_ITERATIONS
}

fn default_temperature() -> f32 {
    0.2
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_tool_result_preview() -> usize {
    500
}

fn default_command_output_preview() -> usize {
    2000
}

fn default_command_timeout() -> u64 {
    60
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_max_retries() -> u32 {
    3
}

fn default_request_timeout() -> u64 {
    120
}

impl Config {
    /// Load configuration from `workcell.toml` in `project_dir`, using defaults if not found
    pub fn load(project_dir: &Path) -> Result<Self> {
        Self::load_file(&project_dir.join(CONFIG_FILE))
    }

    /// Load configuration from an explicit path, using defaults if it does not exist
    pub fn load_file(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", config_path.display()))?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.agent.max_iterations > MAX_ITERATIONS {
            anyhow::bail!(
                "agent.max_iterations is {}, the limit is {}",
                self.agent.max_iterations,
                MAX_ITERATIONS
            );
        }
        Ok(())
    }
}
