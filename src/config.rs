//! Orchestrator configuration.
//!
//! Configuration is layered: built-in defaults, then an optional file named
//! by `ORCHESTRATOR_CONFIG` (TOML or YAML, chosen by extension), then
//! environment variable overrides. The result is checked with [`Validate`]
//! before the server starts.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Environment variable naming an optional configuration file.
pub const CONFIG_PATH_ENV: &str = "ORCHESTRATOR_CONFIG";

/// Validation result containing all found issues.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    /// List of validation errors (fatal).
    pub errors: Vec<String>,
    /// List of validation warnings (non-fatal).
    pub warnings: Vec<String>,
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Adds an error to the result.
    pub fn add_error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    /// Adds a warning to the result.
    pub fn add_warning(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    /// Merges another validation result into this one.
    pub fn merge(&mut self, other: ValidationResult) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    /// Converts to a Result, failing if there are errors.
    pub fn into_result(self) -> Result<Vec<String>> {
        if self.is_valid() {
            Ok(self.warnings)
        } else {
            Err(Error::Config(self.errors.join("; ")))
        }
    }
}

/// Trait for validatable configuration types.
pub trait Validate {
    /// Validates the configuration and returns any issues found.
    fn validate(&self) -> ValidationResult;
}

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Settings for the sandbox connection provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Prepended to every provisioned slug.
    #[serde(default)]
    pub slug_prefix: String,
    /// Appended to every provisioned slug.
    #[serde(default = "default_slug_suffix")]
    pub slug_suffix: String,
    #[serde(default = "default_sandbox_host")]
    pub host: String,
    /// First port handed out; later connections count upward from here.
    #[serde(default = "default_base_port")]
    pub base_port: u16,
    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: u64,
    #[serde(default = "default_cpu_limit")]
    pub cpu_limit: String,
    #[serde(default = "default_memory_limit")]
    pub memory_limit: String,
    #[serde(default = "default_image")]
    pub image: String,
}

fn default_slug_suffix() -> String {
    "-sandbox".to_string()
}

fn default_sandbox_host() -> String {
    "127.0.0.1".to_string()
}

fn default_base_port() -> u16 {
    3000
}

fn default_ttl_seconds() -> u64 {
    3600
}

fn default_cpu_limit() -> String {
    "1".to_string()
}

fn default_memory_limit() -> String {
    "512m".to_string()
}

fn default_image() -> String {
    "ghcr.io/ai-hub/sandbox:latest".to_string()
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            slug_prefix: String::new(),
            slug_suffix: default_slug_suffix(),
            host: default_sandbox_host(),
            base_port: default_base_port(),
            ttl_seconds: default_ttl_seconds(),
            cpu_limit: default_cpu_limit(),
            memory_limit: default_memory_limit(),
            image: default_image(),
        }
    }
}

/// Settings for the reasoning service and the run-loop bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// API key for the reasoning service. Jobs fail when unset.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Maximum reasoning turns per job.
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,
    /// Seconds allowed for a single reasoning-service call.
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,
    /// Seconds allowed for a single `run_shell` command.
    #[serde(default = "default_shell_timeout")]
    pub shell_timeout_secs: u64,
    #[serde(default = "default_clone_timeout")]
    pub clone_timeout_secs: u64,
    /// Seconds allowed for the whole run-loop of one job.
    #[serde(default = "default_total_timeout")]
    pub total_timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-5-codex".to_string()
}

fn default_max_turns() -> u32 {
    50
}

fn default_call_timeout() -> u64 {
    300
}

fn default_shell_timeout() -> u64 {
    600
}

fn default_clone_timeout() -> u64 {
    600
}

fn default_total_timeout() -> u64 {
    3600
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
            model: default_model(),
            max_turns: default_max_turns(),
            call_timeout_secs: default_call_timeout(),
            shell_timeout_secs: default_shell_timeout(),
            clone_timeout_secs: default_clone_timeout(),
            total_timeout_secs: default_total_timeout(),
        }
    }
}

impl AgentConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn shell_timeout(&self) -> Duration {
        Duration::from_secs(self.shell_timeout_secs)
    }

    pub fn clone_timeout(&self) -> Duration {
        Duration::from_secs(self.clone_timeout_secs)
    }

    pub fn total_timeout(&self) -> Duration {
        Duration::from_secs(self.total_timeout_secs)
    }
}

/// Settings for job dispatch and retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Jobs processed at once; further jobs wait in PENDING.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Seconds a terminal job stays queryable.
    #[serde(default = "default_retention")]
    pub retention_secs: u64,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    /// Parent directory for workspaces. Defaults to the system temp dir.
    #[serde(default)]
    pub workspace_dir: Option<PathBuf>,
    /// Prefix used to turn a `repoSlug` into a clone URL.
    #[serde(default = "default_git_base_url")]
    pub git_base_url: String,
}

fn default_max_concurrent() -> usize {
    4
}

fn default_retention() -> u64 {
    86_400
}

fn default_sweep_interval() -> u64 {
    300
}

fn default_git_base_url() -> String {
    "https://github.com".to_string()
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            retention_secs: default_retention(),
            sweep_interval_secs: default_sweep_interval(),
            workspace_dir: None,
            git_base_url: default_git_base_url(),
        }
    }
}

impl JobsConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Complete orchestrator configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
}

impl OrchestratorConfig {
    /// Loads defaults, the optional config file, then environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) if !path.trim().is_empty() => Self::from_file(Path::new(path.trim()))?,
            _ => Self::default(),
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Reads a TOML or YAML file, picked by extension.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml(&content),
            _ => Self::from_toml(&content),
        }
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("invalid TOML config: {}", e)))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| Error::Config(format!("invalid YAML config: {}", e)))
    }

    /// Applies overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        override_from_env("HOST", &mut self.server.host)?;
        override_from_env("PORT", &mut self.server.port)?;

        override_from_env("SANDBOX_SLUG_PREFIX", &mut self.sandbox.slug_prefix)?;
        override_from_env("SANDBOX_SLUG_SUFFIX", &mut self.sandbox.slug_suffix)?;
        override_from_env("SANDBOX_IMAGE", &mut self.sandbox.image)?;
        override_from_env("SANDBOX_TTL_SECONDS", &mut self.sandbox.ttl_seconds)?;
        override_from_env("SANDBOX_CPU_LIMIT", &mut self.sandbox.cpu_limit)?;
        override_from_env("SANDBOX_MEMORY_LIMIT", &mut self.sandbox.memory_limit)?;
        override_from_env("SANDBOX_HOST", &mut self.sandbox.host)?;
        override_from_env("SANDBOX_BASE_PORT", &mut self.sandbox.base_port)?;

        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            if !key.trim().is_empty() {
                self.agent.api_key = Some(key.trim().to_string());
            }
        }
        override_from_env("OPENAI_BASE_URL", &mut self.agent.base_url)?;
        override_from_env("CIFIX_MODEL", &mut self.agent.model)?;

        if let Ok(dir) = std::env::var("SANDBOX_WORKSPACE_DIR") {
            if !dir.trim().is_empty() {
                self.jobs.workspace_dir = Some(PathBuf::from(dir.trim()));
            }
        }
        override_from_env("GIT_BASE_URL", &mut self.jobs.git_base_url)?;
        override_from_env("MAX_CONCURRENT_JOBS", &mut self.jobs.max_concurrent)?;

        Ok(())
    }
}

/// Replaces `target` with the parsed value of `var` when it is set and non-blank.
fn override_from_env<T>(var: &str, target: &mut T) -> Result<()>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(var) {
        Ok(raw) if !raw.trim().is_empty() => {
            *target = raw
                .trim()
                .parse()
                .map_err(|e| Error::Config(format!("invalid value for {}: {}", var, e)))?;
            Ok(())
        }
        _ => Ok(()),
    }
}

impl Validate for SandboxConfig {
    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        if self.host.trim().is_empty() {
            result.add_error("sandbox.host cannot be empty");
        }

        if self.image.trim().is_empty() {
            result.add_error("sandbox.image cannot be empty");
        }

        if self.ttl_seconds == 0 {
            result.add_warning("sandbox.ttl_seconds = 0 means connections are never reused");
        }

        if self.base_port < 1024 {
            result.add_warning(format!(
                "sandbox.base_port {} is in the privileged range",
                self.base_port
            ));
        }

        result
    }
}

impl Validate for AgentConfig {
    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        if self.model.trim().is_empty() {
            result.add_error("agent.model cannot be empty");
        }

        if self.max_turns == 0 {
            result.add_error("agent.max_turns must be at least 1");
        }

        if self.call_timeout_secs == 0 || self.total_timeout_secs == 0 {
            result.add_error("agent timeouts must be greater than zero");
        }

        if self.call_timeout_secs > self.total_timeout_secs {
            result.add_warning("agent.call_timeout_secs exceeds agent.total_timeout_secs");
        }

        if self.api_key.is_none() {
            result.add_warning("no reasoning service API key configured; submitted jobs will fail");
        }

        result
    }
}

impl Validate for JobsConfig {
    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        if self.max_concurrent == 0 {
            result.add_error("jobs.max_concurrent must be at least 1");
        }

        if self.sweep_interval_secs == 0 {
            result.add_error("jobs.sweep_interval_secs must be greater than zero");
        }

        if self.git_base_url.trim().is_empty() {
            result.add_error("jobs.git_base_url cannot be empty");
        }

        result
    }
}

impl Validate for OrchestratorConfig {
    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();
        result.merge(self.sandbox.validate());
        result.merge(self.agent.validate());
        result.merge(self.jobs.validate());
        result
    }
}
