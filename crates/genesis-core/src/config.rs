//! Configuration management for genesis.toml
//!
//! Lookup order: `genesis.toml` in the current directory or a parent, then
//! `~/.config/genesis/config.toml` (or platform equivalent). A missing file
//! yields defaults. Environment variables override file values.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE_NAME: &str = "genesis.toml";

pub const ENV_IDLE_TIMEOUT: &str = "GENESIS_IDLE_TIMEOUT_SEC";
pub const ENV_LLM_URL: &str = "GENESIS_LLM_URL";
pub const ENV_LLM_MODEL: &str = "GENESIS_LLM_MODEL";
pub const ENV_API_KEY: &str = "GENESIS_API_KEY";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub memory: MemoryConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub workspace: WorkspaceConfig,
}

/// Chat-completions endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    /// Request timeout; an elapsed timeout counts as a service failure
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

/// Life loop budgets
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_max_steps")]
    pub max_steps_per_task: u32,
}

/// Memory distillation thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Distill once memory holds more entries than this
    #[serde(default = "default_memory_limit")]
    pub limit: usize,

    /// Most recent entries that survive distillation
    #[serde(default = "default_keep_count")]
    pub keep_count: usize,
}

/// Idle detection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Backing file used by idle introspection cycles
    #[serde(default = "default_wake_file")]
    pub wake_file: PathBuf,

    /// Extra guidance prepended to planner prompts in background modes
    #[serde(default = "default_meta_prompt_file")]
    pub meta_prompt_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    /// Directory scanned by `genesis work` and `genesis select`
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
}

fn default_base_url() -> String {
    "http://127.0.0.1:3000".to_string()
}

fn default_model() -> String {
    "qwen/qwen3-vl-4b".to_string()
}

fn default_timeout_secs() -> u64 {
    600
}

fn default_temperature() -> f32 {
    0.1
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_max_retries() -> u32 {
    3
}

fn default_max_steps() -> u32 {
    10
}

fn default_memory_limit() -> usize {
    100
}

fn default_keep_count() -> usize {
    3
}

fn default_idle_timeout() -> u64 {
    30
}

fn default_poll_interval() -> u64 {
    5
}

fn default_wake_file() -> PathBuf {
    PathBuf::from(".ai/wake.md")
}

fn default_meta_prompt_file() -> PathBuf {
    PathBuf::from(".ai/meta.md")
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("work")
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            timeout_secs: default_timeout_secs(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            api_key: None,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            max_steps_per_task: default_max_steps(),
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            limit: default_memory_limit(),
            keep_count: default_keep_count(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout(),
            poll_interval_secs: default_poll_interval(),
            wake_file: default_wake_file(),
            meta_prompt_file: default_meta_prompt_file(),
        }
    }
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            work_dir: default_work_dir(),
        }
    }
}

impl LlmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl SchedulerConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}

impl Config {
    /// Load from the first config file found, with environment overrides
    pub fn load() -> Result<Self> {
        let mut config = match Self::find_config_path() {
            Some(path) => Self::load_from(&path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load configuration from a specific path (no environment overrides)
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Find genesis.toml by searching current directory and parents, then the user config dir
    pub fn find_config_path() -> Option<PathBuf> {
        if let Ok(mut current) = std::env::current_dir() {
            for _ in 0..10 {
                let candidate = current.join(CONFIG_FILE_NAME);
                if candidate.exists() {
                    return Some(candidate);
                }
                if !current.pop() {
                    break;
                }
            }
        }

        Self::user_config_path().ok().filter(|path| path.exists())
    }

    /// Get the per-user configuration file path
    pub fn user_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;

        Ok(config_dir.join("genesis").join("config.toml"))
    }

    /// Apply overrides from a variable lookup; unparsable numbers are ignored
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(secs) = lookup(ENV_IDLE_TIMEOUT).and_then(|v| v.trim().parse().ok()) {
            self.scheduler.idle_timeout_secs = secs;
        }
        if let Some(url) = lookup(ENV_LLM_URL) {
            self.llm.base_url = url;
        }
        if let Some(model) = lookup(ENV_LLM_MODEL) {
            self.llm.model = model;
        }
        if let Some(key) = lookup(ENV_API_KEY) {
            self.llm.api_key = Some(key);
        }
    }

    /// Create a default configuration file with comments
    pub fn create_default() -> Result<PathBuf> {
        let path = Self::user_config_path()?;

        if path.exists() {
            anyhow::bail!("Config file already exists: {}", path.display());
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let default_config = r#"# genesis configuration
# Location: ~/.config/genesis/config.toml (a genesis.toml in the project wins)

[llm]
# OpenAI-compatible chat completions endpoint
base_url = "http://127.0.0.1:3000"
model = "qwen/qwen3-vl-4b"
# Seconds before a planner request counts as failed
timeout_secs = 600
temperature = 0.1
max_tokens = 1024
# api_key = "sk-..."

[engine]
# Attempts per task before it is marked FAILED
max_retries = 3
# Planner steps per attempt
max_steps_per_task = 10

[memory]
# Distill memory into knowledge once it grows past this many entries
limit = 100
# Most recent entries kept verbatim after distillation
keep_count = 3

[scheduler]
# Idle seconds before an introspection cycle (env: GENESIS_IDLE_TIMEOUT_SEC)
idle_timeout_secs = 30
poll_interval_secs = 5
wake_file = ".ai/wake.md"
meta_prompt_file = ".ai/meta.md"

[workspace]
work_dir = "work"
"#;

        fs::write(&path, default_config)?;

        Ok(path)
    }
}
