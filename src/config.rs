use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

use crate::types::GenerationParams;

/// Top-level configuration loaded from TOML.
///
/// Built once at startup and passed by reference into every component
/// constructor that needs it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidantConfig {
    pub agent: AgentDefConfig,
    pub generation: GenerationParams,
    pub memory: MemoryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDefConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Backend root URL. Defaults per provider, see [`AgentDefConfig::base_url`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Optional file whose contents replace the built-in persona preamble.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persona_path: Option<PathBuf>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for AgentDefConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            api_key: None,
            persona_path: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "ollama".into()
}
fn default_model() -> String {
    "qwen2.5:7b".into()
}
fn default_request_timeout_secs() -> u64 {
    300
}

impl AgentDefConfig {
    /// Configured base URL, or the provider's usual one.
    pub fn base_url(&self) -> String {
        if let Some(url) = &self.base_url {
            return url.trim_end_matches('/').to_string();
        }
        match self.provider.as_str() {
            "openai" => "https://api.openai.com/v1".into(),
            _ => "http://127.0.0.1:11434".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Directory holding `memory.json` and `conversations/`.
    /// Defaults to `~/.confidant`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    #[serde(default = "default_recent_facts")]
    pub recent_facts: usize,
    #[serde(default = "default_summary_facts")]
    pub summary_facts: usize,
    /// Number of user/assistant pairs kept in turn history. 0 keeps all.
    #[serde(default)]
    pub history_turns: usize,
    #[serde(default = "default_log_conversations")]
    pub log_conversations: bool,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            recent_facts: default_recent_facts(),
            summary_facts: default_summary_facts(),
            history_turns: 0,
            log_conversations: default_log_conversations(),
        }
    }
}

fn default_recent_facts() -> usize {
    10
}
fn default_summary_facts() -> usize {
    20
}
fn default_log_conversations() -> bool {
    true
}

impl MemoryConfig {
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(default_data_dir)
    }

    pub fn memory_file(&self) -> PathBuf {
        self.data_dir().join("memory.json")
    }

    pub fn conversations_dir(&self) -> PathBuf {
        self.data_dir().join("conversations")
    }
}

fn default_data_dir() -> PathBuf {
    crate::fs_util::home_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(".confidant")
}

/// Load configuration from file or use defaults.
///
/// Search order:
/// 1. `CONFIDANT_CONFIG` env var
/// 2. `~/.confidant/config.toml`
/// 3. Zero-config defaults (no file needed)
pub fn load() -> anyhow::Result<ConfidantConfig> {
    let path = config_path();

    let mut config = if path.exists() {
        let content = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
        let config: ConfidantConfig = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("invalid config at {}: {e}", path.display()))?;
        info!("loaded config from {}", path.display());
        config
    } else {
        info!("no config file found, using zero-config defaults");
        ConfidantConfig::default()
    };

    apply_env_overrides(&mut config);
    validate(&config)?;
    Ok(config)
}

fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("CONFIDANT_CONFIG") {
        return PathBuf::from(path);
    }
    default_data_dir().join("config.toml")
}

/// Write a config to `path`, creating parent directories.
pub fn save_to_path(config: &ConfidantConfig, path: &std::path::Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| anyhow::anyhow!("failed to create {}: {e}", parent.display()))?;
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)
        .map_err(|e| anyhow::anyhow!("failed to write {}: {e}", path.display()))
}

/// Environment wins over the file: `OLLAMA_API_URL` for the Ollama base URL
/// and `OPENAI_API_KEY` when the key is not set in config.
pub fn apply_env_overrides(config: &mut ConfidantConfig) {
    if config.agent.provider == "ollama" {
        if let Ok(url) = std::env::var("OLLAMA_API_URL") {
            config.agent.base_url = Some(url);
        }
    }
    if config.agent.api_key.is_none() && config.agent.provider == "openai" {
        config.agent.api_key = std::env::var("OPENAI_API_KEY").ok();
    }
}

/// Validate the config and return clear error messages.
pub fn validate(config: &ConfidantConfig) -> anyhow::Result<()> {
    let valid_providers = ["ollama", "openai"];
    if !valid_providers.contains(&config.agent.provider.as_str()) {
        anyhow::bail!(
            "invalid provider '{}': must be one of {:?}",
            config.agent.provider,
            valid_providers
        );
    }

    if config.agent.model.trim().is_empty() {
        anyhow::bail!("agent.model must not be empty");
    }

    let raw_url = config.agent.base_url();
    let base_url = url::Url::parse(&raw_url)
        .map_err(|e| anyhow::anyhow!("invalid agent.base_url '{raw_url}': {e}"))?;
    if !matches!(base_url.scheme(), "http" | "https") {
        anyhow::bail!(
            "agent.base_url must use http or https, got '{}'",
            base_url.scheme()
        );
    }

    if config.agent.request_timeout_secs == 0 {
        anyhow::bail!("agent.request_timeout_secs must be > 0");
    }

    let generation = &config.generation;
    if !(0.0..=2.0).contains(&generation.temperature) {
        anyhow::bail!(
            "generation.temperature must be within 0.0..=2.0, got {}",
            generation.temperature
        );
    }
    if !(generation.top_p > 0.0 && generation.top_p <= 1.0) {
        anyhow::bail!(
            "generation.top_p must be within (0.0, 1.0], got {}",
            generation.top_p
        );
    }
    if generation.max_tokens == 0 {
        anyhow::bail!("generation.max_tokens must be > 0");
    }
    if generation.context_window == 0 {
        anyhow::bail!("generation.context_window must be > 0");
    }

    if config.memory.recent_facts == 0 {
        anyhow::bail!("memory.recent_facts must be > 0");
    }
    if config.memory.summary_facts == 0 {
        anyhow::bail!("memory.summary_facts must be > 0");
    }

    Ok(())
}
