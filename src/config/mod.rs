//! Runtime configuration (§6 Environment/configuration): model identifiers,
//! token/thinking budgets, `max_iterations`, `context_limit`, grader
//! enable + its own model/budgets, OAuth credential directory, coordination
//! server address/port, the conflict-channel name template, and the patch
//! backup directory. TOML-backed and hot-reloadable, per the teacher's
//! `ConfigManager` pattern — trimmed to the fields this crate actually
//! reads, since config-file *parsing* is out of scope (§1) but the loading
//! mechanism itself is ambient infrastructure every agent run needs.

mod credential;
mod watcher;

pub use credential::{CredentialError, CredentialStore, OAuthCredentials};
pub use watcher::{watch_config_file, ConfigWatchHandle};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{RidgeError, Result};

const CONFIG_DIR: &str = "swarm-re-core";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub agent: AgentModelConfig,
    pub grader: GraderConfig,
    pub loop_: LoopConfig,
    pub coordination: CoordinationConfig,
    pub patch: PatchConfig,
    pub credentials: CredentialConfig,
    pub logging: LoggingConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            agent: AgentModelConfig::default(),
            grader: GraderConfig::default(),
            loop_: LoopConfig::default(),
            coordination: CoordinationConfig::default(),
            patch: PatchConfig::default(),
            credentials: CredentialConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentModelConfig {
    pub model: String,
    pub max_tokens: u32,
    pub max_thinking_tokens: u32,
    pub temperature: f32,
    pub enable_thinking: bool,
    pub enable_interleaved_thinking: bool,
}

impl Default for AgentModelConfig {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-5-20250929".to_string(),
            max_tokens: 8192,
            max_thinking_tokens: 4096,
            temperature: 1.0,
            enable_thinking: true,
            enable_interleaved_thinking: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraderConfig {
    pub enabled: bool,
    pub model: String,
    pub classifier_model: String,
    pub prompt_token_budget: u32,
    pub max_tokens: u32,
}

impl Default for GraderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model: "claude-opus-4-5-20251101".to_string(),
            classifier_model: "claude-haiku-4-5-20251001".to_string(),
            prompt_token_budget: 120_000,
            max_tokens: 4096,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    pub max_iterations: u32,
    pub context_limit: u32,
    pub request_timeout_secs: u64,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            context_limit: 170_000,
            request_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinationConfig {
    pub server_addr: String,
    pub server_port: u16,
    /// Placeholders `{address}` and `{type}` are substituted with the hex
    /// address and tool-class name (§9 Open Questions: channel naming is
    /// left free-form but must be deterministic across participants).
    pub conflict_channel_template: String,
    pub consensus_timeout_secs: u64,
    pub debugger_response_timeout_secs: u64,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1".to_string(),
            server_port: 6667,
            conflict_channel_template: "#conflict_{address}_{type}".to_string(),
            consensus_timeout_secs: 120,
            debugger_response_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PatchConfig {
    pub backup_dir: PathBuf,
}

impl Default for PatchConfig {
    fn default() -> Self {
        Self { backup_dir: default_state_dir().join("patch_backups") }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialConfig {
    pub state_dir: PathBuf,
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self { state_dir: default_state_dir().join("credentials") }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), log_dir: None }
    }
}

fn default_state_dir() -> PathBuf {
    directories::BaseDirs::new()
        .map(|d| d.config_dir().join(CONFIG_DIR))
        .unwrap_or_else(|| PathBuf::from(".swarm-re-core"))
}

impl RuntimeConfig {
    pub fn config_path() -> Result<PathBuf> {
        Ok(default_state_dir().join(CONFIG_FILE))
    }

    /// Loads from the default path, falling back to defaults (with a
    /// logged warning) if the file is missing or malformed; never fails
    /// the caller over a bad/missing config file.
    pub fn load_or_default() -> Self {
        match Self::config_path() {
            Ok(path) => Self::load_from(&path).unwrap_or_default(),
            Err(_) => Self::default(),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(RidgeError::ConfigNotFound { path: path.to_path_buf() });
        }
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| RidgeError::Config(e.to_string()))
    }

    /// Applies environment-variable overrides, for the handful of settings
    /// that commonly change per-invocation (model id, max iterations).
    /// Unset/unparseable variables leave the existing value untouched.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(model) = std::env::var("SWARM_RE_MODEL") {
            self.agent.model = model;
        }
        if let Ok(max_iter) = std::env::var("SWARM_RE_MAX_ITERATIONS") {
            if let Ok(n) = max_iter.parse() {
                self.loop_.max_iterations = n;
            }
        }
        if let Ok(limit) = std::env::var("SWARM_RE_CONTEXT_LIMIT") {
            if let Ok(n) = limit.parse() {
                self.loop_.context_limit = n;
            }
        }
        if let Ok(addr) = std::env::var("SWARM_RE_COORDINATION_ADDR") {
            self.coordination.server_addr = addr;
        }
        if let Ok(enabled) = std::env::var("SWARM_RE_GRADER_ENABLED") {
            self.grader.enabled = enabled != "0" && enabled.to_lowercase() != "false";
        }
    }

    pub fn write_default(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self).map_err(|e| RidgeError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Substitutes `{address}` (lowercase hex, no `0x` prefix) and `{type}`
/// (tool-class name) into a channel-name template.
pub fn format_conflict_channel(template: &str, address: u64, tool_class: &str) -> String {
    template
        .replace("{address}", &format!("{:x}", address))
        .replace("{type}", tool_class)
}
