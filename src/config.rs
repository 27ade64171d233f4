use crate::error::{Result, TandemError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Per-agent startup timing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StartupConfig {
    /// Overall startup budget in seconds
    pub timeout: u64,
    /// Seconds to sleep after fork before the first banner drain
    pub wait_after_start: f64,
    /// How many times to drain the master fd while absorbing the banner
    pub initial_read_attempts: u32,
}

impl Default for StartupConfig {
    fn default() -> Self {
        Self {
            timeout: 20,
            wait_after_start: 2.0,
            initial_read_attempts: 30,
        }
    }
}

/// Per-agent response collection timing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponseConfig {
    /// Turn deadline in seconds
    pub timeout: u64,
    /// Per-iteration read timeout in seconds
    pub read_timeout: f64,
    /// Consecutive empty reads that count as quiescence
    pub max_idle_checks: u32,
    /// Seconds to wait between idle checks while the reply is still empty
    pub idle_wait: f64,
}

impl Default for ResponseConfig {
    fn default() -> Self {
        Self {
            timeout: 45,
            read_timeout: 3.0,
            max_idle_checks: 3,
            idle_wait: 2.0,
        }
    }
}

impl ResponseConfig {
    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.read_timeout)
    }

    pub fn idle_wait(&self) -> Duration {
        Duration::from_secs_f64(self.idle_wait)
    }
}

/// Per-agent heartbeat settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub enabled: bool,
    /// Seconds between nudges
    pub interval: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: 10,
        }
    }
}

/// One agent entry in the config
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub name: String,
    pub command: String,
    /// Extra fixed arguments for the command
    pub args: Vec<String>,
    pub enabled: bool,
    pub startup: StartupConfig,
    pub response: ResponseConfig,
    pub heartbeat: HeartbeatConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            command: String::new(),
            args: Vec::new(),
            enabled: true,
            startup: StartupConfig::default(),
            response: ResponseConfig::default(),
            heartbeat: HeartbeatConfig::default(),
        }
    }
}

impl AgentConfig {
    fn named(name: &str, command: &str) -> Self {
        Self {
            name: name.to_string(),
            command: command.to_string(),
            ..Self::default()
        }
    }
}

/// Session log file settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub file: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            file: "orchestrator.log".to_string(),
        }
    }
}

/// Background liveness monitoring
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub enabled: bool,
    /// Seconds between liveness sweeps
    pub interval: u64,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: 10,
        }
    }
}

/// Orchestrator-wide settings: loop budget, preamble, logging, monitoring
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Maximum outbound sends per top-level operator input
    pub max_loops: u32,
    /// Prepend the delegation-protocol preamble to the first primary send
    pub auto_preamble: bool,
    pub logging: LoggingConfig,
    pub monitoring: MonitoringConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_loops: 10,
            auto_preamble: true,
            logging: LoggingConfig::default(),
            monitoring: MonitoringConfig::default(),
        }
    }
}

/// Conversation history settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub enabled: bool,
    pub max_entries: usize,
    pub save_to_file: bool,
    pub file_path: String,
    pub session_dir: String,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 1000,
            save_to_file: true,
            file_path: "conversations/history.json".to_string(),
            session_dir: "conversations/sessions".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    pub history: HistoryConfig,
}

/// Output line filtering
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilteringConfig {
    /// Case-insensitive substrings that mark a line as UI noise
    pub noise_keywords: Vec<String>,
}

impl Default for FilteringConfig {
    fn default() -> Self {
        Self {
            noise_keywords: default_noise_keywords(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub filtering: FilteringConfig,
}

/// The empirical noise set; overridable via config
fn default_noise_keywords() -> Vec<String> {
    [
        "? for shortcuts",
        "thinking on",
        "approaching weekly limit",
        "thinking…",
        "billowing…",
        "marinating…",
        "esc to interrupt",
        "tab to toggle",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Top-level configuration, loaded from YAML with defaults for every
/// field. Unknown keys are ignored so richer configs keep working.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub agents: Vec<AgentConfig>,
    pub orchestrator: OrchestratorConfig,
    pub conversation: ConversationConfig,
    pub output: OutputConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            agents: vec![
                AgentConfig::named("claude-1", "claude"),
                AgentConfig::named("claude-2", "claude"),
            ],
            orchestrator: OrchestratorConfig::default(),
            conversation: ConversationConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

impl Config {
    /// Load config, trying in order: the explicit --config path,
    /// ./config.yaml, ~/.tandem/config.yaml. A missing file falls back
    /// to defaults with a warning; a file that exists but fails to parse
    /// is fatal.
    pub fn load(cli_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = cli_path {
            if path.exists() {
                return Self::load_from_path(path);
            }
            eprintln!(
                "[tandem] Warning: config file {} not found, using defaults",
                path.display()
            );
            return Ok(Self::default());
        }

        let local = PathBuf::from("config.yaml");
        if local.exists() {
            return Self::load_from_path(&local);
        }

        let global = Self::global_config_path();
        if global.exists() {
            return Self::load_from_path(&global);
        }

        Ok(Self::default())
    }

    /// Load config from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| TandemError::io(format!("reading config file {}", path.display()), e))?;

        serde_yaml::from_str(&content).map_err(|e| TandemError::ConfigParse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Path to the global config file (~/.tandem/config.yaml)
    pub fn global_config_path() -> PathBuf {
        Self::global_tandem_dir().join("config.yaml")
    }

    /// Path to the global tandem directory (~/.tandem)
    pub fn global_tandem_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".tandem")
    }

    /// Agent entries that are enabled
    pub fn enabled_agents(&self) -> impl Iterator<Item = &AgentConfig> {
        self.agents.iter().filter(|a| a.enabled)
    }
}
