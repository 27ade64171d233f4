use std::path::PathBuf;
use thiserror::Error;

/// Exit codes: 0 on a normal session end, 1 for fatal startup failures
/// and unhandled internal errors.
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;

/// All possible errors in tandem
#[derive(Error, Debug)]
pub enum TandemError {
    /// Agent command not found on PATH; the agent is skipped, not fatal
    #[error("command '{command}' for agent '{agent}' not found in PATH")]
    CommandNotFound { agent: String, command: String },

    /// Child exited while we were still draining its startup banner
    #[error("agent '{agent}' exited during startup (code {code:?}): {output}")]
    StartupExit {
        agent: String,
        code: Option<i32>,
        output: String,
    },

    /// Write to a dead or uninitialized PTY
    #[error("cannot send to agent '{0}': not running")]
    SendFailed(String),

    /// Delegation target is unknown or not running
    #[error("agent '{0}' is not available")]
    AgentUnavailable(String),

    /// Config file parse error
    #[error("failed to parse config file {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// No agent could be started; the session cannot run
    #[error("no agents could be started")]
    NoAgentsStarted,

    /// IO error with context
    #[error("IO error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl TandemError {
    /// Map error to exit code
    pub fn exit_code(&self) -> i32 {
        match self {
            TandemError::CommandNotFound { .. }
            | TandemError::StartupExit { .. }
            | TandemError::SendFailed(_)
            | TandemError::AgentUnavailable(_)
            | TandemError::ConfigParse { .. }
            | TandemError::NoAgentsStarted
            | TandemError::Io { .. } => EXIT_FAILURE,
        }
    }

    /// Helper to create IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        TandemError::Io {
            context: context.into(),
            source,
        }
    }
}

/// Result type alias for tandem operations
pub type Result<T> = std::result::Result<T, TandemError>;
