use thiserror::Error;

// ─── Top-level error hierarchy ───────────────────────────────────────────────

/// Structured error hierarchy for `chainwatch`.
///
/// Each subsystem defines its own error variant. Library callers can match on
/// these to decide recovery strategy; internal code continues to use
/// `anyhow::Result` for ad-hoc context chains.
#[derive(Debug, Error)]
pub enum AgentError {
    // ── Config ───────────────────────────────────────────────────────────
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    // ── Chain client ────────────────────────────────────────────────────
    #[error("chain: {0}")]
    Chain(#[from] ChainError),

    // ── Execution ledger ────────────────────────────────────────────────
    #[error("ledger: {0}")]
    Ledger(#[from] LedgerError),

    // ── Script executor ─────────────────────────────────────────────────
    #[error("executor: {0}")]
    Executor(#[from] ExecutorError),

    // ── Generic fallthrough (wraps anyhow for interop) ──────────────────
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// ─── Config errors ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load config: {0}")]
    Load(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

// ─── Chain client errors ────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("failed to connect to RPC endpoint {url}: {message}")]
    Connect { url: String, message: String },

    #[error("rpc call failed during {phase}: {message}")]
    Rpc { phase: String, message: String },

    #[error("failed to decode {what}: {message}")]
    Decode { what: String, message: String },

    #[error("invalid contract address: {0}")]
    InvalidAddress(String),
}

impl ChainError {
    pub fn rpc(phase: impl Into<String>, message: impl ToString) -> Self {
        Self::Rpc {
            phase: phase.into(),
            message: message.to_string(),
        }
    }

    pub fn decode(what: impl Into<String>, message: impl ToString) -> Self {
        Self::Decode {
            what: what.into(),
            message: message.to_string(),
        }
    }
}

// ─── Execution ledger errors ────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("failed to read ledger {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to write ledger {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },

    #[error("ledger file {path} is corrupt: {source}")]
    Corrupt {
        path: String,
        source: serde_json::Error,
    },

    #[error("ledger file {path} is corrupt: last_command_id {value:?} is not a decimal integer")]
    InvalidLastId { path: String, value: String },

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

// ─── Script executor errors ─────────────────────────────────────────────────

/// Failures of a single execution attempt. These never escape
/// `ScriptExecutor::execute`; the last one is folded into the outcome.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("invalid base64 script payload: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    #[error("script payload is not valid UTF-8")]
    InvalidUtf8,

    #[error("failed to fetch script from {url}: {message}")]
    Fetch { url: String, message: String },

    #[error("unexpected status {status} fetching script from {url}")]
    FetchStatus { url: String, status: u16 },

    #[error("failed to stage script file: {0}")]
    Stage(std::io::Error),

    #[error("failed to spawn script: {0}")]
    Spawn(std::io::Error),

    #[error("execution failed with {status}")]
    NonZeroExit { status: std::process::ExitStatus },

    #[error("execution timeout after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },
}

// ─── Convenience re-exports ─────────────────────────────────────────────────

/// Shorthand result type for the crate.
pub type Result<T> = std::result::Result<T, AgentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_displays_correctly() {
        let err = AgentError::Config(ConfigError::Validation("empty rpc_url".into()));
        assert!(err.to_string().contains("validation failed"));
        assert!(err.to_string().contains("empty rpc_url"));
    }

    #[test]
    fn chain_rpc_error_carries_phase() {
        let err = AgentError::Chain(ChainError::rpc("filter logs", "connection refused"));
        assert!(err.to_string().contains("filter logs"));
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn executor_timeout_displays_duration() {
        let err = ExecutorError::Timeout { timeout_secs: 30 };
        assert!(err.to_string().contains("30s"));
    }

    #[test]
    fn anyhow_interop() {
        let anyhow_err = anyhow::anyhow!("something went wrong");
        let agent_err: AgentError = anyhow_err.into();
        assert!(agent_err.to_string().contains("something went wrong"));
    }
}
