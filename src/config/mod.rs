use crate::error::ConfigError;
use directories::UserDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Floor for the polling interval. Anything faster just hammers the RPC
/// endpoint without seeing new blocks.
pub const MIN_POLLING_INTERVAL_MS: u64 = 500;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to config.toml - computed from home, not serialized
    #[serde(skip)]
    pub config_path: PathBuf,
    /// Agent state directory (ledger lives here) - computed, not serialized
    #[serde(skip)]
    pub state_dir: PathBuf,

    #[serde(default = "default_network")]
    pub network: String,
    #[serde(default)]
    pub contract_address: String,
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,
    /// Stable identity for this installation; generated on first run.
    #[serde(default)]
    pub client_id: String,

    #[serde(default = "default_polling_interval_ms")]
    pub polling_interval_ms: u64,
    #[serde(default = "default_execution_timeout_ms")]
    pub execution_timeout_ms: u64,
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,

    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_file: Option<String>,

    /// When true (the default), a command is marked executed even if the
    /// registered handler reports an error, so a permanently broken command
    /// is never redelivered. When false a failed command stays unmarked and
    /// the startup catch-up will revisit it on the next boot.
    #[serde(default = "default_true")]
    pub mark_executed_on_handler_failure: bool,
}

fn default_network() -> String {
    "testnet".into()
}

fn default_rpc_url() -> String {
    "https://testnet.hashio.io/api".into()
}

fn default_polling_interval_ms() -> u64 {
    5_000
}

fn default_execution_timeout_ms() -> u64 {
    30_000
}

fn default_max_retry_attempts() -> u32 {
    3
}

fn default_log_level() -> String {
    "info".into()
}

fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        let home =
            UserDirs::new().map_or_else(|| PathBuf::from("."), |u| u.home_dir().to_path_buf());
        let chainwatch_dir = home.join(".chainwatch");

        Self {
            config_path: chainwatch_dir.join("config.toml"),
            state_dir: chainwatch_dir,
            network: default_network(),
            contract_address: String::new(),
            rpc_url: default_rpc_url(),
            client_id: uuid::Uuid::new_v4().to_string(),
            polling_interval_ms: default_polling_interval_ms(),
            execution_timeout_ms: default_execution_timeout_ms(),
            max_retry_attempts: default_max_retry_attempts(),
            log_level: default_log_level(),
            log_file: None,
            mark_executed_on_handler_failure: default_true(),
        }
    }
}

impl Config {
    /// Load the config from `~/.chainwatch/config.toml`, writing a default
    /// file on the very first run.
    pub fn load_or_init() -> Result<Self, ConfigError> {
        let home = UserDirs::new()
            .map(|u| u.home_dir().to_path_buf())
            .ok_or_else(|| ConfigError::Load("could not find home directory".into()))?;
        Self::load_or_init_at(&home.join(".chainwatch"))
    }

    /// Same as [`Config::load_or_init`] but rooted at an explicit directory.
    pub fn load_or_init_at(dir: &Path) -> Result<Self, ConfigError> {
        let config_path = dir.join("config.toml");

        if !dir.exists() {
            fs::create_dir_all(dir)?;
        }

        if config_path.exists() {
            let contents = fs::read_to_string(&config_path)?;
            let mut config: Self = toml::from_str(&contents)
                .map_err(|e| ConfigError::Load(format!("{}: {e}", config_path.display())))?;
            config.config_path = config_path;
            config.state_dir = dir.to_path_buf();
            if config.client_id.is_empty() {
                config.client_id = uuid::Uuid::new_v4().to_string();
                config.save()?;
            }
            Ok(config)
        } else {
            let config = Self {
                config_path,
                state_dir: dir.to_path_buf(),
                ..Self::default()
            };
            config.save()?;
            Ok(config)
        }
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(network) = std::env::var("CHAINWATCH_NETWORK") {
            if !network.is_empty() {
                self.network = network;
            }
        }

        if let Ok(addr) = std::env::var("CHAINWATCH_CONTRACT_ADDRESS") {
            if !addr.is_empty() {
                self.contract_address = addr;
            }
        }

        if let Ok(url) = std::env::var("CHAINWATCH_RPC_URL") {
            if !url.is_empty() {
                self.rpc_url = url;
            }
        }

        if let Ok(id) = std::env::var("CHAINWATCH_CLIENT_ID") {
            if !id.is_empty() {
                self.client_id = id;
            }
        }

        if let Ok(interval) = std::env::var("CHAINWATCH_POLLING_INTERVAL") {
            if let Ok(ms) = interval.parse::<u64>() {
                self.polling_interval_ms = ms;
            }
        }

        if let Ok(timeout) = std::env::var("CHAINWATCH_EXECUTION_TIMEOUT") {
            if let Ok(ms) = timeout.parse::<u64>() {
                self.execution_timeout_ms = ms;
            }
        }

        if let Ok(retries) = std::env::var("CHAINWATCH_MAX_RETRY_ATTEMPTS") {
            if let Ok(n) = retries.parse::<u32>() {
                self.max_retry_attempts = n;
            }
        }

        if let Ok(level) = std::env::var("CHAINWATCH_LOG_LEVEL") {
            if !level.is_empty() {
                self.log_level = level;
            }
        }

        if let Ok(file) = std::env::var("CHAINWATCH_LOG_FILE") {
            if !file.is_empty() {
                self.log_file = Some(file);
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.contract_address.trim().is_empty() {
            return Err(ConfigError::Validation("contract_address is required".into()));
        }
        if self.rpc_url.trim().is_empty() {
            return Err(ConfigError::Validation("rpc_url is required".into()));
        }
        if self.client_id.trim().is_empty() {
            return Err(ConfigError::Validation("client_id is required".into()));
        }
        if self.max_retry_attempts < 1 {
            return Err(ConfigError::Validation(
                "max_retry_attempts must be at least 1".into(),
            ));
        }
        if self.polling_interval_ms < MIN_POLLING_INTERVAL_MS {
            return Err(ConfigError::Validation(format!(
                "polling_interval_ms must be at least {MIN_POLLING_INTERVAL_MS}"
            )));
        }
        Ok(())
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let toml_str = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::Load(format!("failed to serialize config: {e}")))?;
        fs::write(&self.config_path, toml_str)?;
        Ok(())
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval_ms.max(MIN_POLLING_INTERVAL_MS))
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_millis(self.execution_timeout_ms)
    }

    /// Location of the executed-command ledger file.
    pub fn ledger_path(&self) -> PathBuf {
        self.state_dir.join("executed.json")
    }
}
