//! Coordinator configuration, loaded from TOML.

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;

use crate::{
    contracts::{SAFE_FALLBACK_HANDLER, SAFE_L2_SINGLETON, SAFE_PROXY_FACTORY},
    error::CoordinatorError,
    retry::RetryPolicy,
};

pub const DEFAULT_CONFIG_PATHS: &[&str] = &["cosign.toml", "config/cosign.toml"];

pub const DEFAULT_AGENT_KEY_ENV: &str = "COSIGN_AGENT_KEY";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },
    #[error("failed to parse config at {path}: {source}")]
    Parse { path: PathBuf, source: toml::de::Error },
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl From<ConfigError> for CoordinatorError {
    fn from(err: ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}

/// What to do when the relay cannot be queried for duplicates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DedupPolicy {
    /// Propagate the outage; nothing is proposed.
    #[default]
    FailClosed,
    /// Log a warning and propose as if no duplicate exists.
    ProceedWithoutDedup,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Expected chain id. When set, the RPC endpoint must report the same value.
    pub chain_id: Option<u64>,
    pub rpc_url: String,
    pub relay_url: String,
    pub relay_api_key: Option<String>,
    /// Environment variable holding the agent's private key.
    pub agent_key_env: String,
    pub dedup_policy: DedupPolicy,
    /// Blocks searched for an `ExecutionSuccess` log before executing.
    pub execution_log_lookback: u64,
    pub deployment: DeploymentConfig,
    pub gas: GasConfig,
    pub timeouts: TimeoutsConfig,
    pub retry: RetryPolicy,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            chain_id: None,
            rpc_url: "http://localhost:8545".to_string(),
            relay_url: "http://localhost:8000".to_string(),
            relay_api_key: None,
            agent_key_env: DEFAULT_AGENT_KEY_ENV.to_string(),
            dedup_policy: DedupPolicy::default(),
            execution_log_lookback: 10_000,
            deployment: DeploymentConfig::default(),
            gas: GasConfig::default(),
            timeouts: TimeoutsConfig::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl CoordinatorConfig {
    /// Loads `path`, or the first existing default path, or the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let candidates: Vec<PathBuf> = match path {
            Some(path) => vec![path.to_path_buf()],
            None => DEFAULT_CONFIG_PATHS.iter().map(PathBuf::from).collect(),
        };

        for candidate in candidates {
            if !candidate.exists() {
                if path.is_some() {
                    return Err(ConfigError::Io {
                        source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
                        path: candidate,
                    });
                }
                continue;
            }
            let config = Self::from_file(&candidate)?;
            config.validate()?;
            return Ok(config);
        }

        let config = Self::default();
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        toml::from_str(&contents)
            .map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rpc_url.trim().is_empty() {
            return Err(ConfigError::Invalid("rpc_url is empty".into()));
        }
        if self.relay_url.trim().is_empty() {
            return Err(ConfigError::Invalid("relay_url is empty".into()));
        }
        if self.agent_key_env.trim().is_empty() {
            return Err(ConfigError::Invalid("agent_key_env is empty".into()));
        }
        if self.deployment.singleton.is_zero() {
            return Err(ConfigError::Invalid("deployment.singleton is the zero address".into()));
        }
        if self.deployment.proxy_factory.is_zero() {
            return Err(ConfigError::Invalid("deployment.proxy_factory is the zero address".into()));
        }
        let t = &self.timeouts;
        if t.request_timeout_secs == 0 || t.receipt_timeout_secs == 0 || t.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("timeouts must be non-zero".into()));
        }
        Ok(())
    }
}

/// Safe contracts used to derive and deploy accounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploymentConfig {
    pub singleton: Address,
    pub proxy_factory: Address,
    pub fallback_handler: Address,
    pub salt_nonce: u64,
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            singleton: SAFE_L2_SINGLETON,
            proxy_factory: SAFE_PROXY_FACTORY,
            fallback_handler: SAFE_FALLBACK_HANDLER,
            salt_nonce: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GasConfig {
    /// Estimate `safeTxGas`. When off, `safeTxGas` is 0 (all available gas).
    pub estimate_safe_tx_gas: bool,
    /// Floor for `safeTxGas`, also used when estimation fails.
    pub min_safe_tx_gas: u64,
    /// Percentage added on top of the estimate.
    pub buffer_percent: u64,
    /// Pay the executor back from the Safe (`gasPrice`/`baseGas` non-zero).
    pub refund: bool,
    pub base_gas: u64,
}

impl Default for GasConfig {
    fn default() -> Self {
        Self {
            estimate_safe_tx_gas: true,
            min_safe_tx_gas: 60_000,
            buffer_percent: 20,
            refund: false,
            base_gas: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutsConfig {
    pub request_timeout_secs: u64,
    pub receipt_timeout_secs: u64,
    pub poll_interval_ms: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self { request_timeout_secs: 15, receipt_timeout_secs: 120, poll_interval_ms: 2_000 }
    }
}

impl TimeoutsConfig {
    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn receipt(&self) -> Duration {
        Duration::from_secs(self.receipt_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
