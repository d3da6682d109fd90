// src/config.rs
//! Runtime configuration.
//!
//! Settings are layered, later sources overriding earlier ones:
//! 1. built-in defaults
//! 2. an optional `did-lifecycle.toml` (or `.yaml`/`.json`) in the working directory
//! 3. environment variables prefixed with `DID_`, nested keys separated by `__`
//!    (e.g. `DID_RETRY__MAX_ATTEMPTS=5`)
//!
//! The binary loads a `.env` file with `dotenv` before reading the environment.

use crate::blockchain::retry::RetryPolicy;
use crate::error::{DidError, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::time::Duration;

/// `DID_` variables, `__` between nested keys.
fn environment() -> Environment {
    Environment::with_prefix("DID")
        .prefix_separator("_")
        .separator("__")
}

/// Top-level settings of the engine and the binary.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Budget for observing finality after submission
    pub confirmation_timeout_secs: u64,
    /// Capacity of the bounded status channel per submission
    pub status_channel_capacity: usize,
    /// Raise instead of falling back to off-chain construction when `on_chain`
    /// is requested for a method without a registry
    pub strict_on_chain: bool,
    pub retry: RetrySettings,
    pub ethr: EvmSettings,
    pub moonbeam: EvmSettings,
    pub api: ApiSettings,
    pub local_ledger: LocalLedgerSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            confirmation_timeout_secs: 30,
            status_channel_capacity: 16,
            strict_on_chain: false,
            retry: RetrySettings::default(),
            ethr: EvmSettings {
                network: None,
                chain_id: 1,
            },
            moonbeam: EvmSettings {
                network: None,
                chain_id: 1284,
            },
            api: ApiSettings::default(),
            local_ledger: LocalLedgerSettings::default(),
        }
    }
}

/// Bounded exponential backoff for pre-submission steps.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        RetrySettings {
            max_attempts: 3,
            initial_backoff_ms: 200,
            max_backoff_ms: 2_000,
        }
    }
}

/// Settings of an EVM-style method.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct EvmSettings {
    /// Optional network segment, producing `did:<method>:<network>:<address>`
    pub network: Option<String>,
    /// Chain id used in `blockchainAccountId` (CAIP-10)
    pub chain_id: u64,
}

impl Default for EvmSettings {
    fn default() -> Self {
        EvmSettings {
            network: None,
            chain_id: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApiSettings {
    pub listen: String,
}

impl Default for ApiSettings {
    fn default() -> Self {
        ApiSettings {
            listen: "127.0.0.1:3000".to_string(),
        }
    }
}

/// Settings of the in-process development ledger.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct LocalLedgerSettings {
    pub block_time_ms: u64,
    /// Balance credited to every account on first use
    pub endowment: u64,
    pub base_fee: u64,
    pub byte_fee: u64,
}

impl Default for LocalLedgerSettings {
    fn default() -> Self {
        LocalLedgerSettings {
            block_time_ms: 500,
            endowment: 1_000_000_000_000,
            base_fee: 1_000_000,
            byte_fee: 1_000,
        }
    }
}

impl Settings {
    /// Loads settings from the layered sources described in the module docs.
    ///
    /// # Errors
    /// `Validation` if a source is malformed or a value has the wrong type.
    pub fn load() -> Result<Self> {
        Self::load_with(environment())
    }

    fn load_with(environment: Environment) -> Result<Self> {
        Config::builder()
            .add_source(File::with_name("did-lifecycle").required(false))
            .add_source(environment)
            .build()
            .and_then(|config| config.try_deserialize::<Settings>())
            .map_err(|e| DidError::validation(format!("invalid configuration: {e}")))
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts.max(1),
            initial_backoff: Duration::from_millis(self.retry.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.retry.max_backoff_ms),
        }
    }
}
