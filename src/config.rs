//! Configuration management for the HTLC coordinator
//!
//! Loads configuration from TOML files with environment variable substitution.

use anyhow::{Context, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::chain::ChainFamily;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    pub backend: BackendConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub wallet: WalletConfig,
    #[serde(default)]
    pub chains: HashMap<String, ChainConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub poll_interval_ms: u64,
    pub request_timeout_ms: u64,
    pub receipt_timeout_secs: u64,
    pub receipt_poll_interval_ms: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 3_000,
            request_timeout_ms: 10_000,
            receipt_timeout_secs: 300,
            receipt_poll_interval_ms: 2_000,
        }
    }
}

impl CoordinatorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn receipt_timeout(&self) -> Duration {
        Duration::from_secs(self.receipt_timeout_secs)
    }

    pub fn receipt_poll_interval(&self) -> Duration {
        Duration::from_millis(self.receipt_poll_interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    pub base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub database_url: String,
    pub max_connections: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://secrets.db".to_string(),
            max_connections: 4,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 9090,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub json: bool,
    pub filter: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WalletConfig {
    /// Name of the environment variable holding the EVM private key
    pub evm_private_key_env: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub family: ChainFamily,
    #[serde(default)]
    pub chain_id: Option<u64>,
    #[serde(default)]
    pub rpc_urls: Vec<String>,
    #[serde(default = "default_confirmation_blocks")]
    pub confirmation_blocks: u64,
    #[serde(default)]
    pub gas_price_strategy: GasPriceStrategy,
    #[serde(default = "default_max_gas_price_gwei")]
    pub max_gas_price_gwei: u64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_confirmation_blocks() -> u64 {
    1
}

fn default_max_gas_price_gwei() -> u64 {
    500
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum GasPriceStrategy {
    Legacy,
    #[default]
    Eip1559,
}

impl Settings {
    /// Load settings from the path in `HTLC_COORDINATOR_CONFIG`, or the default file
    pub fn load() -> Result<Self> {
        let config_path = env::var("HTLC_COORDINATOR_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));
        Self::load_from(&config_path)
    }

    /// Load settings from a specific file
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        Self::parse(&config_str)
    }

    /// Parse settings from TOML text
    pub fn parse(config_str: &str) -> Result<Self> {
        // Substitute environment variables
        let config_str = substitute_env_vars(config_str);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.backend.base_url.trim().is_empty() {
            anyhow::bail!("backend.base_url must be set");
        }

        if self.coordinator.poll_interval_ms == 0 {
            anyhow::bail!("coordinator.poll_interval_ms must be positive");
        }

        for (name, chain) in self.enabled_chains() {
            if chain.family == ChainFamily::Evm {
                if chain.chain_id.is_none() {
                    anyhow::bail!("EVM chain {} has no chain_id configured", name);
                }
                if chain.rpc_urls.is_empty() {
                    tracing::warn!("Chain {} has no RPC URLs - redemption will be unavailable", name);
                }
            }
        }

        Ok(())
    }

    /// Get list of enabled chains
    pub fn enabled_chains(&self) -> Vec<(&String, &ChainConfig)> {
        self.chains.iter().filter(|(_, c)| c.enabled).collect()
    }
}

lazy_static! {
    static ref ENV_VAR_PATTERN: Regex = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").unwrap();
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    ENV_VAR_PATTERN
        .replace_all(input, |caps: &regex::Captures| {
            env::var(&caps[1]).unwrap_or_default()
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_var_substitution() {
        env::set_var("HTLC_TEST_BACKEND", "orders.example.com");
        let input = "base_url = \"https://${HTLC_TEST_BACKEND}/v1\"";
        let result = substitute_env_vars(input);
        assert_eq!(result, "base_url = \"https://orders.example.com/v1\"");
    }

    #[test]
    fn test_defaults_applied() {
        let settings = Settings::parse(
            r#"
            [backend]
            base_url = "https://orders.example.com"

            [chains.arbitrum_sepolia]
            family = "evm"
            chain_id = 421614
            rpc_urls = ["https://sepolia-rollup.arbitrum.io/rpc"]
            "#,
        )
        .unwrap();

        assert_eq!(settings.coordinator.poll_interval_ms, 3_000);
        assert_eq!(settings.coordinator.request_timeout_ms, 10_000);
        assert_eq!(settings.storage.database_url, "sqlite://secrets.db");
        let chain = &settings.chains["arbitrum_sepolia"];
        assert_eq!(chain.gas_price_strategy, GasPriceStrategy::Eip1559);
        assert_eq!(chain.confirmation_blocks, 1);
    }

    #[test]
    fn test_bundled_default_config_parses() {
        let settings = Settings::parse(include_str!("../config/default.toml")).unwrap();
        assert_eq!(settings.enabled_chains().len(), 5);
        assert_eq!(
            settings.chains["base_sepolia"].gas_price_strategy,
            GasPriceStrategy::Legacy
        );
        assert_eq!(settings.chains["bitcoin_testnet"].family, ChainFamily::Bitcoin);
    }

    #[test]
    fn test_evm_chain_requires_chain_id() {
        let result = Settings::parse(
            r#"
            [backend]
            base_url = "https://orders.example.com"

            [chains.mystery]
            family = "evm"
            "#,
        );
        assert!(result.is_err());
    }
}
