//! Chain module - chain families, asset identifiers and EVM connectivity
//!
//! This module provides:
//! - Classification of `chain:symbol` asset identifiers into chain families
//! - Chain-name to chain-ID resolution for EVM legs
//! - Multi-RPC provider management with automatic failover
//! - Receipt finality tracking for submitted redemptions

pub mod finality;
pub mod provider;
pub mod registry;

pub use finality::{FinalityTracker, ReceiptStatus};
pub use provider::{ChainProvider, GasPrice};
pub use registry::{ChainInfo, ChainRegistry};

use crate::error::{CoordinatorError, CoordinatorResult};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Chain families with distinct redemption semantics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainFamily {
    Evm,
    Bitcoin,
    Starknet,
}

impl ChainFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChainFamily::Evm => "evm",
            ChainFamily::Bitcoin => "bitcoin",
            ChainFamily::Starknet => "starknet",
        }
    }
}

impl fmt::Display for ChainFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed `chain:symbol` asset identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetId {
    pub chain: String,
    pub symbol: String,
}

impl AssetId {
    pub fn parse(asset: &str) -> CoordinatorResult<Self> {
        let (chain, symbol) = asset
            .split_once(':')
            .ok_or_else(|| CoordinatorError::InvalidAsset(asset.to_string()))?;

        let chain = chain.trim().to_ascii_lowercase();
        if chain.is_empty() {
            return Err(CoordinatorError::InvalidAsset(asset.to_string()));
        }

        Ok(Self {
            chain,
            symbol: symbol.trim().to_string(),
        })
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.chain, self.symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_asset() {
        let asset = AssetId::parse("Arbitrum_Sepolia:WBTC").unwrap();
        assert_eq!(asset.chain, "arbitrum_sepolia");
        assert_eq!(asset.symbol, "WBTC");
        assert_eq!(asset.to_string(), "arbitrum_sepolia:WBTC");
    }

    #[test]
    fn test_parse_asset_without_separator() {
        assert!(matches!(
            AssetId::parse("bitcoin"),
            Err(CoordinatorError::InvalidAsset(_))
        ));
        assert!(AssetId::parse(":btc").is_err());
    }
}
