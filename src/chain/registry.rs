//! Chain registry mapping asset chain names to families and EVM chain IDs

use super::{AssetId, ChainFamily};
use crate::config::ChainConfig;
use crate::error::{CoordinatorError, CoordinatorResult};

use std::collections::HashMap;

/// Resolved chain metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainInfo {
    pub family: ChainFamily,
    pub chain_id: Option<u64>,
}

/// Chain name prefixes recognised when no exact entry exists
const FAMILY_PREFIXES: &[(&str, ChainFamily)] = &[
    ("bitcoin", ChainFamily::Bitcoin),
    ("starknet", ChainFamily::Starknet),
    ("ethereum", ChainFamily::Evm),
    ("arbitrum", ChainFamily::Evm),
    ("base", ChainFamily::Evm),
    ("optimism", ChainFamily::Evm),
    ("polygon", ChainFamily::Evm),
    ("bnbchain", ChainFamily::Evm),
    ("avalanche", ChainFamily::Evm),
];

/// Well-known EVM chain IDs by asset chain name
const EVM_CHAIN_IDS: &[(&str, u64)] = &[
    ("ethereum", 1),
    ("ethereum_sepolia", 11155111),
    ("arbitrum", 42161),
    ("arbitrum_sepolia", 421614),
    ("base", 8453),
    ("base_sepolia", 84532),
    ("optimism", 10),
    ("optimism_sepolia", 11155420),
    ("polygon", 137),
    ("bnbchain", 56),
    ("avalanche", 43114),
];

/// Registry of known chains
#[derive(Debug, Clone)]
pub struct ChainRegistry {
    chains: HashMap<String, ChainInfo>,
}

impl ChainRegistry {
    /// Registry with the built-in chain table
    pub fn new() -> Self {
        let chains = EVM_CHAIN_IDS
            .iter()
            .map(|(name, id)| {
                (
                    name.to_string(),
                    ChainInfo {
                        family: ChainFamily::Evm,
                        chain_id: Some(*id),
                    },
                )
            })
            .collect();

        Self { chains }
    }

    /// Built-in table extended (and overridden) by configured chains
    pub fn with_configured<'a>(
        configured: impl IntoIterator<Item = (&'a String, &'a ChainConfig)>,
    ) -> Self {
        let mut registry = Self::new();
        for (name, config) in configured {
            registry.register(
                name,
                ChainInfo {
                    family: config.family,
                    chain_id: config.chain_id,
                },
            );
        }
        registry
    }

    pub fn register(&mut self, name: &str, info: ChainInfo) {
        self.chains.insert(name.to_ascii_lowercase(), info);
    }

    /// Resolve a chain name, exact entries first, then family prefixes.
    /// Unknown chains are rejected instead of being treated as EVM.
    pub fn resolve(&self, chain: &str) -> CoordinatorResult<ChainInfo> {
        let chain = chain.to_ascii_lowercase();
        if let Some(info) = self.chains.get(&chain) {
            return Ok(*info);
        }

        FAMILY_PREFIXES
            .iter()
            .find(|(prefix, _)| chain.starts_with(prefix))
            .map(|(_, family)| ChainInfo {
                family: *family,
                chain_id: None,
            })
            .ok_or(CoordinatorError::UnsupportedChain { chain })
    }

    /// Classify the redemption family of a `chain:symbol` asset
    pub fn classify_redeem_family(&self, asset: &str) -> CoordinatorResult<ChainFamily> {
        let asset = AssetId::parse(asset)?;
        Ok(self.resolve(&asset.chain)?.family)
    }

    /// Resolve the numeric chain ID required to redeem an EVM asset
    pub fn evm_chain_id(&self, asset: &str) -> CoordinatorResult<u64> {
        let asset = AssetId::parse(asset)?;
        let info = self.resolve(&asset.chain)?;
        match (info.family, info.chain_id) {
            (ChainFamily::Evm, Some(chain_id)) => Ok(chain_id),
            _ => Err(CoordinatorError::UnsupportedChain { chain: asset.chain }),
        }
    }
}

impl Default for ChainRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_families() {
        let registry = ChainRegistry::new();
        assert_eq!(
            registry.classify_redeem_family("bitcoin_testnet:btc").unwrap(),
            ChainFamily::Bitcoin
        );
        assert_eq!(
            registry.classify_redeem_family("starknet_sepolia:wbtc").unwrap(),
            ChainFamily::Starknet
        );
        assert_eq!(
            registry.classify_redeem_family("arbitrum_sepolia:wbtc").unwrap(),
            ChainFamily::Evm
        );
    }

    #[test]
    fn test_unknown_chain_fails_closed() {
        let registry = ChainRegistry::new();
        assert!(matches!(
            registry.classify_redeem_family("solana:sol"),
            Err(CoordinatorError::UnsupportedChain { .. })
        ));
    }

    #[test]
    fn test_evm_chain_id_resolution() {
        let mut registry = ChainRegistry::new();
        assert_eq!(registry.evm_chain_id("base_sepolia:usdc").unwrap(), 84532);

        // Prefix-only match knows the family but not the chain id
        assert!(registry.evm_chain_id("arbitrum_nova:eth").is_err());

        registry.register(
            "arbitrum_nova",
            ChainInfo {
                family: ChainFamily::Evm,
                chain_id: Some(42170),
            },
        );
        assert_eq!(registry.evm_chain_id("arbitrum_nova:eth").unwrap(), 42170);
        assert!(registry.evm_chain_id("bitcoin:btc").is_err());
    }
}
