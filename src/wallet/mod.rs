//! Wallet capabilities consumed by the coordinator
//!
//! The coordinator never owns a wallet. It depends only on these capability
//! traits, registered per chain family in a shared [`WalletSessions`]. Hosts
//! may connect or disconnect sessions at any time.

pub mod evm;

pub use evm::LocalEvmWallet;

use crate::chain::{ChainFamily, ReceiptStatus};
use crate::error::CoordinatorResult;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Message signing capability (any family)
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageSigner: Send + Sync {
    fn address(&self) -> String;

    async fn sign_message(&self, message: &[u8]) -> CoordinatorResult<Vec<u8>>;
}

/// A contract call to submit on an EVM chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractCall {
    pub chain_id: u64,
    pub to: String,
    pub data: Vec<u8>,
}

/// EVM session capabilities
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EvmWallet: Send + Sync {
    async fn active_chain_id(&self) -> CoordinatorResult<u64>;

    async fn switch_chain(&self, chain_id: u64) -> CoordinatorResult<()>;

    /// Submit a call and return the transaction hash without waiting for inclusion
    async fn send_transaction(&self, call: ContractCall) -> CoordinatorResult<String>;

    async fn wait_for_receipt(&self, chain_id: u64, tx_hash: &str)
        -> CoordinatorResult<ReceiptStatus>;
}

/// Bitcoin session able to spend an HTLC output with a revealed secret
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BitcoinWallet: Send + Sync {
    /// Build, sign and broadcast the redeem spend; returns the txid once broadcast
    async fn redeem_htlc(
        &self,
        htlc_address: &str,
        recipient_address: &str,
        secret: &[u8; 32],
    ) -> CoordinatorResult<String>;
}

/// Starknet account able to invoke a contract entry point
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StarknetAccount: Send + Sync {
    async fn execute(
        &self,
        contract_address: &str,
        entrypoint: &str,
        calldata: Vec<String>,
    ) -> CoordinatorResult<String>;
}

#[derive(Default)]
struct Slots {
    signers: HashMap<ChainFamily, Arc<dyn MessageSigner>>,
    evm: Option<Arc<dyn EvmWallet>>,
    bitcoin: Option<Arc<dyn BitcoinWallet>>,
    starknet: Option<Arc<dyn StarknetAccount>>,
}

/// Shared registry of connected wallet sessions
#[derive(Default)]
pub struct WalletSessions {
    slots: RwLock<Slots>,
}

impl WalletSessions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect an EVM wallet as both the EVM session and the EVM signer
    pub async fn connect_evm<W>(&self, wallet: Arc<W>)
    where
        W: EvmWallet + MessageSigner + 'static,
    {
        let mut slots = self.slots.write().await;
        slots.signers.insert(ChainFamily::Evm, wallet.clone());
        slots.evm = Some(wallet);
    }

    pub async fn set_signer(&self, family: ChainFamily, signer: Arc<dyn MessageSigner>) {
        self.slots.write().await.signers.insert(family, signer);
    }

    pub async fn set_evm(&self, wallet: Arc<dyn EvmWallet>) {
        self.slots.write().await.evm = Some(wallet);
    }

    pub async fn set_bitcoin(&self, wallet: Arc<dyn BitcoinWallet>) {
        self.slots.write().await.bitcoin = Some(wallet);
    }

    pub async fn set_starknet(&self, account: Arc<dyn StarknetAccount>) {
        self.slots.write().await.starknet = Some(account);
    }

    /// Drop every session of a family
    pub async fn disconnect(&self, family: ChainFamily) {
        let mut slots = self.slots.write().await;
        slots.signers.remove(&family);
        match family {
            ChainFamily::Evm => slots.evm = None,
            ChainFamily::Bitcoin => slots.bitcoin = None,
            ChainFamily::Starknet => slots.starknet = None,
        }
    }

    pub async fn signer(&self, family: ChainFamily) -> Option<Arc<dyn MessageSigner>> {
        self.slots.read().await.signers.get(&family).cloned()
    }

    pub async fn evm(&self) -> Option<Arc<dyn EvmWallet>> {
        self.slots.read().await.evm.clone()
    }

    pub async fn bitcoin(&self) -> Option<Arc<dyn BitcoinWallet>> {
        self.slots.read().await.bitcoin.clone()
    }

    pub async fn starknet(&self) -> Option<Arc<dyn StarknetAccount>> {
        self.slots.read().await.starknet.clone()
    }
}
