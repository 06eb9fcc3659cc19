//! Local-key EVM wallet
//!
//! Signs with an ethers `LocalWallet` and submits through the configured
//! [`ChainProvider`]s. The "active chain" mirrors the network selection of a
//! browser wallet: a redemption on another chain has to switch first.

use super::{ContractCall, EvmWallet, MessageSigner};
use crate::chain::{ChainProvider, FinalityTracker, GasPrice, ReceiptStatus};
use crate::error::{CoordinatorError, CoordinatorResult};

use async_trait::async_trait;
use ethers::prelude::*;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info};

/// Buffer added on top of the estimated gas limit, in percent
const GAS_LIMIT_BUFFER_PERCENT: u64 = 20;

const SEND_TIMEOUT: Duration = Duration::from_secs(30);

/// EVM wallet backed by a local private key
pub struct LocalEvmWallet {
    wallet: LocalWallet,
    providers: HashMap<u64, Arc<ChainProvider>>,
    active_chain: AtomicU64,
    receipt_timeout: Duration,
    receipt_poll_interval: Duration,
}

impl LocalEvmWallet {
    pub fn new(
        wallet: LocalWallet,
        providers: Vec<Arc<ChainProvider>>,
        receipt_timeout: Duration,
        receipt_poll_interval: Duration,
    ) -> CoordinatorResult<Self> {
        let initial_chain = providers
            .first()
            .map(|p| p.chain_id())
            .ok_or_else(|| CoordinatorError::Config("No EVM chains configured".to_string()))?;

        let providers = providers
            .into_iter()
            .map(|p| (p.chain_id(), p))
            .collect();

        info!(
            "EVM wallet {:?} ready, active chain {}",
            wallet.address(),
            initial_chain
        );

        Ok(Self {
            wallet,
            providers,
            active_chain: AtomicU64::new(initial_chain),
            receipt_timeout,
            receipt_poll_interval,
        })
    }

    /// Load the private key from the named environment variable
    pub fn key_from_env(var: &str) -> CoordinatorResult<LocalWallet> {
        let key = std::env::var(var).map_err(|_| CoordinatorError::WalletUnavailable {
            family: format!("evm (set {})", var),
        })?;

        key.trim()
            .parse::<LocalWallet>()
            .map_err(|e| CoordinatorError::Config(format!("Invalid private key: {}", e)))
    }

    fn provider(&self, chain_id: u64) -> CoordinatorResult<&Arc<ChainProvider>> {
        self.providers
            .get(&chain_id)
            .ok_or_else(|| CoordinatorError::ChainConnection {
                chain_id,
                message: "chain not configured".to_string(),
            })
    }

    fn build_tx(
        &self,
        chain_id: u64,
        to: Address,
        data: Bytes,
        nonce: U256,
        gas_price: &GasPrice,
    ) -> TypedTransaction {
        let from = self.wallet.address();
        match gas_price {
            GasPrice::Legacy(price) => TransactionRequest::new()
                .from(from)
                .to(to)
                .data(data)
                .nonce(nonce)
                .gas_price(*price)
                .chain_id(chain_id)
                .into(),
            GasPrice::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => Eip1559TransactionRequest::new()
                .from(from)
                .to(to)
                .data(data)
                .nonce(nonce)
                .max_fee_per_gas(*max_fee_per_gas)
                .max_priority_fee_per_gas(*max_priority_fee_per_gas)
                .chain_id(chain_id)
                .into(),
        }
    }
}

#[async_trait]
impl MessageSigner for LocalEvmWallet {
    fn address(&self) -> String {
        format!("{:?}", self.wallet.address())
    }

    async fn sign_message(&self, message: &[u8]) -> CoordinatorResult<Vec<u8>> {
        let signature = self
            .wallet
            .sign_message(message)
            .await
            .map_err(|e| CoordinatorError::SigningRejected(e.to_string()))?;
        Ok(signature.to_vec())
    }
}

#[async_trait]
impl EvmWallet for LocalEvmWallet {
    async fn active_chain_id(&self) -> CoordinatorResult<u64> {
        Ok(self.active_chain.load(Ordering::SeqCst))
    }

    async fn switch_chain(&self, chain_id: u64) -> CoordinatorResult<()> {
        if !self.providers.contains_key(&chain_id) {
            return Err(CoordinatorError::ChainSwitchFailed {
                chain_id,
                message: "chain is not configured for this wallet".to_string(),
            });
        }

        self.active_chain.store(chain_id, Ordering::SeqCst);
        info!("Switched active chain to {}", chain_id);
        Ok(())
    }

    async fn send_transaction(&self, call: ContractCall) -> CoordinatorResult<String> {
        let active = self.active_chain.load(Ordering::SeqCst);
        if active != call.chain_id {
            return Err(CoordinatorError::SubmissionFailed(format!(
                "wallet is on chain {} but the call targets {}",
                active, call.chain_id
            )));
        }

        let provider = self.provider(call.chain_id)?;
        let to: Address = call.to.parse().map_err(|e| CoordinatorError::InvalidField {
            field: "escrow_address".to_string(),
            message: format!("{}", e),
        })?;

        let nonce = provider.get_pending_nonce(self.wallet.address()).await?;
        let gas_price = provider.get_gas_price().await?;
        let mut tx = self.build_tx(call.chain_id, to, call.data.into(), nonce, &gas_price);

        let estimated = provider.estimate_gas(&tx).await?;
        tx.set_gas(estimated + estimated * GAS_LIMIT_BUFFER_PERCENT / 100);

        let signature = self
            .wallet
            .clone()
            .with_chain_id(call.chain_id)
            .sign_transaction(&tx)
            .await
            .map_err(|e| CoordinatorError::SubmissionFailed(e.to_string()))?;
        let raw = tx.rlp_signed(&signature);

        let tx_hash = timeout(SEND_TIMEOUT, provider.send_raw_transaction(raw))
            .await
            .map_err(|_| CoordinatorError::Timeout {
                operation: "send transaction".to_string(),
            })??;

        debug!(
            "Submitted call to {} on chain {} (nonce {})",
            call.to, call.chain_id, nonce
        );
        Ok(format!("{:?}", tx_hash))
    }

    async fn wait_for_receipt(
        &self,
        chain_id: u64,
        tx_hash: &str,
    ) -> CoordinatorResult<ReceiptStatus> {
        let hash: H256 = tx_hash.parse().map_err(|e| CoordinatorError::InvalidField {
            field: "tx_hash".to_string(),
            message: format!("{}", e),
        })?;

        let tracker = FinalityTracker::new(self.provider(chain_id)?.clone(), self.receipt_poll_interval);
        tracker.wait(hash, self.receipt_timeout).await
    }
}
