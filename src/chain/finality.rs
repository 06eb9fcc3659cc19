//! Receipt finality tracking for submitted redemptions
//!
//! A redemption counts as final once its receipt is included with the
//! configured number of confirmations. A receipt with status 0 is a revert
//! and is reported immediately, regardless of depth.

use crate::chain::ChainProvider;
use crate::error::{CoordinatorError, CoordinatorResult};

use ethers::types::{H256, U64};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// Final outcome of a mined transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptStatus {
    Confirmed { block_number: u64 },
    Reverted,
}

/// Tracks finality for transactions on a specific chain
pub struct FinalityTracker {
    provider: Arc<ChainProvider>,
    poll_interval: Duration,
}

impl FinalityTracker {
    pub fn new(provider: Arc<ChainProvider>, poll_interval: Duration) -> Self {
        Self {
            provider,
            poll_interval,
        }
    }

    /// Check a transaction once; `None` while it is unmined or too shallow
    pub async fn check(&self, tx_hash: H256) -> CoordinatorResult<Option<ReceiptStatus>> {
        let Some(receipt) = self.provider.get_transaction_receipt(tx_hash).await? else {
            return Ok(None);
        };

        let current_block = self.provider.get_block_number().await?;
        let status = evaluate_receipt(
            receipt.status,
            receipt.block_number.map(|b| b.as_u64()),
            current_block,
            self.provider.confirmation_blocks(),
        );

        if status.is_none() {
            debug!(
                "Transaction {:?} not yet final on chain {} (head {})",
                tx_hash,
                self.provider.chain_id(),
                current_block
            );
        }

        Ok(status)
    }

    /// Poll until the transaction is final or reverted
    pub async fn wait(&self, tx_hash: H256, timeout: Duration) -> CoordinatorResult<ReceiptStatus> {
        let deadline = Instant::now() + timeout;

        loop {
            match self.check(tx_hash).await {
                Ok(Some(status)) => {
                    info!(
                        "Transaction {:?} on chain {} finished: {:?}",
                        tx_hash,
                        self.provider.chain_id(),
                        status
                    );
                    return Ok(status);
                }
                Ok(None) => {}
                Err(e) => warn!("Receipt check failed for {:?}: {}", tx_hash, e),
            }

            if Instant::now() + self.poll_interval > deadline {
                return Err(CoordinatorError::Timeout {
                    operation: format!("receipt for {:?}", tx_hash),
                });
            }
            sleep(self.poll_interval).await;
        }
    }
}

/// Decide finality from receipt fields; the inclusion block counts as one confirmation
fn evaluate_receipt(
    status: Option<U64>,
    block_number: Option<u64>,
    current_block: u64,
    required_confirmations: u64,
) -> Option<ReceiptStatus> {
    if status == Some(U64::zero()) {
        return Some(ReceiptStatus::Reverted);
    }

    let block_number = block_number?;
    let confirmations = current_block.saturating_sub(block_number) + 1;
    if confirmations >= required_confirmations.max(1) {
        Some(ReceiptStatus::Confirmed { block_number })
    } else {
        None
    }
}
