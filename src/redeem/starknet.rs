//! Starknet redemption via the escrow's `claim_swap` entry point

use super::{decode_hex_32, Finality, RedeemRequest, Redeemer, Submission};
use crate::chain::ChainFamily;
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::wallet::WalletSessions;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

const CLAIM_SWAP_ENTRYPOINT: &str = "claim_swap";

/// Encode bytes as a Cairo `Array<u32>`: length, then big-endian limbs as felts
pub fn encode_u32_array(bytes: &[u8; 32]) -> Vec<String> {
    let mut calldata = Vec::with_capacity(9);
    calldata.push(format!("{:#x}", 8));
    for chunk in bytes.chunks_exact(4) {
        let limb = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        calldata.push(format!("{:#x}", limb));
    }
    calldata
}

pub struct StarknetRedeemer {
    sessions: Arc<WalletSessions>,
}

impl StarknetRedeemer {
    pub fn new(sessions: Arc<WalletSessions>) -> Self {
        Self { sessions }
    }
}

#[async_trait]
impl Redeemer for StarknetRedeemer {
    async fn redeem(&self, request: &RedeemRequest) -> CoordinatorResult<Submission> {
        let escrow = request.require_escrow()?;
        let swap_id = decode_hex_32("swap_id", &request.swap_id)?;

        let account = self.sessions.starknet().await.ok_or_else(|| {
            CoordinatorError::UnsupportedOperation {
                family: ChainFamily::Starknet.to_string(),
                operation: "claim_swap (no starknet account connected)".to_string(),
            }
        })?;

        let mut calldata = encode_u32_array(&swap_id);
        calldata.extend(encode_u32_array(&request.secret));

        let tx_hash = account
            .execute(escrow, CLAIM_SWAP_ENTRYPOINT, calldata)
            .await?;

        info!("claim_swap invoked on {}: {}", escrow, tx_hash);
        Ok(Submission {
            family: ChainFamily::Starknet,
            tx_hash,
            finality: Finality::Broadcast,
        })
    }
}
