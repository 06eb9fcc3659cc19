//! Redemption dispatcher - claims the destination HTLC with the revealed secret
//!
//! One [`Redeemer`] per chain family, selected by classifying the asset's
//! chain. Every variant reports through the same result contract.

pub mod bitcoin;
pub mod evm;
pub mod starknet;

pub use self::bitcoin::BitcoinRedeemer;
pub use self::evm::{encode_claim_swap, EvmRedeemer};
pub use self::starknet::{encode_u32_array, StarknetRedeemer};

use crate::chain::{ChainFamily, ChainRegistry, ReceiptStatus};
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::order::Order;
use crate::secret::SecretMaterial;
use crate::wallet::WalletSessions;

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Bitcoin-specific request fields
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BitcoinRedeemFields {
    pub htlc_address: Option<String>,
    pub recipient_address: Option<String>,
}

/// Uniform redemption request
#[derive(Clone, PartialEq, Eq)]
pub struct RedeemRequest {
    pub order_id: String,
    pub asset: String,
    pub escrow_address: Option<String>,
    pub swap_id: String,
    pub secret: [u8; 32],
    pub bitcoin: Option<BitcoinRedeemFields>,
}

impl RedeemRequest {
    /// Request claiming the destination leg of an order
    pub fn for_destination(order: &Order, material: &SecretMaterial) -> Self {
        let destination = &order.destination_intent;
        Self {
            order_id: order.order_id.clone(),
            asset: destination.asset.clone(),
            escrow_address: destination.escrow_address.clone(),
            swap_id: destination.swap_id.clone(),
            secret: material.secret,
            bitcoin: Some(BitcoinRedeemFields {
                htlc_address: destination
                    .escrow_address
                    .clone()
                    .or_else(|| destination.deposit_address.clone()),
                recipient_address: destination.recipient.clone(),
            }),
        }
    }

    pub(crate) fn require_escrow(&self) -> CoordinatorResult<&str> {
        self.escrow_address
            .as_deref()
            .ok_or_else(|| CoordinatorError::MissingRequiredField {
                field: "escrow_address".to_string(),
            })
    }
}

impl std::fmt::Debug for RedeemRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedeemRequest")
            .field("order_id", &self.order_id)
            .field("asset", &self.asset)
            .field("escrow_address", &self.escrow_address)
            .field("swap_id", &self.swap_id)
            .field("bitcoin", &self.bitcoin)
            .finish_non_exhaustive()
    }
}

/// How the caller learns the final outcome of a submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Finality {
    /// Submitted only; watch the receipt on this chain
    AwaitReceipt { chain_id: u64 },
    /// Broadcast outcome already known
    Broadcast,
}

/// A submitted redemption
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub family: ChainFamily,
    pub tx_hash: String,
    pub finality: Finality,
}

/// Uniform redemption result
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RedeemResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<CoordinatorResult<Submission>> for RedeemResult {
    fn from(result: CoordinatorResult<Submission>) -> Self {
        match result {
            Ok(submission) => Self {
                success: true,
                tx_hash: Some(submission.tx_hash),
                error: None,
            },
            Err(e) => Self {
                success: false,
                tx_hash: None,
                error: Some(e.to_string()),
            },
        }
    }
}

/// Family-specific redemption
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Redeemer: Send + Sync {
    async fn redeem(&self, request: &RedeemRequest) -> CoordinatorResult<Submission>;

    /// Wait for a submission's receipt; only meaningful for `AwaitReceipt` submissions
    async fn confirm(&self, submission: &Submission) -> CoordinatorResult<ReceiptStatus> {
        Err(CoordinatorError::UnsupportedOperation {
            family: submission.family.to_string(),
            operation: "receipt watching".to_string(),
        })
    }
}

/// Routes redemption requests to the redeemer of the asset's chain family
pub struct RedemptionDispatcher {
    registry: Arc<ChainRegistry>,
    redeemers: HashMap<ChainFamily, Arc<dyn Redeemer>>,
}

impl RedemptionDispatcher {
    /// Dispatcher with the standard redeemer for every family
    pub fn new(registry: Arc<ChainRegistry>, sessions: Arc<WalletSessions>) -> Self {
        let mut redeemers: HashMap<ChainFamily, Arc<dyn Redeemer>> = HashMap::new();
        redeemers.insert(
            ChainFamily::Evm,
            Arc::new(EvmRedeemer::new(registry.clone(), sessions.clone())),
        );
        redeemers.insert(
            ChainFamily::Bitcoin,
            Arc::new(BitcoinRedeemer::new(sessions.clone())),
        );
        redeemers.insert(ChainFamily::Starknet, Arc::new(StarknetRedeemer::new(sessions)));

        Self {
            registry,
            redeemers,
        }
    }

    /// Dispatcher with no redeemers; families must be added explicitly
    pub fn empty(registry: Arc<ChainRegistry>) -> Self {
        Self {
            registry,
            redeemers: HashMap::new(),
        }
    }

    pub fn with_redeemer(mut self, family: ChainFamily, redeemer: Arc<dyn Redeemer>) -> Self {
        self.redeemers.insert(family, redeemer);
        self
    }

    fn redeemer(&self, family: ChainFamily) -> CoordinatorResult<&Arc<dyn Redeemer>> {
        self.redeemers
            .get(&family)
            .ok_or_else(|| CoordinatorError::UnsupportedOperation {
                family: family.to_string(),
                operation: "redemption".to_string(),
            })
    }

    pub fn classify(&self, asset: &str) -> CoordinatorResult<ChainFamily> {
        self.registry.classify_redeem_family(asset)
    }

    /// Submit the redemption for the request's family
    pub async fn dispatch(&self, request: &RedeemRequest) -> CoordinatorResult<Submission> {
        let family = self.classify(&request.asset)?;
        info!(
            "Dispatching {} redemption for order {} (swap {})",
            family, request.order_id, request.swap_id
        );

        let result = self.redeemer(family)?.redeem(request).await;
        match &result {
            Ok(_) => crate::metrics::record_redeem_submitted(family),
            Err(e) => {
                warn!("Redemption for order {} failed: {}", request.order_id, e);
                crate::metrics::record_redeem_failed(family);
            }
        }
        result
    }

    /// Uniform-contract variant of [`dispatch`](Self::dispatch)
    pub async fn redeem(&self, request: &RedeemRequest) -> RedeemResult {
        RedeemResult::from(self.dispatch(request).await)
    }

    /// Wait for the final outcome of a receipt-tracked submission
    pub async fn confirm(&self, submission: &Submission) -> CoordinatorResult<ReceiptStatus> {
        self.redeemer(submission.family)?.confirm(submission).await
    }
}

/// Decode a `0x`-prefixed (or bare) hex value of at most 32 bytes
pub(crate) fn decode_hex_32(field: &str, value: &str) -> CoordinatorResult<[u8; 32]> {
    let trimmed = value.trim().trim_start_matches("0x");
    let invalid = |message: String| CoordinatorError::InvalidField {
        field: field.to_string(),
        message,
    };

    if trimmed.is_empty() {
        return Err(CoordinatorError::MissingRequiredField {
            field: field.to_string(),
        });
    }

    let padded = if trimmed.len() % 2 == 1 {
        format!("0{}", trimmed)
    } else {
        trimmed.to_string()
    };
    let bytes = hex::decode(&padded).map_err(|e| invalid(e.to_string()))?;
    if bytes.len() > 32 {
        return Err(invalid(format!("{} bytes exceeds 32", bytes.len())));
    }

    let mut out = [0u8; 32];
    out[32 - bytes.len()..].copy_from_slice(&bytes);
    Ok(out)
}
