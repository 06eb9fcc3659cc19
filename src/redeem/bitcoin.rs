//! Bitcoin redemption: script-level spend of the HTLC output

use super::{Finality, RedeemRequest, Redeemer, Submission};
use crate::chain::ChainFamily;
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::wallet::WalletSessions;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

pub struct BitcoinRedeemer {
    sessions: Arc<WalletSessions>,
}

impl BitcoinRedeemer {
    pub fn new(sessions: Arc<WalletSessions>) -> Self {
        Self { sessions }
    }
}

fn required<'a>(value: Option<&'a String>, field: &str) -> CoordinatorResult<&'a str> {
    value
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| CoordinatorError::MissingRequiredField {
            field: field.to_string(),
        })
}

#[async_trait]
impl Redeemer for BitcoinRedeemer {
    async fn redeem(&self, request: &RedeemRequest) -> CoordinatorResult<Submission> {
        let fields = request.bitcoin.as_ref();
        let htlc_address = required(fields.and_then(|f| f.htlc_address.as_ref()), "htlc_address")?;
        let recipient_address = required(
            fields.and_then(|f| f.recipient_address.as_ref()),
            "recipient_address",
        )?;

        let wallet = self.sessions.bitcoin().await.ok_or_else(|| {
            CoordinatorError::UnsupportedOperation {
                family: ChainFamily::Bitcoin.to_string(),
                operation: "HTLC redemption (no bitcoin wallet connected)".to_string(),
            }
        })?;

        let txid = wallet
            .redeem_htlc(htlc_address, recipient_address, &request.secret)
            .await?;

        info!(
            "Bitcoin HTLC {} redeemed to {}: {}",
            htlc_address, recipient_address, txid
        );
        Ok(Submission {
            family: ChainFamily::Bitcoin,
            tx_hash: txid,
            finality: Finality::Broadcast,
        })
    }
}
