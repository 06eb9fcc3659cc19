//! Order and swap intent records as served by the order backend

use crate::error::{CoordinatorError, CoordinatorResult};

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Transaction hashes observed for one leg
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentTransactions {
    #[serde(default, alias = "create_tx", deserialize_with = "non_empty")]
    pub create_tx: Option<String>,
    #[serde(default, alias = "cancel_tx", deserialize_with = "non_empty")]
    pub cancel_tx: Option<String>,
    #[serde(default, alias = "claim_tx", deserialize_with = "non_empty")]
    pub claim_tx: Option<String>,
}

/// One leg (source or destination) of a swap
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapIntent {
    #[serde(default, alias = "swap_id")]
    pub swap_id: String,
    pub asset: String,
    #[serde(default, alias = "token_address", deserialize_with = "non_empty")]
    pub token_address: Option<String>,
    #[serde(default, deserialize_with = "non_empty")]
    pub creator: Option<String>,
    #[serde(default, deserialize_with = "non_empty")]
    pub recipient: Option<String>,
    #[serde(default, alias = "created_at", deserialize_with = "timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, alias = "expiry_blocks")]
    pub expiry_blocks: Option<u64>,
    #[serde(default, with = "amount")]
    pub amount: u128,
    #[serde(default, alias = "completed_at", deserialize_with = "timestamp")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, alias = "deposit_address", deserialize_with = "non_empty")]
    pub deposit_address: Option<String>,
    #[serde(default, alias = "commitment_hash", deserialize_with = "non_empty")]
    pub commitment_hash: Option<String>,
    #[serde(default, alias = "escrow_address", deserialize_with = "non_empty")]
    pub escrow_address: Option<String>,
    #[serde(default, deserialize_with = "non_empty")]
    pub state: Option<String>,
    #[serde(default)]
    pub transactions: IntentTransactions,
}

impl SwapIntent {
    pub fn has_create_tx(&self) -> bool {
        self.transactions.create_tx.is_some()
    }

    pub fn has_claim_tx(&self) -> bool {
        self.transactions.claim_tx.is_some()
    }

    pub fn is_completed(&self) -> bool {
        self.state_in(&["completed"])
    }

    /// Check the backend state string against a set of values
    pub fn state_in(&self, states: &[&str]) -> bool {
        self.state
            .as_deref()
            .map(|s| states.iter().any(|candidate| s.eq_ignore_ascii_case(candidate)))
            .unwrap_or(false)
    }
}

/// A two-leg swap order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    #[serde(rename = "orderId", alias = "order_id")]
    pub order_id: String,
    #[serde(alias = "sourceIntent")]
    pub source_intent: SwapIntent,
    #[serde(alias = "destinationIntent")]
    pub destination_intent: SwapIntent,
    #[serde(
        default,
        rename = "createdAt",
        alias = "created_at",
        deserialize_with = "timestamp"
    )]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(
        default,
        rename = "updatedAt",
        alias = "updated_at",
        deserialize_with = "timestamp"
    )]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Order {
    /// Reject snapshots where a leg was claimed before it was created
    pub fn validate(&self) -> CoordinatorResult<()> {
        for (leg, intent) in [
            ("source_intent", &self.source_intent),
            ("destination_intent", &self.destination_intent),
        ] {
            if intent.has_claim_tx() && !intent.has_create_tx() {
                return Err(CoordinatorError::MalformedResponse(format!(
                    "order {}: {} has claimTx without createTx",
                    self.order_id, leg
                )));
            }
        }
        Ok(())
    }

    /// Nonce bound into the secret-derivation message
    pub fn secret_nonce(&self) -> &str {
        self.source_intent
            .commitment_hash
            .as_deref()
            .unwrap_or(&self.order_id)
    }
}

fn non_empty<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.trim().is_empty()))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TimestampRepr {
    Unix(i64),
    Text(String),
}

fn timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    match Option::<TimestampRepr>::deserialize(deserializer)? {
        None => Ok(None),
        Some(TimestampRepr::Unix(secs)) => Utc
            .timestamp_opt(secs, 0)
            .single()
            .map(Some)
            .ok_or_else(|| D::Error::custom(format!("invalid unix timestamp {}", secs))),
        Some(TimestampRepr::Text(text)) if text.trim().is_empty() => Ok(None),
        Some(TimestampRepr::Text(text)) => DateTime::parse_from_rfc3339(&text)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(D::Error::custom),
    }
}

/// Amounts travel as decimal strings to keep full integer precision
mod amount {
    use super::*;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum AmountRepr {
        Number(u64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        use serde::de::Error;

        match Option::<AmountRepr>::deserialize(deserializer)? {
            None => Ok(0),
            Some(AmountRepr::Number(n)) => Ok(n as u128),
            Some(AmountRepr::Text(text)) => text.trim().parse().map_err(D::Error::custom),
        }
    }
}
