//! Status classification for order snapshots
//!
//! The phase is never stored: it is recomputed from every snapshot together
//! with two pieces of local knowledge (is the secret known, is a redemption
//! pending). Polling continuation is decided independently of the phase.

use crate::order::Order;

use serde::Serialize;
use std::fmt;

/// Derived lifecycle phase of a swap
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Initiated,
    AwaitingDeposit,
    DepositDetected,
    AwaitingRedeem,
    Redeeming,
    Complete,
}

/// Phases in lifecycle order
pub const STATUS_STEPS: [Phase; 6] = [
    Phase::Initiated,
    Phase::AwaitingDeposit,
    Phase::DepositDetected,
    Phase::AwaitingRedeem,
    Phase::Redeeming,
    Phase::Complete,
];

impl Phase {
    /// Position of this phase in [`STATUS_STEPS`]
    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Complete)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Initiated => "initiated",
            Phase::AwaitingDeposit => "awaiting_deposit",
            Phase::DepositDetected => "deposit_detected",
            Phase::AwaitingRedeem => "awaiting_redeem",
            Phase::Redeeming => "redeeming",
            Phase::Complete => "complete",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a snapshot into exactly one phase. First matching rule wins.
pub fn classify_phase(order: &Order, secret_known: bool, redeem_tx_pending: bool) -> Phase {
    let source = &order.source_intent;
    let destination = &order.destination_intent;

    if source.is_completed() || destination.is_completed() {
        return Phase::Complete;
    }

    if source.has_create_tx() {
        if destination.has_create_tx() || redeem_tx_pending {
            return Phase::Redeeming;
        }
        if secret_known {
            return Phase::AwaitingRedeem;
        }
        return Phase::DepositDetected;
    }

    if source.deposit_address.is_some() {
        return Phase::AwaitingDeposit;
    }

    Phase::Initiated
}

/// Decide whether another snapshot can still bring an expected signal
pub fn should_continue_polling(order: &Order) -> bool {
    let source = &order.source_intent;
    let destination = &order.destination_intent;

    if source.is_completed() || destination.is_completed() {
        return false;
    }
    if source.has_claim_tx() && destination.has_claim_tx() {
        return false;
    }

    let source_pre_deposit = source.state_in(&["awaiting_deposit", "deposit_detected"])
        || (source.deposit_address.is_some() && !source.has_create_tx());
    if source_pre_deposit {
        return !source.has_create_tx();
    }

    let destination_pre_redeem = destination.state_in(&["awaiting_redeem", "redeeming"])
        || (source.has_create_tx() && !destination.has_create_tx());
    if destination_pre_redeem {
        return !destination.has_create_tx();
    }

    false
}
