//! HTLC swap coordinator
//!
//! Drives a two-leg hash time-locked swap from order creation to redemption:
//! polls the order backend, classifies each snapshot into a lifecycle phase,
//! derives the swap secret from a wallet signature and submits exactly one
//! redemption on the destination chain.

pub mod api;
pub mod chain;
pub mod config;
pub mod coordination;
pub mod error;
pub mod metrics;
pub mod order;
pub mod redeem;
pub mod secret;
pub mod status;
pub mod wallet;

pub use config::Settings;
pub use coordination::{OrderView, SwapCoordinator};
pub use error::{CoordinatorError, CoordinatorResult};
pub use status::{classify_phase, should_continue_polling, Phase, STATUS_STEPS};
