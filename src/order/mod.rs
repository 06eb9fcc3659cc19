//! Order records and the order poller

pub mod poller;
pub mod types;

pub use poller::{normalize_envelope, HttpOrderSource, OrderSource};
pub use types::{IntentTransactions, Order, SwapIntent};

#[cfg(test)]
pub use poller::MockOrderSource;
