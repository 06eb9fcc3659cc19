//! Swap lifecycle coordination
//!
//! The coordination layer:
//! 1. Polls each tracked order for snapshots
//! 2. Classifies the snapshot into a phase
//! 3. Derives the swap secret once the source leg is funded
//! 4. Dispatches exactly one redemption once the destination leg is funded

pub mod engine;
pub mod registry;

pub use engine::{Command, CoordinatorContext, Lifecycle, OrderCoordinator, OrderHandle, OrderView};
pub use registry::SwapCoordinator;
