//! TokenBank Node
//!
//! An in-process execution environment for the ledger. It totally orders
//! submissions, charges fees from reserve-currency wallets, and finalizes
//! every operation with a receipt. Faults can be injected to exercise
//! client behavior when finalization is lost or the node is unreachable.

pub mod config;
pub mod metrics;
pub mod node;
pub mod state;
pub mod wallets;

pub use config::{FeeSchedule, NodeConfig};
pub use metrics::{MetricsSnapshot, NodeMetrics};
pub use node::{Fault, LocalNode};
pub use state::NodeState;
pub use wallets::Wallets;
