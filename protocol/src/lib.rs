//! TokenBank Protocol Messages
//!
//! Message types exchanged between a submitting client and the environment
//! that orders and finalizes operations against the ledger.

pub mod messages;

pub use messages::*;
