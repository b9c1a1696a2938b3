//! TokenBank Client Library
//!
//! Submits ledger operations through a [`Transport`] and interprets the
//! receipts that come back, including the caller's reserve-currency
//! movement.

pub mod accounting;
pub mod client;
pub mod config;
pub mod transport;

pub use accounting::ReserveDelta;
pub use client::{LedgerClient, LedgerClientBuilder};
pub use config::ClientConfig;
pub use transport::Transport;
