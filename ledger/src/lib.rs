//! TokenBank Ledger
//!
//! Fixed-price token ledger: reserve currency in, units out, with every
//! committed transition recorded in a hash-chained, append-only journal.

pub mod balance;
pub mod engine;
pub mod journal;

pub use balance::{BalanceBook, BalanceChange, BalanceChangeType};
pub use engine::{Ledger, LedgerSnapshot, Purchase, Withdrawal};
pub use journal::{EntryKind, Journal, JournalEntry, GENESIS_HASH};
