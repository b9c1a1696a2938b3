//! Simulated account holders.

use sha2::{Digest, Sha256};
use tokenbank_common::Address;

/// Addresses used by the reference exchange walkthrough.
pub const ALICE: &str = "0xcd2a3d9f938e13cd947ec05abc7fe734df8dd826";
pub const BOB: &str = "0xdedb49385ad5b94a16f236a6890cf9e0b1e30392";

/// A named account taking part in a simulation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedAccount {
    /// Name used in scenarios and logs.
    pub label: String,
    pub address: Address,
}

impl SimulatedAccount {
    /// Resolve a label to an account.
    ///
    /// `alice` and `bob` map to the walkthrough addresses, a hex string is
    /// taken as-is, and any other label gets the leading bytes of its SHA-256.
    pub fn new(label: impl Into<String>) -> anyhow::Result<Self> {
        let label = label.into();
        let address = match label.as_str() {
            "alice" => ALICE.parse()?,
            "bob" => BOB.parse()?,
            other if other.starts_with("0x") => other.parse()?,
            other => Address::from_digest(&Sha256::digest(other.as_bytes()))?,
        };

        Ok(Self { label, address })
    }
}

/// Account factory for random runs.
pub struct AccountFactory;

impl AccountFactory {
    /// Create N accounts, starting with alice and bob.
    pub fn create_accounts(count: usize) -> anyhow::Result<Vec<SimulatedAccount>> {
        let names = ["alice", "bob", "carol", "dave", "erin", "frank"];

        (0..count)
            .map(|i| match names.get(i) {
                Some(name) => SimulatedAccount::new(*name),
                None => SimulatedAccount::new(format!("account-{}", i + 1)),
            })
            .collect()
    }
}
