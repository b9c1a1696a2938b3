//! Simulation scenarios.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tokenbank_common::ErrorKind;
use tokenbank_node::Fault;

/// A simulation scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Scenario name.
    pub name: String,
    /// Description.
    pub description: String,
    /// Account labels funded at genesis.
    pub accounts: Vec<String>,
    /// Overrides the client finalization timeout.
    #[serde(default)]
    pub finalization_timeout_ms: Option<u64>,
    /// Steps in the scenario.
    pub steps: Vec<ScenarioStep>,
}

/// A step in a scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioStep {
    /// Wait for a duration.
    Wait { millis: u64 },
    /// Buy units with reserve currency.
    Purchase { account: String, amount: u128 },
    /// Send units between accounts.
    Transfer { from: String, to: String, units: u128 },
    /// Redeem units.
    Withdraw { account: String, units: u128 },
    /// Read a unit balance through the node.
    BalanceOf { account: String },
    /// Look up the receipt of the last operation whose outcome was unknown.
    Requery,
    /// Inject a fault.
    InjectFault { fault: Fault },
    /// Clear all faults.
    ClearFaults,
    /// Assert a condition.
    Assert { condition: AssertCondition },
}

/// Conditions that can be asserted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssertCondition {
    /// Last operation committed.
    LastCommitted,
    /// Last operation finalized as rejected, optionally of a given kind.
    LastRejected { error: Option<ErrorKind> },
    /// Last operation's outcome is unknown.
    LastTimedOut,
    /// Last operation never reached the node.
    LastUnavailable,
    /// Last purchase credited this many units.
    UnitsPurchased { units: u128 },
    /// Caller's wallet moved by `expected`, not counting the fee.
    WalletChangeExcludingFee { expected: i128 },
    /// Caller's wallet moved exactly as its receipt accounts for.
    WalletMatchesReceipt,
    /// Unit balance equals.
    BalanceEquals { account: String, units: u128 },
    /// Total supply equals.
    TotalSupply { units: u128 },
    /// Ledger and system conservation hold.
    Integrity,
}

impl Scenario {
    /// Load a built-in scenario by name, or a JSON file by path.
    pub fn load(name: &str) -> anyhow::Result<Self> {
        match name {
            "token-exchange" => Ok(Self::token_exchange()),
            "overdraft" => Ok(Self::overdraft()),
            "transport-failure" => Ok(Self::transport_failure()),
            path if path.ends_with(".json") => Self::from_file(Path::new(path)),
            _ => Err(anyhow::anyhow!(
                "Unknown scenario: {} (built-in: {})",
                name,
                Self::builtin_names().join(", ")
            )),
        }
    }

    /// Parse a scenario from a JSON file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let scenario = serde_json::from_str(&contents)?;
        Ok(scenario)
    }

    pub fn builtin_names() -> &'static [&'static str] {
        &["token-exchange", "overdraft", "transport-failure"]
    }

    /// Buy, send and withdraw between two holders at price 1000.
    fn token_exchange() -> Self {
        use AssertCondition::*;

        Self {
            name: "token-exchange".to_string(),
            description: "Buy with a remainder, transfer, and withdraw at the fixed price".to_string(),
            accounts: vec!["alice".to_string(), "bob".to_string()],
            finalization_timeout_ms: None,
            steps: vec![
                ScenarioStep::Assert {
                    condition: BalanceEquals {
                        account: "alice".to_string(),
                        units: 0,
                    },
                },
                ScenarioStep::Purchase {
                    account: "alice".to_string(),
                    amount: 100_111,
                },
                ScenarioStep::Assert { condition: LastCommitted },
                ScenarioStep::Assert {
                    condition: UnitsPurchased { units: 100 },
                },
                ScenarioStep::Assert {
                    condition: WalletChangeExcludingFee { expected: -100_111 },
                },
                ScenarioStep::Assert {
                    condition: WalletMatchesReceipt,
                },
                ScenarioStep::Purchase {
                    account: "bob".to_string(),
                    amount: 50_000,
                },
                ScenarioStep::Assert {
                    condition: UnitsPurchased { units: 50 },
                },
                ScenarioStep::Transfer {
                    from: "bob".to_string(),
                    to: "alice".to_string(),
                    units: 25,
                },
                ScenarioStep::Assert { condition: LastCommitted },
                ScenarioStep::Assert {
                    condition: BalanceEquals {
                        account: "bob".to_string(),
                        units: 25,
                    },
                },
                ScenarioStep::Assert {
                    condition: BalanceEquals {
                        account: "alice".to_string(),
                        units: 125,
                    },
                },
                ScenarioStep::Withdraw {
                    account: "alice".to_string(),
                    units: 100,
                },
                ScenarioStep::Assert {
                    condition: WalletChangeExcludingFee { expected: 100_000 },
                },
                ScenarioStep::Assert {
                    condition: BalanceEquals {
                        account: "alice".to_string(),
                        units: 25,
                    },
                },
                ScenarioStep::Assert {
                    condition: TotalSupply { units: 50 },
                },
                ScenarioStep::Assert { condition: Integrity },
            ],
        }
    }

    /// Operations beyond a holder's balance.
    fn overdraft() -> Self {
        use AssertCondition::*;

        Self {
            name: "overdraft".to_string(),
            description: "Transfers and withdrawals beyond balance, and a purchase below the price"
                .to_string(),
            accounts: vec!["alice".to_string(), "bob".to_string()],
            finalization_timeout_ms: None,
            steps: vec![
                ScenarioStep::Purchase {
                    account: "alice".to_string(),
                    amount: 999,
                },
                ScenarioStep::Assert { condition: LastCommitted },
                ScenarioStep::Assert {
                    condition: UnitsPurchased { units: 0 },
                },
                ScenarioStep::Assert {
                    condition: WalletChangeExcludingFee { expected: -999 },
                },
                ScenarioStep::Transfer {
                    from: "alice".to_string(),
                    to: "bob".to_string(),
                    units: 1,
                },
                ScenarioStep::Assert {
                    condition: LastRejected {
                        error: Some(ErrorKind::InsufficientBalance),
                    },
                },
                ScenarioStep::Assert {
                    condition: WalletChangeExcludingFee { expected: 0 },
                },
                ScenarioStep::Purchase {
                    account: "bob".to_string(),
                    amount: 10_000,
                },
                ScenarioStep::Withdraw {
                    account: "bob".to_string(),
                    units: 11,
                },
                ScenarioStep::Assert {
                    condition: LastRejected {
                        error: Some(ErrorKind::InsufficientBalance),
                    },
                },
                ScenarioStep::Assert {
                    condition: WalletMatchesReceipt,
                },
                ScenarioStep::Assert {
                    condition: BalanceEquals {
                        account: "bob".to_string(),
                        units: 10,
                    },
                },
                ScenarioStep::Assert { condition: Integrity },
            ],
        }
    }

    /// Lost connectivity and lost finalization.
    fn transport_failure() -> Self {
        use AssertCondition::*;

        Self {
            name: "transport-failure".to_string(),
            description: "Offline node, withheld receipts, and re-query of unknown outcomes"
                .to_string(),
            accounts: vec!["alice".to_string(), "bob".to_string()],
            finalization_timeout_ms: Some(200),
            steps: vec![
                ScenarioStep::InjectFault {
                    fault: Fault::Offline,
                },
                ScenarioStep::Purchase {
                    account: "alice".to_string(),
                    amount: 5_000,
                },
                ScenarioStep::Assert {
                    condition: LastUnavailable,
                },
                ScenarioStep::ClearFaults,
                ScenarioStep::Purchase {
                    account: "alice".to_string(),
                    amount: 5_000,
                },
                ScenarioStep::Assert { condition: LastCommitted },
                ScenarioStep::InjectFault {
                    fault: Fault::WithholdReceipts,
                },
                ScenarioStep::Transfer {
                    from: "alice".to_string(),
                    to: "bob".to_string(),
                    units: 2,
                },
                ScenarioStep::Assert { condition: LastTimedOut },
                ScenarioStep::Requery,
                ScenarioStep::Assert { condition: LastCommitted },
                ScenarioStep::ClearFaults,
                ScenarioStep::Assert {
                    condition: BalanceEquals {
                        account: "bob".to_string(),
                        units: 2,
                    },
                },
                ScenarioStep::Wait { millis: 10 },
                ScenarioStep::Assert { condition: Integrity },
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_load() {
        for name in Scenario::builtin_names() {
            let scenario = Scenario::load(name).unwrap();
            assert_eq!(scenario.name, *name);
            assert!(!scenario.steps.is_empty());
        }
        assert!(Scenario::load("nope").is_err());
    }

    #[test]
    fn test_json_format() {
        let json = r#"{
            "name": "custom",
            "description": "one purchase",
            "accounts": ["alice"],
            "steps": [
                { "purchase": { "account": "alice", "amount": 1500 } },
                { "assert": { "condition": { "units_purchased": { "units": 1 } } } },
                { "inject_fault": { "fault": "withhold_receipts" } },
                { "assert": { "condition": { "last_rejected": { "error": "INSUFFICIENT_BALANCE" } } } },
                "requery",
                "clear_faults"
            ]
        }"#;

        let scenario: Scenario = serde_json::from_str(json).unwrap();
        assert_eq!(scenario.finalization_timeout_ms, None);
        assert_eq!(scenario.steps.len(), 6);
        assert!(matches!(
            scenario.steps[2],
            ScenarioStep::InjectFault {
                fault: Fault::WithholdReceipts
            }
        ));
    }
}
