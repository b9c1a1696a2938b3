//! Simulation controller.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, ensure};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, warn};

use tokenbank_client::{ClientConfig, LedgerClient, LedgerClientBuilder, ReserveDelta};
use tokenbank_common::{
    Address, ErrorKind, LedgerError, Reserve, TransportFailure, Units,
};
use tokenbank_node::{LocalNode, NodeConfig};
use tokenbank_protocol::{Operation, Receipt};

use crate::accounts::SimulatedAccount;
use crate::metrics::{duration_ms, SimulationMetrics};
use crate::scenario::{AssertCondition, Scenario, ScenarioStep};

/// What happened to the most recent operation.
#[derive(Debug)]
struct StepRecord {
    caller: Address,
    attached: Reserve,
    wallet_before: Reserve,
    wallet_after: Reserve,
    result: Result<Receipt, LedgerError>,
}

/// Drives a node through scenarios or random traffic.
pub struct SimulationController {
    /// Node under test.
    node: Arc<LocalNode>,
    /// Funded accounts.
    accounts: Vec<SimulatedAccount>,
    /// Configuration for per-account clients.
    client_config: ClientConfig,
    /// Random number generator.
    rng: StdRng,
    /// Simulation metrics.
    metrics: SimulationMetrics,
    /// Most recent operation.
    last: Option<StepRecord>,
}

impl SimulationController {
    /// Start a node and fund every account with `funding`.
    pub async fn new(
        config: NodeConfig,
        accounts: Vec<SimulatedAccount>,
        funding: Reserve,
        seed: Option<u64>,
    ) -> anyhow::Result<Self> {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };

        let genesis = accounts.iter().map(|a| (a.address, funding)).collect();
        let node = LocalNode::start(config, genesis).await?;

        for account in &accounts {
            info!(
                account = %account.label,
                address = %account.address,
                funding = %funding,
                "Account funded"
            );
        }

        Ok(Self {
            node,
            accounts,
            client_config: ClientConfig::from_env(),
            rng,
            metrics: SimulationMetrics::new(),
            last: None,
        })
    }

    pub fn set_finalization_timeout(&mut self, timeout: Duration) {
        self.client_config.finalization_timeout = timeout;
    }

    pub fn node(&self) -> &Arc<LocalNode> {
        &self.node
    }

    pub fn metrics(&self) -> &SimulationMetrics {
        &self.metrics
    }

    /// Run a scenario, stopping at the first failed step.
    pub async fn run_scenario(&mut self, scenario: &Scenario) -> anyhow::Result<()> {
        info!(
            scenario = %scenario.name,
            description = %scenario.description,
            steps = scenario.steps.len(),
            "Running scenario"
        );

        if let Some(ms) = scenario.finalization_timeout_ms {
            self.set_finalization_timeout(Duration::from_millis(ms));
        }

        for (index, step) in scenario.steps.iter().enumerate() {
            debug!(index, step = ?step, "Executing step");
            self.execute_step(step)
                .await
                .map_err(|e| anyhow!("step {} ({:?}) failed: {}", index + 1, step, e))?;
        }

        info!(scenario = %scenario.name, "Scenario passed");
        Ok(())
    }

    /// Run `operations` random operations, verifying integrity after each.
    pub async fn run_random(&mut self, operations: usize) -> anyhow::Result<()> {
        ensure!(!self.accounts.is_empty(), "random mode needs at least one account");
        info!(operations, accounts = self.accounts.len(), "Running random operations");

        let price = self.node.config().price;

        for i in 0..operations {
            let caller = self.accounts[self.rng.gen_range(0..self.accounts.len())].address;
            let held = self.units_of(&caller).value();

            let (operation, attached) = match self.rng.gen_range(0..4) {
                0 => (
                    Operation::Purchase,
                    Reserve::new(self.rng.gen_range(0..price.saturating_mul(50))),
                ),
                1 => {
                    let recipient =
                        self.accounts[self.rng.gen_range(0..self.accounts.len())].address;
                    let units = Units::new(self.rng.gen_range(0..=held.saturating_add(5)));
                    (Operation::Transfer { recipient, units }, Reserve::ZERO)
                }
                2 => {
                    let units = Units::new(self.rng.gen_range(0..=held.saturating_add(5)));
                    (Operation::Withdraw { units }, Reserve::ZERO)
                }
                _ => (Operation::BalanceOf { account: caller }, Reserve::ZERO),
            };

            self.perform(caller, operation, attached).await?;

            if let Err(e) = self.node.verify_integrity() {
                bail!("integrity check failed after operation {}: {}", i + 1, e);
            }
        }

        Ok(())
    }

    /// Execute a single scenario step.
    async fn execute_step(&mut self, step: &ScenarioStep) -> anyhow::Result<()> {
        match step {
            ScenarioStep::Wait { millis } => {
                tokio::time::sleep(Duration::from_millis(*millis)).await;
            }
            ScenarioStep::Purchase { account, amount } => {
                let caller = self.address_of(account)?;
                self.perform(caller, Operation::Purchase, Reserve::new(*amount))
                    .await?;
            }
            ScenarioStep::Transfer { from, to, units } => {
                let caller = self.address_of(from)?;
                let recipient = self.address_of(to)?;
                let operation = Operation::Transfer {
                    recipient,
                    units: Units::new(*units),
                };
                self.perform(caller, operation, Reserve::ZERO).await?;
            }
            ScenarioStep::Withdraw { account, units } => {
                let caller = self.address_of(account)?;
                let operation = Operation::Withdraw {
                    units: Units::new(*units),
                };
                self.perform(caller, operation, Reserve::ZERO).await?;
            }
            ScenarioStep::BalanceOf { account } => {
                let address = self.address_of(account)?;
                let operation = Operation::BalanceOf { account: address };
                self.perform(address, operation, Reserve::ZERO).await?;
            }
            ScenarioStep::Requery => self.requery().await?,
            ScenarioStep::InjectFault { fault } => self.node.inject_fault(*fault),
            ScenarioStep::ClearFaults => self.node.clear_faults(),
            ScenarioStep::Assert { condition } => {
                self.check(condition)?;
                debug!(condition = ?condition, "Assertion held");
            }
        }

        Ok(())
    }

    /// Submit one operation as `caller` and record the outcome.
    ///
    /// Ledger rejections and transport failures are outcomes, not errors.
    async fn perform(
        &mut self,
        caller: Address,
        operation: Operation,
        attached: Reserve,
    ) -> anyhow::Result<()> {
        let client = self.client(caller)?;
        let wallet_before = self.node.wallet_balance(&caller);
        let started = Instant::now();

        let result = client.execute(operation, attached).await;
        let latency_ms = duration_ms(started.elapsed());

        match &result {
            Ok(receipt) if receipt.is_committed() => {
                self.metrics
                    .record_committed(latency_ms, receipt.fee_consumed.value());
            }
            Ok(receipt) => {
                self.metrics
                    .record_rejected(latency_ms, receipt.fee_consumed.value());
            }
            Err(LedgerError::Transport(failure)) => {
                warn!(caller = %caller, error = %failure, "Transport failure");
                self.metrics.record_transport_failure();
            }
            Err(e) => {
                warn!(caller = %caller, error = %e, "Submission refused");
                self.metrics.record_refused();
            }
        }

        self.last = Some(StepRecord {
            caller,
            attached,
            wallet_before,
            wallet_after: self.node.wallet_balance(&caller),
            result,
        });
        Ok(())
    }

    /// Replace a timed-out outcome with the receipt the node now reports.
    async fn requery(&mut self) -> anyhow::Result<()> {
        let last = self
            .last
            .as_mut()
            .ok_or_else(|| anyhow!("no operation to re-query"))?;

        let operation_id = match &last.result {
            Err(LedgerError::Transport(TransportFailure::Timeout { operation_id, .. })) => {
                *operation_id
            }
            other => bail!("last outcome is not unknown: {:?}", other),
        };

        let client = LedgerClientBuilder::new()
            .account(last.caller)
            .config(self.client_config.clone())
            .transport(self.node.clone())
            .build()?;

        match client.query_receipt(&operation_id).await? {
            Some(receipt) => {
                info!(
                    operation_id = %operation_id,
                    committed = receipt.is_committed(),
                    "Outcome recovered by re-query"
                );
                last.wallet_after = self.node.wallet_balance(&last.caller);
                last.result = Ok(receipt);
                Ok(())
            }
            None => bail!("operation {} still not finalized", operation_id),
        }
    }

    fn check(&self, condition: &AssertCondition) -> anyhow::Result<()> {
        match condition {
            AssertCondition::LastCommitted => {
                let receipt = self.last_receipt()?;
                ensure!(
                    receipt.is_committed(),
                    "expected commit, got rejection: {:?}",
                    receipt.message
                );
            }
            AssertCondition::LastRejected { error } => {
                let receipt = self.last_receipt()?;
                ensure!(!receipt.is_committed(), "expected rejection, got commit");
                if let Some(expected) = error {
                    ensure!(
                        receipt.error == Some(*expected),
                        "expected {}, got {:?}",
                        expected.code(),
                        receipt.error.map(|kind: ErrorKind| kind.code())
                    );
                }
            }
            AssertCondition::LastTimedOut => {
                let last = self.last_record()?;
                ensure!(
                    matches!(&last.result, Err(e) if e.is_outcome_unknown()),
                    "expected unknown outcome, got {:?}",
                    last.result
                );
            }
            AssertCondition::LastUnavailable => {
                let last = self.last_record()?;
                ensure!(
                    matches!(
                        &last.result,
                        Err(LedgerError::Transport(TransportFailure::NodeUnavailable))
                    ),
                    "expected node unavailable, got {:?}",
                    last.result
                );
            }
            AssertCondition::UnitsPurchased { units } => {
                let credited = self.last_receipt()?.units_purchased();
                ensure!(
                    credited == Some(Units::new(*units)),
                    "expected {} units purchased, got {:?}",
                    units,
                    credited
                );
            }
            AssertCondition::WalletChangeExcludingFee { expected } => {
                let last = self.last_record()?;
                let receipt = self.last_receipt()?;
                let change = i128::try_from(last.wallet_after.value())?
                    .checked_sub(i128::try_from(last.wallet_before.value())?)
                    .and_then(|c| c.checked_add(i128::try_from(receipt.fee_consumed.value()).ok()?))
                    .ok_or_else(|| anyhow!("wallet change overflows"))?;
                ensure!(
                    change == *expected,
                    "expected wallet change {} before fees, got {}",
                    expected,
                    change
                );
            }
            AssertCondition::WalletMatchesReceipt => {
                let last = self.last_record()?;
                let receipt = self.last_receipt()?;
                let delta = ReserveDelta::from_receipt(receipt, last.attached);
                ensure!(
                    delta.apply_to(last.wallet_before) == Some(last.wallet_after),
                    "wallet went {} -> {}, receipt accounts for {:?}",
                    last.wallet_before,
                    last.wallet_after,
                    delta.net()
                );
            }
            AssertCondition::BalanceEquals { account, units } => {
                let address = self.address_of(account)?;
                let held = self.units_of(&address);
                ensure!(
                    held == Units::new(*units),
                    "{} holds {} units, expected {}",
                    account,
                    held,
                    units
                );
            }
            AssertCondition::TotalSupply { units } => {
                let supply = self.node.ledger_snapshot().total_supply;
                ensure!(
                    supply == Units::new(*units),
                    "total supply {}, expected {}",
                    supply,
                    units
                );
            }
            AssertCondition::Integrity => self.node.verify_integrity()?,
        }

        Ok(())
    }

    fn last_record(&self) -> anyhow::Result<&StepRecord> {
        self.last
            .as_ref()
            .ok_or_else(|| anyhow!("no operation has run yet"))
    }

    fn last_receipt(&self) -> anyhow::Result<&Receipt> {
        match &self.last_record()?.result {
            Ok(receipt) => Ok(receipt),
            Err(e) => bail!("last operation has no receipt: {}", e),
        }
    }

    fn address_of(&self, label: &str) -> anyhow::Result<Address> {
        self.accounts
            .iter()
            .find(|a| a.label == label)
            .map(|a| a.address)
            .ok_or_else(|| anyhow!("unknown account: {}", label))
    }

    fn units_of(&self, address: &Address) -> Units {
        self.node
            .ledger_snapshot()
            .balances
            .get(address)
            .copied()
            .unwrap_or(Units::ZERO)
    }

    fn client(&self, account: Address) -> anyhow::Result<LedgerClient> {
        let client = LedgerClientBuilder::new()
            .account(account)
            .config(self.client_config.clone())
            .transport(self.node.clone())
            .build()?;
        Ok(client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::AccountFactory;

    async fn controller(labels: &[&str]) -> SimulationController {
        let accounts = labels
            .iter()
            .map(|label| SimulatedAccount::new(*label).unwrap())
            .collect();
        SimulationController::new(
            NodeConfig::default(),
            accounts,
            Reserve::new(1_000_000_000),
            Some(7),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_builtin_scenarios_pass() {
        for name in Scenario::builtin_names() {
            let scenario = Scenario::load(name).unwrap();
            let labels: Vec<&str> = scenario.accounts.iter().map(String::as_str).collect();
            let mut controller = controller(&labels).await;

            controller.run_scenario(&scenario).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_failed_assertion_stops_scenario() {
        let mut controller = controller(&["alice"]).await;
        let scenario = Scenario {
            name: "wrong".to_string(),
            description: "expects too many units".to_string(),
            accounts: vec!["alice".to_string()],
            finalization_timeout_ms: None,
            steps: vec![
                ScenarioStep::Purchase {
                    account: "alice".to_string(),
                    amount: 1_000,
                },
                ScenarioStep::Assert {
                    condition: AssertCondition::UnitsPurchased { units: 2 },
                },
            ],
        };

        let err = controller.run_scenario(&scenario).await.unwrap_err();
        assert!(err.to_string().contains("step 2"));
    }

    #[tokio::test]
    async fn test_random_run_keeps_integrity() {
        let accounts = AccountFactory::create_accounts(4).unwrap();
        let mut controller = SimulationController::new(
            NodeConfig::default(),
            accounts,
            Reserve::new(1_000_000_000),
            Some(42),
        )
        .await
        .unwrap();

        controller.run_random(50).await.unwrap();

        let metrics = controller.metrics();
        assert_eq!(metrics.attempted, 50);
        assert_eq!(metrics.transport_failures, 0);
        assert_eq!(
            metrics.committed + metrics.rejected + metrics.refused,
            50
        );
    }
}
