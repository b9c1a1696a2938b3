//! TokenBank Simulator
//!
//! Runs scripted or random exchange traffic against an in-process node and
//! checks conservation along the way.

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tokenbank_common::Reserve;
use tokenbank_node::NodeConfig;

mod accounts;
mod controller;
mod metrics;
mod scenario;

use accounts::{AccountFactory, SimulatedAccount};
use controller::SimulationController;
use scenario::Scenario;

/// TokenBank Simulator CLI
#[derive(Parser, Debug)]
#[command(name = "simulator")]
#[command(about = "TokenBank scenario runner and exchange simulator")]
struct Args {
    /// Built-in scenario name or path to a JSON scenario file
    #[arg(short, long)]
    scenario: Option<String>,

    /// Reserve currency per unit (overrides TOKEN_PRICE)
    #[arg(long)]
    price: Option<u128>,

    /// Number of accounts in random mode
    #[arg(short, long, default_value = "4")]
    accounts: usize,

    /// Number of operations in random mode
    #[arg(short, long, default_value = "100")]
    operations: usize,

    /// Reserve currency each account starts with
    #[arg(long, default_value = "1000000000")]
    funding: u128,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    /// Print the final ledger snapshot as JSON
    #[arg(long)]
    snapshot: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = NodeConfig::from_env();
    if let Some(price) = args.price {
        config.price = price;
    }

    // Initialize logging
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone()),
    );
    if args.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(anyhow::anyhow!("Configuration error: {}", e));
    }

    info!(price = %config.price, "Starting TokenBank Simulator");

    let scenario = args.scenario.as_deref().map(Scenario::load).transpose()?;
    let accounts = match &scenario {
        Some(scenario) => scenario
            .accounts
            .iter()
            .map(|label| SimulatedAccount::new(label.as_str()))
            .collect::<anyhow::Result<Vec<_>>>()?,
        None => AccountFactory::create_accounts(args.accounts)?,
    };

    let mut controller =
        SimulationController::new(config, accounts, Reserve::new(args.funding), args.seed).await?;

    let outcome = match &scenario {
        Some(scenario) => controller.run_scenario(scenario).await,
        None => controller.run_random(args.operations).await,
    };

    let metrics = controller.metrics();
    info!(
        attempted = metrics.attempted,
        committed = metrics.committed,
        rejected = metrics.rejected,
        refused = metrics.refused,
        transport_failures = metrics.transport_failures,
        fees_paid = %metrics.fees_paid,
        average_latency_ms = metrics.average_latency_ms(),
        p99_latency_ms = metrics.p99_latency_ms(),
        commit_rate = metrics.commit_rate(),
        "Simulation complete"
    );

    if args.snapshot {
        let snapshot = controller.node().ledger_snapshot();
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    }

    controller.node().shutdown().await?;
    outcome
}
