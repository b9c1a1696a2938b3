//! In-process node that orders, charges and finalizes ledger operations.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use tokenbank_client::Transport;
use tokenbank_common::{
    Address, LedgerError, OperationId, Reserve, Result, TransportFailure,
};
use tokenbank_ledger::{JournalEntry, Ledger, LedgerSnapshot};
use tokenbank_protocol::{Operation, OperationOutcome, OperationRequest, PendingHandle, Receipt};

use crate::config::NodeConfig;
use crate::metrics::{MetricsSnapshot, NodeMetrics, SharedMetrics};
use crate::state::NodeState;
use crate::wallets::Wallets;

/// Failure modes that can be switched on for testing clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Fault {
    /// Every call fails with `NodeUnavailable`.
    Offline,
    /// Operations still commit, but `await_finalization` does not return.
    WithholdReceipts,
}

/// Ledger and wallets, always locked together.
struct Books {
    ledger: Ledger,
    wallets: Wallets,
}

struct Queued {
    request: OperationRequest,
    fee: Reserve,
}

/// State shared with the sequencer task.
struct Shared {
    config: NodeConfig,
    state: RwLock<NodeState>,
    books: Mutex<Books>,
    /// Every accepted operation id, finalized or not.
    submitted: DashMap<OperationId, ()>,
    receipts: DashMap<OperationId, Receipt>,
    finalized: Notify,
    offline: AtomicBool,
    withhold: AtomicBool,
    metrics: SharedMetrics,
}

/// Sandbox execution environment for a single ledger.
///
/// Submissions are queued and applied one at a time by a sequencer task, in
/// arrival order. Each operation's fee and attached amount are held from the
/// caller's wallet at submit; the fee is kept whatever the outcome.
pub struct LocalNode {
    shared: Arc<Shared>,
    queue_tx: Mutex<Option<mpsc::Sender<Queued>>>,
    sequencer: Mutex<Option<JoinHandle<()>>>,
}

impl LocalNode {
    /// Start a node with funded wallets. Must be called inside a Tokio runtime.
    #[instrument(skip(config, genesis), fields(price = %config.price))]
    pub async fn start(config: NodeConfig, genesis: Vec<(Address, Reserve)>) -> Result<Arc<Self>> {
        config.validate().map_err(LedgerError::ConfigurationError)?;

        let ledger = Ledger::with_price(config.price)?;
        let wallets = Wallets::genesis(genesis)?;
        let (queue_tx, queue_rx) = mpsc::channel(config.queue_capacity);

        info!(
            genesis_total = %wallets.genesis_total(),
            queue_capacity = config.queue_capacity,
            "Starting node"
        );

        let shared = Arc::new(Shared {
            config,
            state: RwLock::new(NodeState::Starting),
            books: Mutex::new(Books { ledger, wallets }),
            submitted: DashMap::new(),
            receipts: DashMap::new(),
            finalized: Notify::new(),
            offline: AtomicBool::new(false),
            withhold: AtomicBool::new(false),
            metrics: Arc::new(NodeMetrics::new()),
        });

        let sequencer = tokio::spawn(run_sequencer(shared.clone(), queue_rx));
        *shared.state.write() = NodeState::Running;

        info!("Node running");
        Ok(Arc::new(Self {
            shared,
            queue_tx: Mutex::new(Some(queue_tx)),
            sequencer: Mutex::new(Some(sequencer)),
        }))
    }

    /// Stop accepting submissions, finalize everything already queued, and
    /// stop the sequencer.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) -> Result<()> {
        {
            let mut state = self.shared.state.write();
            if !state.accepts_requests() {
                return Ok(());
            }
            *state = NodeState::ShuttingDown;
        }
        info!(in_flight = self.metrics().in_flight, "Shutting down node");

        self.queue_tx.lock().take();

        let sequencer = self.sequencer.lock().take();
        if let Some(handle) = sequencer {
            if let Err(e) = handle.await {
                error!(error = %e, "Sequencer task failed");
                return Err(LedgerError::IntegrityViolation(format!(
                    "sequencer task failed: {e}"
                )));
            }
        }

        info!("Node stopped");
        Ok(())
    }

    pub fn state(&self) -> NodeState {
        *self.shared.state.read()
    }

    pub fn config(&self) -> &NodeConfig {
        &self.shared.config
    }

    /// Switch on a fault.
    pub fn inject_fault(&self, fault: Fault) {
        warn!(fault = ?fault, "Fault injected");
        match fault {
            Fault::Offline => self.shared.offline.store(true, Ordering::SeqCst),
            Fault::WithholdReceipts => self.shared.withhold.store(true, Ordering::SeqCst),
        }
    }

    /// Switch off all faults and release withheld receipts.
    pub fn clear_faults(&self) {
        self.shared.offline.store(false, Ordering::SeqCst);
        self.shared.withhold.store(false, Ordering::SeqCst);
        self.shared.finalized.notify_waiters();
        info!("Faults cleared");
    }

    pub fn active_faults(&self) -> Vec<Fault> {
        let mut faults = Vec::new();
        if self.shared.offline.load(Ordering::SeqCst) {
            faults.push(Fault::Offline);
        }
        if self.shared.withhold.load(Ordering::SeqCst) {
            faults.push(Fault::WithholdReceipts);
        }
        faults
    }

    /// Reserve-currency wallet balance of `account`, ignoring faults.
    pub fn wallet_balance(&self, account: &Address) -> Reserve {
        self.shared.books.lock().wallets.balance(account)
    }

    /// Total fees charged so far.
    pub fn fees_collected(&self) -> Reserve {
        self.shared.books.lock().wallets.fees_collected()
    }

    pub fn ledger_snapshot(&self) -> LedgerSnapshot {
        self.shared.books.lock().ledger.snapshot()
    }

    /// Copy of the ledger journal.
    pub fn journal_entries(&self) -> Vec<JournalEntry> {
        self.shared.books.lock().ledger.journal().entries().to_vec()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    pub fn prometheus_metrics(&self) -> String {
        self.shared.metrics.to_prometheus()
    }

    /// Check ledger integrity and that wallets, escrow, ledger reserve and
    /// fees together still equal the genesis funding.
    pub fn verify_integrity(&self) -> Result<()> {
        let books = self.shared.books.lock();
        books.ledger.verify_integrity()?;

        let wallets = &books.wallets;
        let accounted = wallets
            .total()
            .and_then(|total| total.checked_add(wallets.escrow()))
            .and_then(|total| total.checked_add(books.ledger.reserve()))
            .and_then(|total| total.checked_add(wallets.fees_collected()))
            .ok_or_else(|| LedgerError::IntegrityViolation("system total overflows".into()))?;

        if accounted != wallets.genesis_total() {
            error!(
                accounted = %accounted,
                genesis = %wallets.genesis_total(),
                "Reserve currency not conserved"
            );
            return Err(LedgerError::IntegrityViolation(format!(
                "accounted reserve {accounted} differs from genesis {}",
                wallets.genesis_total()
            )));
        }

        Ok(())
    }

    fn ensure_reachable(&self) -> Result<()> {
        if self.shared.offline.load(Ordering::SeqCst) {
            return Err(TransportFailure::NodeUnavailable.into());
        }
        Ok(())
    }

    async fn admit(&self, request: OperationRequest) -> Result<PendingHandle> {
        self.ensure_reachable()?;
        if !self.state().accepts_requests() {
            return Err(TransportFailure::NodeUnavailable.into());
        }

        request.validate()?;

        let operation_id = request.operation_id;
        let caller = request.caller;
        let fee = self
            .shared
            .config
            .fee_schedule
            .fee_for(request.operation.kind())
            .ok_or_else(|| LedgerError::ArithmeticOverflow("fee".into()))?;
        let required = request
            .attached
            .checked_add(fee)
            .ok_or_else(|| LedgerError::ArithmeticOverflow("attached amount plus fee".into()))?;

        match self.shared.submitted.entry(operation_id) {
            Entry::Occupied(_) => return Err(LedgerError::DuplicateOperation(operation_id)),
            Entry::Vacant(entry) => {
                entry.insert(());
            }
        }

        let held = self.shared.books.lock().wallets.hold(caller, required);
        if let Err(e) = held {
            self.shared.submitted.remove(&operation_id);
            return Err(e);
        }

        self.shared.metrics.operation_submitted();

        let queue_tx = self.queue_tx.lock().clone();
        let queued = Queued { request, fee };
        let sent = match queue_tx {
            Some(tx) => tx.send(queued).await.is_ok(),
            None => false,
        };

        if !sent {
            let refunded = self.shared.books.lock().wallets.refund(caller, required);
            if let Err(e) = refunded {
                error!(error = %e, "Refund after closed queue failed");
            }
            self.shared.submitted.remove(&operation_id);
            self.shared.metrics.operation_unqueued();
            return Err(TransportFailure::NodeUnavailable.into());
        }

        debug!(fee = %fee, "Operation queued");
        Ok(PendingHandle { operation_id })
    }
}

#[async_trait]
impl Transport for LocalNode {
    #[instrument(
        skip(self, request),
        fields(
            operation_id = %request.operation_id,
            caller = %request.caller,
            op = request.operation.kind().name()
        )
    )]
    async fn submit(&self, request: OperationRequest) -> Result<PendingHandle> {
        let result = self.admit(request).await;
        if let Err(e) = &result {
            self.shared.metrics.operation_refused();
            warn!(error = %e, "Submission refused");
        }
        result
    }

    async fn await_finalization(&self, handle: &PendingHandle) -> Result<Receipt> {
        let operation_id = handle.operation_id;
        if !self.shared.submitted.contains_key(&operation_id) {
            return Err(LedgerError::UnknownOperation(operation_id));
        }

        loop {
            let notified = self.shared.finalized.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if !self.shared.withhold.load(Ordering::SeqCst) {
                if let Some(receipt) = self.shared.receipts.get(&operation_id) {
                    return Ok(receipt.value().clone());
                }
                if self.state().is_terminal() {
                    return Err(TransportFailure::NodeUnavailable.into());
                }
            }

            notified.await;
        }
    }

    async fn query_receipt(&self, operation_id: &OperationId) -> Result<Option<Receipt>> {
        self.ensure_reachable()?;
        if !self.shared.submitted.contains_key(operation_id) {
            return Err(LedgerError::UnknownOperation(*operation_id));
        }
        Ok(self
            .shared
            .receipts
            .get(operation_id)
            .map(|receipt| receipt.value().clone()))
    }

    async fn reserve_balance(&self, account: &Address) -> Result<Reserve> {
        self.ensure_reachable()?;
        Ok(self.wallet_balance(account))
    }
}

async fn run_sequencer(shared: Arc<Shared>, mut queue_rx: mpsc::Receiver<Queued>) {
    debug!("Sequencer started");

    while let Some(queued) = queue_rx.recv().await {
        let receipt = shared.apply(queued);
        shared.receipts.insert(receipt.operation_id, receipt);
        shared.finalized.notify_waiters();
    }

    *shared.state.write() = NodeState::Stopped;
    shared.finalized.notify_waiters();
    debug!("Sequencer stopped");
}

impl Shared {
    /// Apply one queued operation and settle its escrow.
    fn apply(&self, queued: Queued) -> Receipt {
        let Queued { request, fee } = queued;
        let caller = request.caller;
        let attached = request.attached;
        let kind = request.operation.kind();

        let mut books = self.books.lock();
        let Books { ledger, wallets } = &mut *books;

        // Escrow was funded from genesis money and fees never exceed it, so
        // settlement cannot fail while conservation holds.
        if let Err(e) = wallets.collect_fee(fee) {
            error!(operation_id = %request.operation_id, error = %e, "Fee settlement failed");
        }

        let result = match &request.operation {
            Operation::Purchase => ledger.purchase(caller, attached).map(|purchase| {
                (
                    OperationOutcome::Purchased {
                        units: purchase.units,
                        remainder: purchase.remainder,
                    },
                    Some(purchase.sequence),
                )
            }),
            Operation::Transfer { recipient, units } => ledger
                .transfer(caller, *recipient, *units)
                .map(|sequence| {
                    (
                        OperationOutcome::Transferred {
                            recipient: *recipient,
                            units: *units,
                        },
                        Some(sequence),
                    )
                }),
            Operation::Withdraw { units } => ledger.withdraw(caller, *units).map(|withdrawal| {
                (
                    OperationOutcome::Withdrawn {
                        units: withdrawal.units,
                        reserve_paid: withdrawal.reserve_out,
                    },
                    Some(withdrawal.sequence),
                )
            }),
            Operation::BalanceOf { account } => Ok((
                OperationOutcome::Balance {
                    account: *account,
                    units: ledger.balance_of(account),
                },
                None,
            )),
        };

        let settled = match &result {
            Ok((OperationOutcome::Withdrawn { reserve_paid, .. }, _)) => {
                wallets.credit(caller, *reserve_paid)
            }
            Ok(_) => wallets.release_to_ledger(attached),
            Err(_) => wallets.refund(caller, attached),
        };
        // Unreachable while conservation holds, see fee settlement above.
        if let Err(e) = settled {
            error!(operation_id = %request.operation_id, error = %e, "Wallet settlement failed");
        }
        drop(books);

        match result {
            Ok((outcome, sequence)) => {
                self.metrics.operation_committed(kind);
                Receipt::committed(&request, fee, outcome, sequence)
            }
            Err(e) => {
                self.metrics.operation_rejected();
                warn!(
                    operation_id = %request.operation_id,
                    error = %e,
                    fee = %fee,
                    "Operation rejected by ledger"
                );
                Receipt::rejected(&request, fee, &e)
            }
        }
    }
}
