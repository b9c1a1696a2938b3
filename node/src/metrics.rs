//! Metrics collection for node monitoring.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokenbank_protocol::OperationKind;

/// Node metrics.
pub struct NodeMetrics {
    /// Operations accepted into the queue.
    pub submitted: AtomicU64,
    /// Submissions refused before queueing.
    pub refused: AtomicU64,
    /// Operations committed.
    pub committed: AtomicU64,
    /// Operations rejected by the ledger.
    pub rejected: AtomicU64,
    /// Operations queued but not yet finalized.
    pub in_flight: AtomicU64,
    pub purchases: AtomicU64,
    pub transfers: AtomicU64,
    pub withdrawals: AtomicU64,
    pub balance_queries: AtomicU64,
}

impl NodeMetrics {
    /// Create new metrics instance.
    pub fn new() -> Self {
        Self {
            submitted: AtomicU64::new(0),
            refused: AtomicU64::new(0),
            committed: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            in_flight: AtomicU64::new(0),
            purchases: AtomicU64::new(0),
            transfers: AtomicU64::new(0),
            withdrawals: AtomicU64::new(0),
            balance_queries: AtomicU64::new(0),
        }
    }

    /// Record an operation entering the queue.
    pub fn operation_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
        self.in_flight.fetch_add(1, Ordering::Relaxed);
    }

    /// Undo [`NodeMetrics::operation_submitted`] for an operation that never
    /// reached the queue.
    pub fn operation_unqueued(&self) {
        self.submitted.fetch_sub(1, Ordering::Relaxed);
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record a submission refused at the door.
    pub fn operation_refused(&self) {
        self.refused.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a committed operation.
    pub fn operation_committed(&self, kind: OperationKind) {
        self.committed.fetch_add(1, Ordering::Relaxed);
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
        self.kind_counter(kind).fetch_add(1, Ordering::Relaxed);
    }

    /// Record an operation rejected by the ledger.
    pub fn operation_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }

    fn kind_counter(&self, kind: OperationKind) -> &AtomicU64 {
        match kind {
            OperationKind::Purchase => &self.purchases,
            OperationKind::Transfer => &self.transfers,
            OperationKind::Withdraw => &self.withdrawals,
            OperationKind::BalanceOf => &self.balance_queries,
        }
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            refused: self.refused.load(Ordering::Relaxed),
            committed: self.committed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
            purchases: self.purchases.load(Ordering::Relaxed),
            transfers: self.transfers.load(Ordering::Relaxed),
            withdrawals: self.withdrawals.load(Ordering::Relaxed),
            balance_queries: self.balance_queries.load(Ordering::Relaxed),
        }
    }

    /// Export metrics in Prometheus format.
    pub fn to_prometheus(&self) -> String {
        let snapshot = self.snapshot();
        let mut out = String::new();

        for (name, kind, help, value) in [
            ("submitted", "counter", "Operations accepted into the queue", snapshot.submitted),
            ("refused", "counter", "Submissions refused before queueing", snapshot.refused),
            ("committed", "counter", "Operations committed", snapshot.committed),
            ("rejected", "counter", "Operations rejected by the ledger", snapshot.rejected),
            ("in_flight", "gauge", "Operations awaiting finalization", snapshot.in_flight),
        ] {
            out.push_str(&format!(
                "# HELP tokenbank_operations_{name} {help}\n# TYPE tokenbank_operations_{name} {kind}\ntokenbank_operations_{name} {value}\n\n"
            ));
        }

        out.push_str("# HELP tokenbank_committed_by_kind Committed operations by kind\n");
        out.push_str("# TYPE tokenbank_committed_by_kind counter\n");
        for (kind, value) in [
            (OperationKind::Purchase, snapshot.purchases),
            (OperationKind::Transfer, snapshot.transfers),
            (OperationKind::Withdraw, snapshot.withdrawals),
            (OperationKind::BalanceOf, snapshot.balance_queries),
        ] {
            out.push_str(&format!(
                "tokenbank_committed_by_kind{{kind=\"{}\"}} {value}\n",
                kind.name()
            ));
        }

        out
    }
}

impl Default for NodeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub submitted: u64,
    pub refused: u64,
    pub committed: u64,
    pub rejected: u64,
    pub in_flight: u64,
    pub purchases: u64,
    pub transfers: u64,
    pub withdrawals: u64,
    pub balance_queries: u64,
}

/// Shared metrics instance.
pub type SharedMetrics = Arc<NodeMetrics>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_increment() {
        let metrics = NodeMetrics::new();

        metrics.operation_submitted();
        metrics.operation_submitted();
        metrics.operation_committed(OperationKind::Purchase);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.submitted, 2);
        assert_eq!(snapshot.committed, 1);
        assert_eq!(snapshot.purchases, 1);
        assert_eq!(snapshot.in_flight, 1);
    }

    #[test]
    fn test_prometheus_export() {
        let metrics = NodeMetrics::new();
        metrics.operation_submitted();
        metrics.operation_rejected();

        let output = metrics.to_prometheus();
        assert!(output.contains("tokenbank_operations_submitted 1"));
        assert!(output.contains("tokenbank_operations_rejected 1"));
        assert!(output.contains("tokenbank_committed_by_kind{kind=\"transfer\"} 0"));
    }
}
