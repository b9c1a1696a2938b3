//! Simulation metrics.

use std::collections::VecDeque;
use std::time::Duration;

use serde::Serialize;

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
pub fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Simulation metrics.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationMetrics {
    /// Operations attempted.
    pub attempted: u64,
    /// Operations committed.
    pub committed: u64,
    /// Operations finalized as rejected.
    pub rejected: u64,
    /// Submissions the node refused before ordering.
    pub refused: u64,
    /// Operations that failed or timed out in transport.
    pub transport_failures: u64,
    /// Fees paid across all finalized operations.
    pub fees_paid: u128,
    /// Finalization latency samples (ms).
    #[serde(skip)]
    latency_samples: VecDeque<u64>,
    /// Maximum samples to keep.
    #[serde(skip)]
    max_samples: usize,
}

impl SimulationMetrics {
    /// Create new metrics.
    pub fn new() -> Self {
        Self {
            attempted: 0,
            committed: 0,
            rejected: 0,
            refused: 0,
            transport_failures: 0,
            fees_paid: 0,
            latency_samples: VecDeque::with_capacity(10000),
            max_samples: 10000,
        }
    }

    /// Record a committed operation.
    pub fn record_committed(&mut self, latency_ms: u64, fee: u128) {
        self.attempted += 1;
        self.committed += 1;
        self.fees_paid = self.fees_paid.saturating_add(fee);
        self.push_latency(latency_ms);
    }

    /// Record a rejected operation. Its fee was still charged.
    pub fn record_rejected(&mut self, latency_ms: u64, fee: u128) {
        self.attempted += 1;
        self.rejected += 1;
        self.fees_paid = self.fees_paid.saturating_add(fee);
        self.push_latency(latency_ms);
    }

    /// Record a submission refused before ordering. Nothing was charged.
    pub fn record_refused(&mut self) {
        self.attempted += 1;
        self.refused += 1;
    }

    /// Record an operation with no receipt.
    pub fn record_transport_failure(&mut self) {
        self.attempted += 1;
        self.transport_failures += 1;
    }

    fn push_latency(&mut self, latency_ms: u64) {
        if self.latency_samples.len() >= self.max_samples {
            self.latency_samples.pop_front();
        }
        self.latency_samples.push_back(latency_ms);
    }

    /// Get average latency in ms.
    pub fn average_latency_ms(&self) -> u64 {
        if self.latency_samples.is_empty() {
            return 0;
        }

        let sum: u64 = self.latency_samples.iter().sum();
        sum / self.latency_samples.len() as u64
    }

    /// Get p99 latency.
    pub fn p99_latency_ms(&self) -> u64 {
        self.percentile_latency(99)
    }

    fn percentile_latency(&self, percentile: usize) -> u64 {
        if self.latency_samples.is_empty() {
            return 0;
        }

        let mut sorted: Vec<_> = self.latency_samples.iter().copied().collect();
        sorted.sort_unstable();

        let idx = (sorted.len() * percentile / 100).min(sorted.len() - 1);
        sorted[idx]
    }

    /// Share of attempted operations that committed.
    pub fn commit_rate(&self) -> f64 {
        if self.attempted == 0 {
            return 0.0;
        }

        self.committed as f64 / self.attempted as f64
    }
}

impl Default for SimulationMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics() {
        let mut metrics = SimulationMetrics::new();

        metrics.record_committed(100, 45_000);
        metrics.record_committed(200, 30_000);
        metrics.record_rejected(150, 35_000);
        metrics.record_transport_failure();
        metrics.record_refused();

        assert_eq!(metrics.attempted, 5);
        assert_eq!(metrics.committed, 2);
        assert_eq!(metrics.rejected, 1);
        assert_eq!(metrics.transport_failures, 1);
        assert_eq!(metrics.refused, 1);
        assert_eq!(metrics.fees_paid, 110_000);
        assert_eq!(metrics.average_latency_ms(), 150);
        assert_eq!(metrics.p99_latency_ms(), 200);
        assert_eq!(metrics.commit_rate(), 0.4);
    }

    #[test]
    fn test_duration_ms_saturates() {
        assert_eq!(duration_ms(Duration::from_millis(1_500)), 1_500);
        assert_eq!(duration_ms(Duration::MAX), u64::MAX);
    }
}
