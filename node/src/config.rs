//! Node configuration.

use serde::{Deserialize, Serialize};
use tokenbank_common::Reserve;
use tokenbank_protocol::OperationKind;

/// Gas charged per operation kind, paid in reserve currency at `gas_price`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSchedule {
    /// Reserve currency per unit of gas.
    pub gas_price: u128,
    pub purchase_gas: u64,
    pub transfer_gas: u64,
    pub withdraw_gas: u64,
    pub balance_query_gas: u64,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            gas_price: 1,
            purchase_gas: 45_000,
            transfer_gas: 30_000,
            withdraw_gas: 35_000,
            balance_query_gas: 0,
        }
    }
}

impl FeeSchedule {
    /// A schedule that charges nothing.
    pub fn free() -> Self {
        Self {
            gas_price: 0,
            ..Self::default()
        }
    }

    pub fn gas_for(&self, kind: OperationKind) -> u64 {
        match kind {
            OperationKind::Purchase => self.purchase_gas,
            OperationKind::Transfer => self.transfer_gas,
            OperationKind::Withdraw => self.withdraw_gas,
            OperationKind::BalanceOf => self.balance_query_gas,
        }
    }

    /// Fee for one operation of `kind`. `None` on overflow.
    pub fn fee_for(&self, kind: OperationKind) -> Option<Reserve> {
        self.gas_price
            .checked_mul(u128::from(self.gas_for(kind)))
            .map(Reserve::new)
    }
}

/// Main node configuration.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Reserve currency per unit, fixed for the ledger's lifetime.
    pub price: u128,
    /// Fees charged to callers.
    pub fee_schedule: FeeSchedule,
    /// Capacity of the submission queue.
    pub queue_capacity: usize,
    /// Log level.
    pub log_level: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            price: 1000,
            fee_schedule: FeeSchedule::default(),
            queue_capacity: 1024,
            log_level: "info".to_string(),
        }
    }
}

impl NodeConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(price) = std::env::var("TOKEN_PRICE") {
            if let Ok(price) = price.parse() {
                config.price = price;
            }
        }

        if let Ok(gas_price) = std::env::var("GAS_PRICE") {
            if let Ok(gas_price) = gas_price.parse() {
                config.fee_schedule.gas_price = gas_price;
            }
        }

        if let Ok(capacity) = std::env::var("NODE_QUEUE_CAPACITY") {
            if let Ok(capacity) = capacity.parse() {
                config.queue_capacity = capacity;
            }
        }

        if let Ok(level) = std::env::var("LOG_LEVEL") {
            config.log_level = level;
        }

        config
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.price == 0 {
            return Err("Token price must be positive".to_string());
        }

        if self.queue_capacity == 0 {
            return Err("Queue capacity cannot be 0".to_string());
        }

        for kind in [
            OperationKind::Purchase,
            OperationKind::Transfer,
            OperationKind::Withdraw,
            OperationKind::BalanceOf,
        ] {
            if self.fee_schedule.fee_for(kind).is_none() {
                return Err(format!("Fee for {} overflows", kind.name()));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = NodeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(
            config.fee_schedule.fee_for(OperationKind::Purchase),
            Some(Reserve::new(45_000))
        );
        assert_eq!(
            config.fee_schedule.fee_for(OperationKind::BalanceOf),
            Some(Reserve::ZERO)
        );
    }

    #[test]
    fn test_invalid_config() {
        let mut config = NodeConfig::default();
        config.price = 0;
        assert!(config.validate().is_err());

        let mut config = NodeConfig::default();
        config.queue_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = NodeConfig::default();
        config.fee_schedule.gas_price = u128::MAX;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_free_schedule() {
        let fees = FeeSchedule::free();
        assert_eq!(fees.fee_for(OperationKind::Withdraw), Some(Reserve::ZERO));
    }
}
