//! Reserve-currency wallets held outside the ledger.
//!
//! Money only moves between wallets, escrow, the ledger's reserve and
//! collected fees, so their sum stays equal to the genesis funding.

use std::collections::HashMap;

use tokenbank_common::{Address, LedgerError, Reserve, Result};
use tracing::debug;

/// Wallet balances plus the amounts parked between submission and finalization.
#[derive(Debug, Clone)]
pub struct Wallets {
    balances: HashMap<Address, Reserve>,
    /// Attached amounts and fees reserved at submit, not yet settled.
    escrow: Reserve,
    /// Fees paid to the environment.
    fees_collected: Reserve,
    /// Total funding handed out at genesis.
    genesis_total: Reserve,
}

impl Wallets {
    /// Fund wallets. Repeated addresses are summed.
    pub fn genesis(funding: impl IntoIterator<Item = (Address, Reserve)>) -> Result<Self> {
        let mut balances: HashMap<Address, Reserve> = HashMap::new();
        let mut genesis_total = Reserve::ZERO;

        for (account, amount) in funding {
            let balance = balances.entry(account).or_insert(Reserve::ZERO);
            *balance = balance
                .checked_add(amount)
                .ok_or_else(|| LedgerError::ArithmeticOverflow("genesis wallet".into()))?;
            genesis_total = genesis_total
                .checked_add(amount)
                .ok_or_else(|| LedgerError::ArithmeticOverflow("genesis total".into()))?;
        }

        Ok(Self {
            balances,
            escrow: Reserve::ZERO,
            fees_collected: Reserve::ZERO,
            genesis_total,
        })
    }

    pub fn balance(&self, account: &Address) -> Reserve {
        self.balances.get(account).copied().unwrap_or(Reserve::ZERO)
    }

    pub fn escrow(&self) -> Reserve {
        self.escrow
    }

    pub fn fees_collected(&self) -> Reserve {
        self.fees_collected
    }

    pub fn genesis_total(&self) -> Reserve {
        self.genesis_total
    }

    /// Sum of all wallet balances.
    pub fn total(&self) -> Option<Reserve> {
        self.balances
            .values()
            .try_fold(Reserve::ZERO, |acc, amount| acc.checked_add(*amount))
    }

    /// Move `amount` from `account` into escrow.
    pub fn hold(&mut self, account: Address, amount: Reserve) -> Result<()> {
        let available = self.balance(&account);
        let remaining = available
            .checked_sub(amount)
            .ok_or(LedgerError::InsufficientFunds {
                account,
                required: amount,
                available,
            })?;
        let escrow = self
            .escrow
            .checked_add(amount)
            .ok_or_else(|| LedgerError::ArithmeticOverflow("escrow".into()))?;

        self.balances.insert(account, remaining);
        self.escrow = escrow;
        debug!(account = %account, amount = %amount, "Funds held");
        Ok(())
    }

    /// Settle `fee` out of escrow into collected fees.
    pub fn collect_fee(&mut self, fee: Reserve) -> Result<()> {
        let escrow = self.take_escrow(fee)?;
        let fees_collected = self
            .fees_collected
            .checked_add(fee)
            .ok_or_else(|| LedgerError::ArithmeticOverflow("fees collected".into()))?;
        self.escrow = escrow;
        self.fees_collected = fees_collected;
        Ok(())
    }

    /// Release `amount` from escrow to the ledger.
    pub fn release_to_ledger(&mut self, amount: Reserve) -> Result<()> {
        self.escrow = self.take_escrow(amount)?;
        Ok(())
    }

    /// Return `amount` from escrow to `account`.
    pub fn refund(&mut self, account: Address, amount: Reserve) -> Result<()> {
        let escrow = self.take_escrow(amount)?;
        let balance = self.credited_balance(account, amount)?;
        self.escrow = escrow;
        self.balances.insert(account, balance);
        Ok(())
    }

    /// Credit `amount` paid out by the ledger to `account`.
    pub fn credit(&mut self, account: Address, amount: Reserve) -> Result<()> {
        let balance = self.credited_balance(account, amount)?;
        self.balances.insert(account, balance);
        Ok(())
    }

    fn credited_balance(&self, account: Address, amount: Reserve) -> Result<Reserve> {
        self.balance(&account)
            .checked_add(amount)
            .ok_or_else(|| LedgerError::ArithmeticOverflow(format!("wallet {account}")))
    }

    fn take_escrow(&self, amount: Reserve) -> Result<Reserve> {
        self.escrow.checked_sub(amount).ok_or_else(|| {
            LedgerError::IntegrityViolation(format!(
                "escrow {} cannot release {amount}",
                self.escrow
            ))
        })
    }
}
