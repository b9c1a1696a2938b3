//! Account balance tracking.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokenbank_common::{Address, LedgerError, Result, Units};

/// Type of balance change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BalanceChangeType {
    /// Credit (increase).
    Credit,
    /// Debit (decrease).
    Debit,
}

/// Balance change event recorded in the journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceChange {
    /// Account affected.
    pub account: Address,
    /// Change type.
    pub change_type: BalanceChangeType,
    /// Units moved.
    pub amount: Units,
    /// Balance before change.
    pub balance_before: Units,
    /// Balance after change.
    pub balance_after: Units,
}

impl BalanceChange {
    pub fn is_credit(&self) -> bool {
        self.change_type == BalanceChangeType::Credit
    }
}

/// Unit balances keyed by account.
///
/// Absent accounts hold zero. Entries are created on first credit and never
/// removed, so a drained account stays present with a zero balance.
#[derive(Debug, Clone, Default)]
pub struct BalanceBook {
    balances: HashMap<Address, Units>,
    total: Units,
}

impl BalanceBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current balance of `account`.
    pub fn get(&self, account: &Address) -> Units {
        self.balances.get(account).copied().unwrap_or(Units::ZERO)
    }

    /// Sum of all balances.
    pub fn total(&self) -> Units {
        self.total
    }

    /// Number of accounts ever credited.
    pub fn len(&self) -> usize {
        self.balances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.balances.is_empty()
    }

    /// Iterate over touched accounts and their balances.
    pub fn iter(&self) -> impl Iterator<Item = (&Address, &Units)> {
        self.balances.iter()
    }

    /// Compute a credit without applying it.
    pub fn plan_credit(&self, account: Address, amount: Units) -> Result<BalanceChange> {
        let before = self.get(&account);
        let after = before.checked_add(amount).ok_or_else(|| {
            LedgerError::ArithmeticOverflow(format!("balance of {account} overflows"))
        })?;
        Ok(BalanceChange {
            account,
            change_type: BalanceChangeType::Credit,
            amount,
            balance_before: before,
            balance_after: after,
        })
    }

    /// Compute a debit without applying it.
    pub fn plan_debit(&self, account: Address, amount: Units) -> Result<BalanceChange> {
        let before = self.get(&account);
        let after = before
            .checked_sub(amount)
            .ok_or(LedgerError::InsufficientBalance {
                account,
                requested: amount,
                available: before,
            })?;
        Ok(BalanceChange {
            account,
            change_type: BalanceChangeType::Debit,
            amount,
            balance_before: before,
            balance_after: after,
        })
    }

    /// Plan a debit of `sender` followed by a credit of `recipient`.
    ///
    /// For a self-transfer the credit is planned on top of the debit, so the
    /// pair nets to zero.
    pub fn plan_transfer(
        &self,
        sender: Address,
        recipient: Address,
        amount: Units,
    ) -> Result<[BalanceChange; 2]> {
        let debit = self.plan_debit(sender, amount)?;
        let base = if recipient == sender {
            debit.balance_after
        } else {
            self.get(&recipient)
        };
        let after = base.checked_add(amount).ok_or_else(|| {
            LedgerError::ArithmeticOverflow(format!("balance of {recipient} overflows"))
        })?;
        let credit = BalanceChange {
            account: recipient,
            change_type: BalanceChangeType::Credit,
            amount,
            balance_before: base,
            balance_after: after,
        };
        Ok([debit, credit])
    }

    /// Apply previously planned changes in order.
    ///
    /// Every change must have been planned against the current state, with
    /// later changes to the same account planned on top of earlier ones.
    pub(crate) fn apply(&mut self, changes: &[BalanceChange], total_after: Units) {
        for change in changes {
            self.balances.insert(change.account, change.balance_after);
        }
        self.total = total_after;
    }

    /// Total supply after applying `changes`; `None` on overflow or underflow.
    pub fn total_after(&self, changes: &[BalanceChange]) -> Option<Units> {
        changes.iter().try_fold(self.total, |total, change| match change.change_type {
            BalanceChangeType::Credit => total.checked_add(change.amount),
            BalanceChangeType::Debit => total.checked_sub(change.amount),
        })
    }
}
