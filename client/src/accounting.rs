//! Reconstructing a caller's reserve-currency movement from receipts.
//!
//! The fee goes to the environment, not the ledger, so a wallet's change is
//! the ledger's reserve movement for the caller plus the fee.

use tokenbank_common::Reserve;
use tokenbank_protocol::Receipt;

/// Reserve-currency effect of finalized operations on their caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReserveDelta {
    /// Reserve moved from the caller into the ledger.
    pub paid_in: Reserve,
    /// Reserve moved from the ledger to the caller.
    pub paid_out: Reserve,
    /// Fees charged by the environment.
    pub fee: Reserve,
    /// Part of `paid_in` kept by the ledger without a unit credit.
    pub retained: Reserve,
}

impl ReserveDelta {
    /// Effect of one receipt. `attached` is what the request carried; a
    /// rejected operation moves nothing but the fee.
    pub fn from_receipt(receipt: &Receipt, attached: Reserve) -> Self {
        let paid_in = if receipt.committed {
            attached
        } else {
            Reserve::ZERO
        };

        Self {
            paid_in,
            paid_out: receipt.reserve_paid_out(),
            fee: receipt.fee_consumed,
            retained: receipt.purchase_remainder(),
        }
    }

    /// Net wallet change: `paid_out - paid_in - fee`. `None` outside `i128`.
    pub fn net(&self) -> Option<i128> {
        let out = i128::try_from(self.paid_out.value()).ok()?;
        let inn = i128::try_from(self.paid_in.value()).ok()?;
        let fee = i128::try_from(self.fee.value()).ok()?;
        out.checked_sub(inn)?.checked_sub(fee)
    }

    /// What the caller paid beyond the value of units received: fee plus
    /// truncation remainder.
    pub fn spent_beyond_token_value(&self) -> Option<Reserve> {
        self.fee.checked_add(self.retained)
    }

    /// Expected wallet balance after this delta, from the balance before.
    pub fn apply_to(&self, before: Reserve) -> Option<Reserve> {
        before
            .checked_add(self.paid_out)?
            .checked_sub(self.paid_in)?
            .checked_sub(self.fee)
    }

    /// Sum two deltas.
    pub fn checked_combine(&self, other: &ReserveDelta) -> Option<ReserveDelta> {
        Some(ReserveDelta {
            paid_in: self.paid_in.checked_add(other.paid_in)?,
            paid_out: self.paid_out.checked_add(other.paid_out)?,
            fee: self.fee.checked_add(other.fee)?,
            retained: self.retained.checked_add(other.retained)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokenbank_common::{Address, LedgerError, Units};
    use tokenbank_protocol::{OperationOutcome, OperationRequest};

    fn alice() -> Address {
        Address::from_bytes([0xaa; 20])
    }

    #[test]
    fn test_purchase_delta() {
        let request = OperationRequest::purchase(alice(), Reserve::new(100_111));
        let receipt = Receipt::committed(
            &request,
            Reserve::new(45_000),
            OperationOutcome::Purchased {
                units: Units::new(100),
                remainder: Reserve::new(111),
            },
            Some(1),
        );

        let delta = ReserveDelta::from_receipt(&receipt, request.attached);

        assert_eq!(delta.net(), Some(-(100_111 + 45_000)));
        assert_eq!(delta.spent_beyond_token_value(), Some(Reserve::new(45_111)));
        assert_eq!(
            delta.apply_to(Reserve::new(1_000_000)),
            Some(Reserve::new(1_000_000 - 100_111 - 45_000))
        );
    }

    #[test]
    fn test_withdraw_delta() {
        let request = OperationRequest::withdraw(alice(), Units::new(100));
        let receipt = Receipt::committed(
            &request,
            Reserve::new(35_000),
            OperationOutcome::Withdrawn {
                units: Units::new(100),
                reserve_paid: Reserve::new(100_000),
            },
            Some(4),
        );

        let delta = ReserveDelta::from_receipt(&receipt, request.attached);

        assert_eq!(delta.net(), Some(100_000 - 35_000));
        assert_eq!(delta.spent_beyond_token_value(), Some(Reserve::new(35_000)));
    }

    #[test]
    fn test_rejected_operation_costs_only_fee() {
        let request = OperationRequest::withdraw(alice(), Units::new(1));
        let error = LedgerError::InsufficientBalance {
            account: alice(),
            requested: Units::new(1),
            available: Units::ZERO,
        };
        let receipt = Receipt::rejected(&request, Reserve::new(35_000), &error);

        let delta = ReserveDelta::from_receipt(&receipt, request.attached);
        assert_eq!(delta.net(), Some(-35_000));

        let combined = delta.checked_combine(&delta).unwrap();
        assert_eq!(combined.fee, Reserve::new(70_000));
    }
}
