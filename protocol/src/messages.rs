//! Protocol message types.
//!
//! An [`OperationRequest`] is what a client submits on behalf of a caller;
//! a [`Receipt`] is what the environment reports once the operation is
//! finalized, committed or not.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokenbank_common::{Address, ErrorKind, LedgerError, OperationId, Reserve, Result, Units};

/// Protocol version stamped on every request.
pub const PROTOCOL_VERSION: &str = "1.0";

/// A ledger operation, without its caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    /// Buy units with the attached reserve amount.
    Purchase,
    /// Send units from the caller to `recipient`.
    Transfer { recipient: Address, units: Units },
    /// Redeem units held by the caller.
    Withdraw { units: Units },
    /// Read the unit balance of `account`.
    BalanceOf { account: Address },
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::Purchase => OperationKind::Purchase,
            Operation::Transfer { .. } => OperationKind::Transfer,
            Operation::Withdraw { .. } => OperationKind::Withdraw,
            Operation::BalanceOf { .. } => OperationKind::BalanceOf,
        }
    }

    /// Check if the operation leaves ledger state unchanged.
    pub fn is_read(&self) -> bool {
        matches!(self, Operation::BalanceOf { .. })
    }
}

/// Payload-free operation classification, used for fees and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Purchase,
    Transfer,
    Withdraw,
    BalanceOf,
}

impl OperationKind {
    pub fn name(&self) -> &'static str {
        match self {
            OperationKind::Purchase => "purchase",
            OperationKind::Transfer => "transfer",
            OperationKind::Withdraw => "withdraw",
            OperationKind::BalanceOf => "balance_of",
        }
    }
}

/// Operation submitted by a caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRequest {
    /// Protocol version.
    pub version: String,
    /// Unique operation ID.
    pub operation_id: OperationId,
    /// Authenticated caller.
    pub caller: Address,
    /// The operation.
    pub operation: Operation,
    /// Reserve currency attached to the call. Only a purchase may attach any.
    pub attached: Reserve,
    /// Submission timestamp.
    pub submitted_at: DateTime<Utc>,
}

impl OperationRequest {
    /// Create a new request.
    pub fn new(caller: Address, operation: Operation, attached: Reserve) -> Self {
        Self {
            version: PROTOCOL_VERSION.to_string(),
            operation_id: OperationId::new(),
            caller,
            operation,
            attached,
            submitted_at: Utc::now(),
        }
    }

    pub fn purchase(caller: Address, amount: Reserve) -> Self {
        Self::new(caller, Operation::Purchase, amount)
    }

    pub fn transfer(caller: Address, recipient: Address, units: Units) -> Self {
        Self::new(caller, Operation::Transfer { recipient, units }, Reserve::ZERO)
    }

    pub fn withdraw(caller: Address, units: Units) -> Self {
        Self::new(caller, Operation::Withdraw { units }, Reserve::ZERO)
    }

    pub fn balance_of(caller: Address, account: Address) -> Self {
        Self::new(caller, Operation::BalanceOf { account }, Reserve::ZERO)
    }

    /// Validate the request before it is ordered.
    pub fn validate(&self) -> Result<()> {
        if self.version != PROTOCOL_VERSION {
            return Err(LedgerError::InvalidRequest(format!(
                "unsupported protocol version {}",
                self.version
            )));
        }

        if !self.attached.is_zero() && self.operation != Operation::Purchase {
            return Err(LedgerError::InvalidRequest(format!(
                "{} does not accept attached reserve",
                self.operation.kind().name()
            )));
        }

        Ok(())
    }
}

/// Handle returned by a submission, used to await finalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PendingHandle {
    /// Operation being awaited.
    pub operation_id: OperationId,
}

/// What a committed operation produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperationOutcome {
    /// Units credited and reserve retained.
    Purchased { units: Units, remainder: Reserve },
    /// Units moved to `recipient`.
    Transferred { recipient: Address, units: Units },
    /// Units redeemed for `reserve_paid`.
    Withdrawn { units: Units, reserve_paid: Reserve },
    /// Balance read.
    Balance { account: Address, units: Units },
}

/// Finalization result of an operation.
///
/// The fee is charged whether or not the operation committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    /// Operation this receipt finalizes.
    pub operation_id: OperationId,
    /// Caller that paid the fee.
    pub caller: Address,
    /// Kind of operation.
    pub kind: OperationKind,
    /// Whether the operation's effects were applied.
    pub committed: bool,
    /// Fee charged to the caller.
    pub fee_consumed: Reserve,
    /// Rejection classification.
    pub error: Option<ErrorKind>,
    /// Rejection detail.
    pub message: Option<String>,
    /// Effects of a committed operation.
    pub outcome: Option<OperationOutcome>,
    /// Journal sequence of a committed mutation.
    pub journal_sequence: Option<u64>,
    /// Finalization timestamp.
    pub finalized_at: DateTime<Utc>,
}

impl Receipt {
    /// Receipt for a committed operation.
    pub fn committed(
        request: &OperationRequest,
        fee_consumed: Reserve,
        outcome: OperationOutcome,
        journal_sequence: Option<u64>,
    ) -> Self {
        Self {
            operation_id: request.operation_id,
            caller: request.caller,
            kind: request.operation.kind(),
            committed: true,
            fee_consumed,
            error: None,
            message: None,
            outcome: Some(outcome),
            journal_sequence,
            finalized_at: Utc::now(),
        }
    }

    /// Receipt for a rejected operation.
    pub fn rejected(request: &OperationRequest, fee_consumed: Reserve, error: &LedgerError) -> Self {
        Self {
            operation_id: request.operation_id,
            caller: request.caller,
            kind: request.operation.kind(),
            committed: false,
            fee_consumed,
            error: Some(error.kind()),
            message: Some(error.to_string()),
            outcome: None,
            journal_sequence: None,
            finalized_at: Utc::now(),
        }
    }

    pub fn is_committed(&self) -> bool {
        self.committed
    }

    /// Units credited by a committed purchase.
    pub fn units_purchased(&self) -> Option<Units> {
        match &self.outcome {
            Some(OperationOutcome::Purchased { units, .. }) => Some(*units),
            _ => None,
        }
    }

    /// Remainder retained by a committed purchase, zero otherwise.
    pub fn purchase_remainder(&self) -> Reserve {
        match &self.outcome {
            Some(OperationOutcome::Purchased { remainder, .. }) => *remainder,
            _ => Reserve::ZERO,
        }
    }

    /// Reserve paid out to the caller by a committed withdrawal, zero otherwise.
    pub fn reserve_paid_out(&self) -> Reserve {
        match &self.outcome {
            Some(OperationOutcome::Withdrawn { reserve_paid, .. }) => *reserve_paid,
            _ => Reserve::ZERO,
        }
    }

    /// Balance returned by a committed read.
    pub fn balance(&self) -> Option<Units> {
        match &self.outcome {
            Some(OperationOutcome::Balance { units, .. }) => Some(*units),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(byte: u8) -> Address {
        Address::from_bytes([byte; 20])
    }

    #[test]
    fn test_attached_reserve_only_on_purchase() {
        assert!(OperationRequest::purchase(addr(1), Reserve::new(100)).validate().is_ok());

        let mut request = OperationRequest::withdraw(addr(1), Units::new(1));
        assert!(request.validate().is_ok());
        request.attached = Reserve::new(5);
        assert!(matches!(
            request.validate(),
            Err(LedgerError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_version_checked() {
        let mut request = OperationRequest::balance_of(addr(1), addr(2));
        request.version = "0.9".to_string();
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_operation_wire_format() {
        let op = Operation::Transfer {
            recipient: addr(2),
            units: Units::new(25),
        };
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["op"], "transfer");
        assert_eq!(json["units"], 25);
        assert_eq!(json["recipient"], addr(2).to_string());
    }

    #[test]
    fn test_rejected_receipt_carries_fee_and_kind() {
        let request = OperationRequest::transfer(addr(1), addr(2), Units::new(10));
        let error = LedgerError::InsufficientBalance {
            account: addr(1),
            requested: Units::new(10),
            available: Units::ZERO,
        };
        let receipt = Receipt::rejected(&request, Reserve::new(30_000), &error);

        assert!(!receipt.is_committed());
        assert_eq!(receipt.fee_consumed, Reserve::new(30_000));
        assert_eq!(receipt.error, Some(ErrorKind::InsufficientBalance));
        assert_eq!(receipt.reserve_paid_out(), Reserve::ZERO);
        assert_eq!(receipt.kind, OperationKind::Transfer);
    }
}
