//! Error types for ledger operations and the transport in front of it.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Address, AddressError, OperationId, Reserve, Units};

/// Failures of the submission/finalization layer.
///
/// These never originate in ledger logic. After a [`TransportFailure::Timeout`]
/// the operation may or may not have committed; callers must re-query.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportFailure {
    /// Network-level failure talking to the node.
    #[error("network error: {0}")]
    Network(String),

    /// Finalization was not observed within the allowed time.
    #[error("operation {operation_id} not finalized after {waited_ms}ms")]
    Timeout {
        operation_id: OperationId,
        waited_ms: u64,
    },

    /// The node is not accepting submissions.
    #[error("node unavailable")]
    NodeUnavailable,
}

/// Main error type for ledger operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    /// Transfer or withdraw asked for more units than the account holds.
    #[error("Insufficient balance for {account}: requested {requested}, available {available}")]
    InsufficientBalance {
        account: Address,
        requested: Units,
        available: Units,
    },

    /// The caller's reserve wallet cannot cover the attached amount plus fee.
    #[error("Insufficient funds for {account}: required {required}, available {available}")]
    InsufficientFunds {
        account: Address,
        required: Reserve,
        available: Reserve,
    },

    /// Exchange price must be positive.
    #[error("Exchange price must be positive")]
    InvalidPrice,

    /// Checked arithmetic overflowed.
    #[error("Arithmetic overflow: {0}")]
    ArithmeticOverflow(String),

    /// Malformed operation request.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Operation id already submitted.
    #[error("Duplicate operation: {0}")]
    DuplicateOperation(OperationId),

    /// Operation id never submitted.
    #[error("Unknown operation: {0}")]
    UnknownOperation(OperationId),

    /// Ledger state failed an integrity check.
    #[error("Integrity violation: {0}")]
    IntegrityViolation(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Unparseable account address.
    #[error("Invalid address: {0}")]
    InvalidAddress(#[from] AddressError),

    /// Submission or finalization failed outside the ledger.
    #[error("Transport failure: {0}")]
    Transport(#[from] TransportFailure),
}

impl LedgerError {
    /// Check if this error is retryable.
    ///
    /// Timeouts are not: the operation may already be committed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LedgerError::Transport(TransportFailure::Network(_))
                | LedgerError::Transport(TransportFailure::NodeUnavailable)
        )
    }

    /// Check if the commit status of the operation is unknown.
    pub fn is_outcome_unknown(&self) -> bool {
        matches!(self, LedgerError::Transport(TransportFailure::Timeout { .. }))
    }

    /// Get error code for receipts and logs.
    pub fn error_code(&self) -> &'static str {
        self.kind().code()
    }

    /// Get the payload-free kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::InsufficientBalance { .. } => ErrorKind::InsufficientBalance,
            LedgerError::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            LedgerError::InvalidPrice => ErrorKind::InvalidPrice,
            LedgerError::ArithmeticOverflow(_) => ErrorKind::ArithmeticOverflow,
            LedgerError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            LedgerError::DuplicateOperation(_) => ErrorKind::DuplicateOperation,
            LedgerError::UnknownOperation(_) => ErrorKind::UnknownOperation,
            LedgerError::IntegrityViolation(_) => ErrorKind::IntegrityViolation,
            LedgerError::ConfigurationError(_) => ErrorKind::ConfigurationError,
            LedgerError::InvalidAddress(_) => ErrorKind::InvalidAddress,
            LedgerError::Transport(_) => ErrorKind::TransportFailure,
        }
    }
}

/// Serializable error classification carried in receipts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    InsufficientBalance,
    InsufficientFunds,
    InvalidPrice,
    ArithmeticOverflow,
    InvalidRequest,
    DuplicateOperation,
    UnknownOperation,
    IntegrityViolation,
    ConfigurationError,
    InvalidAddress,
    TransportFailure,
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::InsufficientBalance => "INSUFFICIENT_BALANCE",
            ErrorKind::InsufficientFunds => "INSUFFICIENT_FUNDS",
            ErrorKind::InvalidPrice => "INVALID_PRICE",
            ErrorKind::ArithmeticOverflow => "ARITHMETIC_OVERFLOW",
            ErrorKind::InvalidRequest => "INVALID_REQUEST",
            ErrorKind::DuplicateOperation => "DUPLICATE_OPERATION",
            ErrorKind::UnknownOperation => "UNKNOWN_OPERATION",
            ErrorKind::IntegrityViolation => "INTEGRITY_VIOLATION",
            ErrorKind::ConfigurationError => "CONFIGURATION_ERROR",
            ErrorKind::InvalidAddress => "INVALID_ADDRESS",
            ErrorKind::TransportFailure => "TRANSPORT_FAILURE",
        }
    }
}

/// Result type alias for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;
