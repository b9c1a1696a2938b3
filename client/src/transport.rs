//! Seam between the client and whatever orders and finalizes operations.

use async_trait::async_trait;
use tokenbank_common::{Address, OperationId, Reserve, Result};
use tokenbank_protocol::{OperationRequest, PendingHandle, Receipt};

/// Submission and finalization contract of the execution environment.
///
/// Implementations must surface their own failures as
/// `LedgerError::Transport` and never invent ledger errors.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Submit an operation for ordering.
    async fn submit(&self, request: OperationRequest) -> Result<PendingHandle>;

    /// Wait until the operation is committed or rejected.
    async fn await_finalization(&self, handle: &PendingHandle) -> Result<Receipt>;

    /// Look up a receipt without waiting. `None` while not yet finalized.
    async fn query_receipt(&self, operation_id: &OperationId) -> Result<Option<Receipt>>;

    /// Reserve-currency wallet balance of `account`, held outside the ledger.
    async fn reserve_balance(&self, account: &Address) -> Result<Reserve>;
}
