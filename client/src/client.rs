//! Client for submitting ledger operations on behalf of one account.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, instrument, warn};

use tokenbank_common::{
    Address, LedgerError, OperationId, Reserve, Result, TransportFailure, Units,
};
use tokenbank_protocol::{Operation, OperationRequest, Receipt};

use crate::config::ClientConfig;
use crate::transport::Transport;

/// Submits operations as `account` and waits for their receipts.
///
/// A rejected operation is still a finalized one: it comes back as a
/// receipt with `committed == false`, not as an `Err`. Errors are reserved
/// for requests that never reached finalization.
pub struct LedgerClient {
    /// Configuration.
    config: ClientConfig,
    /// Account that signs every request.
    account: Address,
    /// Execution environment.
    transport: Arc<dyn Transport>,
}

impl LedgerClient {
    /// Create a new client.
    pub fn new(config: ClientConfig, account: Address, transport: Arc<dyn Transport>) -> Self {
        Self {
            config,
            account,
            transport,
        }
    }

    /// Account this client acts for.
    pub fn account(&self) -> Address {
        self.account
    }

    /// Submit `operation` with `attached` reserve and wait for finalization.
    ///
    /// Fails with `TransportFailure::Timeout` if no receipt arrives within
    /// the configured timeout. The operation may still commit afterwards;
    /// use [`LedgerClient::query_receipt`] to find out.
    #[instrument(skip(self, operation), fields(account = %self.account, op = operation.kind().name()))]
    pub async fn execute(&self, operation: Operation, attached: Reserve) -> Result<Receipt> {
        let request = OperationRequest::new(self.account, operation, attached);
        request.validate()?;

        let operation_id = request.operation_id;
        let started = Instant::now();

        let handle = self.transport.submit(request).await?;

        let receipt = match tokio::time::timeout(
            self.config.finalization_timeout,
            self.transport.await_finalization(&handle),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                let waited_ms = saturating_millis(started.elapsed());
                warn!(
                    operation_id = %operation_id,
                    waited_ms,
                    "Finalization not observed, outcome unknown"
                );
                return Err(TransportFailure::Timeout {
                    operation_id,
                    waited_ms,
                }
                .into());
            }
        };

        if receipt.is_committed() {
            info!(
                operation_id = %operation_id,
                fee = %receipt.fee_consumed,
                sequence = ?receipt.journal_sequence,
                "Operation committed"
            );
        } else {
            warn!(
                operation_id = %operation_id,
                fee = %receipt.fee_consumed,
                error = ?receipt.error,
                "Operation rejected"
            );
        }

        Ok(receipt)
    }

    /// Buy units with `amount` of reserve currency.
    pub async fn purchase(&self, amount: Reserve) -> Result<Receipt> {
        self.execute(Operation::Purchase, amount).await
    }

    /// Send `units` to `recipient`.
    pub async fn transfer(&self, recipient: Address, units: Units) -> Result<Receipt> {
        self.execute(Operation::Transfer { recipient, units }, Reserve::ZERO)
            .await
    }

    /// Redeem `units` for reserve currency.
    pub async fn withdraw(&self, units: Units) -> Result<Receipt> {
        self.execute(Operation::Withdraw { units }, Reserve::ZERO)
            .await
    }

    /// Unit balance of `account`.
    pub async fn balance_of(&self, account: Address) -> Result<Units> {
        let receipt = self
            .execute(Operation::BalanceOf { account }, Reserve::ZERO)
            .await?;

        receipt.balance().ok_or_else(|| {
            LedgerError::InvalidRequest(
                receipt
                    .message
                    .unwrap_or_else(|| "balance query returned no balance".to_string()),
            )
        })
    }

    /// Look up the receipt of an earlier operation without waiting.
    pub async fn query_receipt(&self, operation_id: &OperationId) -> Result<Option<Receipt>> {
        self.transport.query_receipt(operation_id).await
    }

    /// Reserve-currency wallet balance of this client's account.
    pub async fn reserve_balance(&self) -> Result<Reserve> {
        self.transport.reserve_balance(&self.account).await
    }
}

fn saturating_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Builder for LedgerClient.
pub struct LedgerClientBuilder {
    config: ClientConfig,
    account: Option<Address>,
    transport: Option<Arc<dyn Transport>>,
}

impl LedgerClientBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
            account: None,
            transport: None,
        }
    }

    /// Set the signing account.
    pub fn account(mut self, account: Address) -> Self {
        self.account = Some(account);
        self
    }

    /// Set the configuration.
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the execution environment.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Build the client.
    pub fn build(self) -> Result<LedgerClient> {
        self.config
            .validate()
            .map_err(LedgerError::ConfigurationError)?;

        let account = self.account.ok_or(LedgerError::ConfigurationError(
            "Account is required".to_string(),
        ))?;

        let transport = self.transport.ok_or(LedgerError::ConfigurationError(
            "Transport is required".to_string(),
        ))?;

        Ok(LedgerClient::new(self.config, account, transport))
    }
}

impl Default for LedgerClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tokenbank_protocol::{OperationOutcome, PendingHandle};

    /// Finalizes every submission immediately, crediting purchases at a
    /// price of 1000 and reporting fixed balances.
    #[derive(Default)]
    struct MockTransport {
        receipts: Mutex<HashMap<OperationId, Receipt>>,
        hold: bool,
    }

    impl MockTransport {
        fn holding() -> Self {
            Self {
                hold: true,
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn submit(&self, request: OperationRequest) -> Result<PendingHandle> {
            let outcome = match &request.operation {
                Operation::Purchase => OperationOutcome::Purchased {
                    units: Units::new(request.attached.value() / 1000),
                    remainder: Reserve::new(request.attached.value() % 1000),
                },
                Operation::Transfer { recipient, units } => OperationOutcome::Transferred {
                    recipient: *recipient,
                    units: *units,
                },
                Operation::Withdraw { units } => OperationOutcome::Withdrawn {
                    units: *units,
                    reserve_paid: Reserve::new(units.value() * 1000),
                },
                Operation::BalanceOf { account } => OperationOutcome::Balance {
                    account: *account,
                    units: Units::new(42),
                },
            };
            let receipt = Receipt::committed(&request, Reserve::new(10), outcome, Some(1));
            self.receipts.lock().insert(request.operation_id, receipt);

            Ok(PendingHandle {
                operation_id: request.operation_id,
            })
        }

        async fn await_finalization(&self, handle: &PendingHandle) -> Result<Receipt> {
            if self.hold {
                std::future::pending::<()>().await;
            }
            self.receipts
                .lock()
                .get(&handle.operation_id)
                .cloned()
                .ok_or(LedgerError::UnknownOperation(handle.operation_id))
        }

        async fn query_receipt(&self, operation_id: &OperationId) -> Result<Option<Receipt>> {
            Ok(self.receipts.lock().get(operation_id).cloned())
        }

        async fn reserve_balance(&self, _account: &Address) -> Result<Reserve> {
            Ok(Reserve::new(1_000_000))
        }
    }

    fn account() -> Address {
        Address::from_bytes([0x11; 20])
    }

    fn client(transport: MockTransport, timeout: Duration) -> LedgerClient {
        LedgerClientBuilder::new()
            .account(account())
            .config(ClientConfig {
                finalization_timeout: timeout,
            })
            .transport(Arc::new(transport))
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_requires_account_and_transport() {
        let result = LedgerClientBuilder::new()
            .transport(Arc::new(MockTransport::default()))
            .build();
        assert!(matches!(result, Err(LedgerError::ConfigurationError(_))));

        let result = LedgerClientBuilder::new().account(account()).build();
        assert!(matches!(result, Err(LedgerError::ConfigurationError(_))));
    }

    #[tokio::test]
    async fn test_purchase_returns_receipt() {
        let client = client(MockTransport::default(), Duration::from_secs(1));

        let receipt = tokio_test::assert_ok!(client.purchase(Reserve::new(100_111)).await);
        assert!(receipt.is_committed());
        assert_eq!(receipt.units_purchased(), Some(Units::new(100)));
        assert_eq!(receipt.purchase_remainder(), Reserve::new(111));

        let stored = client.query_receipt(&receipt.operation_id).await.unwrap();
        assert_eq!(stored, Some(receipt));
    }

    #[tokio::test]
    async fn test_balance_of() {
        let client = client(MockTransport::default(), Duration::from_secs(1));
        assert_eq!(client.balance_of(account()).await.unwrap(), Units::new(42));
        assert_eq!(client.reserve_balance().await.unwrap(), Reserve::new(1_000_000));
    }

    #[tokio::test]
    async fn test_timeout_reports_unknown_outcome() {
        let client = client(MockTransport::holding(), Duration::from_millis(20));

        let err = tokio_test::assert_err!(client.withdraw(Units::new(1)).await);
        assert!(err.is_outcome_unknown());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_waited_millis_saturate() {
        assert_eq!(saturating_millis(Duration::from_millis(20)), 20);
        assert_eq!(saturating_millis(Duration::MAX), u64::MAX);
    }
}
