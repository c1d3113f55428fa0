//! Transaction orchestration
//!
//! Every Ledger-mutating call goes through the same lifecycle:
//!
//! ```text
//!  authorize ─► submit ─► await confirmation ─► verify postcondition ─► apply
//!      │           │              │                      │                │
//!      └───────────┴──────────────┴──────────────────────┘            success
//!                         failure notification                      notification
//! ```
//!
//! Local state is touched only once both confirmation and verification
//! succeeded. Optional actions are checked against the capability set the
//! engine negotiated, never re-queried. The orchestrator keeps no memory
//! between calls; re-entrancy is the caller's concern (see
//! [`crate::workflow::InFlightGuard`]).

use crate::metrics::TRANSACTIONS_TOTAL;
use crate::notification::{Notification, NotificationSink, Severity};
use crate::{Error, Result};
use async_trait::async_trait;
use ledger_gateway::{Capabilities, Capability, LedgerGateway, Receipt, Signer, WriteAction};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// Lifecycle phase, reported to observers as it is entered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxPhase {
    /// Authorizing and submitting the write
    Submitting,
    /// Waiting for the Ledger to include it
    Confirming,
    /// Checking the postcondition
    Verifying,
    /// Mutating local state
    Applying,
}

/// A Ledger write with its postcondition and local effect
#[async_trait]
pub trait LedgerTransaction: Send + Sync {
    /// Whatever verification read back, handed to `apply`
    type Output: Send + Sync;

    /// Write to submit
    fn action(&self) -> WriteAction;

    /// Prefix for failure messages, e.g. "Failed to get emergency access"
    fn failure_context(&self) -> String;

    /// Success message
    fn success_message(&self, receipt: &Receipt, output: &Self::Output) -> String;

    /// User-facing text for a failure
    fn failure_message(&self, err: &Error) -> String {
        err.user_message(&self.failure_context())
    }

    /// Check the write's intended effect holds.
    ///
    /// Return [`Error::VerificationMismatch`] when it does not.
    async fn verify(&self, gateway: &dyn LedgerGateway, receipt: &Receipt) -> Result<Self::Output>;

    /// Mutate local state; only called after verification succeeded
    async fn apply(&self, output: &Self::Output);
}

/// Completed transaction
#[derive(Debug, Clone)]
pub struct TxOutcome<T> {
    /// Ledger receipt
    pub receipt: Receipt,

    /// Verified output
    pub output: T,
}

/// Runs [`LedgerTransaction`]s against one gateway
pub struct TransactionOrchestrator {
    gateway: Arc<dyn LedgerGateway>,
    capabilities: Capabilities,
    sink: NotificationSink,
}

impl fmt::Debug for TransactionOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionOrchestrator")
            .field("gateway", &self.gateway.name())
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

impl TransactionOrchestrator {
    /// Create orchestrator over an already negotiated capability set
    pub fn new(
        gateway: Arc<dyn LedgerGateway>,
        capabilities: Capabilities,
        sink: NotificationSink,
    ) -> Self {
        Self {
            gateway,
            capabilities,
            sink,
        }
    }

    /// Negotiated capabilities
    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// Fail with [`Error::UnsupportedOperation`] when `capability` was not
    /// negotiated
    pub fn require(&self, capability: Capability) -> Result<()> {
        Ok(self.capabilities.require(capability)?)
    }

    /// Notification sink outcomes go to
    pub fn sink(&self) -> &NotificationSink {
        &self.sink
    }

    /// Run a transaction
    pub async fn execute<T: LedgerTransaction>(
        &self,
        tx: &T,
        signer: &dyn Signer,
    ) -> Result<TxOutcome<T::Output>> {
        self.execute_observed(tx, signer, |_| {}).await
    }

    /// Run a transaction, reporting each phase to `observe`
    pub async fn execute_observed<T, F>(
        &self,
        tx: &T,
        signer: &dyn Signer,
        observe: F,
    ) -> Result<TxOutcome<T::Output>>
    where
        T: LedgerTransaction,
        F: Fn(TxPhase) + Send + Sync,
    {
        let action = tx.action();
        let kind = action.kind();
        let target = action.target();
        let dedupe_key = format!("tx:{}:{}", kind, target);

        match self.run(tx, action, signer, &observe).await {
            Ok(outcome) => {
                TRANSACTIONS_TOTAL.with_label_values(&[kind.as_str(), "success"]).inc();
                info!(%kind, target = %target, tx_hash = %outcome.receipt.tx_hash, "transaction applied");
                self.sink.publish_one(Notification::new(
                    Severity::Success,
                    dedupe_key,
                    tx.success_message(&outcome.receipt, &outcome.output),
                ));
                Ok(outcome)
            }
            Err(err) => {
                let outcome = match &err {
                    Error::VerificationMismatch(_) => "verification_mismatch",
                    Error::UserCancelled => "cancelled",
                    Error::LedgerRejected { .. } => "rejected",
                    _ => "failed",
                };
                TRANSACTIONS_TOTAL.with_label_values(&[kind.as_str(), outcome]).inc();
                warn!(%kind, target = %target, "transaction failed: {}", err);
                self.sink.publish_one(Notification::new(
                    err.severity(),
                    dedupe_key,
                    tx.failure_message(&err),
                ));
                Err(err)
            }
        }
    }

    async fn run<T, F>(
        &self,
        tx: &T,
        action: WriteAction,
        signer: &dyn Signer,
        observe: &F,
    ) -> Result<TxOutcome<T::Output>>
    where
        T: LedgerTransaction,
        F: Fn(TxPhase) + Send + Sync,
    {
        if let Some(capability) = action.required_capability() {
            self.require(capability)?;
        }

        observe(TxPhase::Submitting);
        let signed = signer.authorize(&action).await?;
        let handle = self.gateway.submit_write(signed).await?;

        observe(TxPhase::Confirming);
        let receipt = self.gateway.await_confirmation(&handle).await?;

        observe(TxPhase::Verifying);
        let output = tx.verify(self.gateway.as_ref(), &receipt).await?;

        observe(TxPhase::Applying);
        tx.apply(&output).await;

        Ok(TxOutcome { receipt, output })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_gateway::{InMemoryLedger, LocalSigner};
    use parking_lot::Mutex;
    use record_core::Address;

    const AMBULANCE: &str = "0x3333333333333333333333333333333333333333";
    const PATIENT: &str = "0x1111111111111111111111111111111111111111";

    #[derive(Default)]
    struct Grant {
        applied: Mutex<bool>,
    }

    #[async_trait]
    impl LedgerTransaction for Grant {
        type Output = ();

        fn action(&self) -> WriteAction {
            WriteAction::GrantEmergencyAccess {
                patient: Address::new(PATIENT),
            }
        }

        fn failure_context(&self) -> String {
            "Failed to get emergency access".to_string()
        }

        fn success_message(&self, _receipt: &Receipt, _output: &()) -> String {
            "Emergency access granted".to_string()
        }

        async fn verify(&self, gateway: &dyn LedgerGateway, _receipt: &Receipt) -> Result<()> {
            if gateway
                .check_access(&Address::new(AMBULANCE), &Address::new(PATIENT))
                .await?
            {
                Ok(())
            } else {
                Err(Error::VerificationMismatch("no access".to_string()))
            }
        }

        async fn apply(&self, _output: &()) {
            *self.applied.lock() = true;
        }
    }

    fn orchestrator(ledger: Arc<InMemoryLedger>, sink: NotificationSink) -> TransactionOrchestrator {
        let capabilities = ledger.capabilities();
        TransactionOrchestrator::new(ledger, capabilities, sink)
    }

    #[tokio::test]
    async fn test_phases_in_order() {
        let ledger = Arc::new(InMemoryLedger::new());
        let orchestrator = orchestrator(ledger, NotificationSink::new(8));
        let signer = LocalSigner::new(AMBULANCE);
        let tx = Grant::default();

        let phases = Mutex::new(Vec::new());
        let outcome = orchestrator
            .execute_observed(&tx, &signer, |phase| phases.lock().push(phase))
            .await
            .unwrap();

        assert_eq!(outcome.receipt.block_number, 1);
        assert!(*tx.applied.lock());
        assert_eq!(
            *phases.lock(),
            vec![TxPhase::Submitting, TxPhase::Confirming, TxPhase::Verifying, TxPhase::Applying]
        );
    }

    #[tokio::test]
    async fn test_mismatch_skips_apply() {
        let ledger = Arc::new(InMemoryLedger::new());
        ledger.suppress_access_grants(true);
        let sink = NotificationSink::new(8);
        let mut events = sink.subscribe();
        let orchestrator = orchestrator(ledger, sink);
        let tx = Grant::default();

        let result = orchestrator.execute(&tx, &LocalSigner::new(AMBULANCE)).await;
        assert!(matches!(result, Err(Error::VerificationMismatch(_))));
        assert!(!*tx.applied.lock());

        let event = events.recv().await.unwrap();
        assert_eq!(event.severity, Severity::Error);
        assert!(event.message.starts_with("Failed to get emergency access"));
    }

    #[tokio::test]
    async fn test_cancelled_signer_never_submits() {
        let ledger = Arc::new(InMemoryLedger::new());
        let sink = NotificationSink::new(8);
        let mut events = sink.subscribe();
        let orchestrator = orchestrator(ledger.clone(), sink);
        let signer = LocalSigner::new(AMBULANCE);
        signer.set_declining(true);

        let result = orchestrator.execute(&Grant::default(), &signer).await;
        assert!(matches!(result, Err(Error::UserCancelled)));
        assert_eq!(ledger.write_calls(), 0);
        assert_eq!(events.recv().await.unwrap().severity, Severity::Warning);
    }

    #[tokio::test]
    async fn test_checks_negotiated_capabilities() {
        // The ledger offers emergency access, the negotiated set does not
        let ledger = Arc::new(InMemoryLedger::new());
        let negotiated = Capabilities::all().without(Capability::EmergencyAccess);
        let orchestrator = TransactionOrchestrator::new(ledger.clone(), negotiated, NotificationSink::new(8));

        let result = orchestrator.execute(&Grant::default(), &LocalSigner::new(AMBULANCE)).await;
        assert!(matches!(
            result,
            Err(Error::UnsupportedOperation(Capability::EmergencyAccess))
        ));
        assert_eq!(ledger.write_calls(), 0);
        assert_eq!(ledger.capability_queries(), 0);
    }
}
