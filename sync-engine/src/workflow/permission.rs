//! Owner decisions on permission requests
//!
//! Approve, decline and batch-approve all verify by re-reading the owner's
//! requests: the decided request must have left `Pending` in the expected
//! direction, or no longer be listed. The re-read goes through the
//! permission reconciler, so it is serialized with refreshes of the same
//! collection, and the verified collection replaces the snapshot without
//! notifications.

use super::{report, InFlightGuard};
use crate::orchestrator::{LedgerTransaction, TransactionOrchestrator};
use crate::reconciler::{PermissionRequests, Reconciler};
use crate::{Error, Result};
use async_trait::async_trait;
use ledger_gateway::{ActionKind, LedgerGateway, Receipt, Signer, WriteAction};
use record_core::{PermissionRequest, RequestStatus};
use std::fmt;
use std::sync::Arc;

/// Owner decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionDecision {
    /// Approve one request
    Approve,
    /// Decline one request
    Decline,
    /// Approve a request covering every record
    ApproveBatch,
}

impl PermissionDecision {
    fn action(&self, request_id: u64) -> WriteAction {
        match self {
            PermissionDecision::Approve => WriteAction::ApprovePermission { request_id },
            PermissionDecision::Decline => WriteAction::DeclinePermission { request_id },
            PermissionDecision::ApproveBatch => WriteAction::ApproveBatchAccess { request_id },
        }
    }

    fn accepts(&self, status: RequestStatus) -> bool {
        match self {
            PermissionDecision::Approve | PermissionDecision::ApproveBatch => {
                matches!(status, RequestStatus::Approved | RequestStatus::Completed)
            }
            PermissionDecision::Decline => status == RequestStatus::Rejected,
        }
    }

    fn failure_context(&self) -> &'static str {
        match self {
            PermissionDecision::Approve => "Error approving request",
            PermissionDecision::Decline => "Error declining request",
            PermissionDecision::ApproveBatch => "Error approving batch access request",
        }
    }
}

/// Approve/decline on behalf of the record owner
pub struct PermissionActions {
    orchestrator: Arc<TransactionOrchestrator>,
    signer: Arc<dyn Signer>,
    guard: InFlightGuard,
    requests: Arc<Reconciler<PermissionRequests>>,
}

impl fmt::Debug for PermissionActions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PermissionActions")
            .field("owner", self.signer.address())
            .finish()
    }
}

impl PermissionActions {
    /// Create workflow
    pub fn new(
        orchestrator: Arc<TransactionOrchestrator>,
        signer: Arc<dyn Signer>,
        guard: InFlightGuard,
        requests: Arc<Reconciler<PermissionRequests>>,
    ) -> Self {
        Self {
            orchestrator,
            signer,
            guard,
            requests,
        }
    }

    /// Approve a request
    pub async fn approve(&self, request_id: u64) -> Result<Receipt> {
        self.decide(request_id, PermissionDecision::Approve).await
    }

    /// Decline a request
    pub async fn decline(&self, request_id: u64) -> Result<Receipt> {
        self.decide(request_id, PermissionDecision::Decline).await
    }

    /// Approve a request for every record of the owner
    pub async fn approve_batch_access(&self, request_id: u64) -> Result<Receipt> {
        self.decide(request_id, PermissionDecision::ApproveBatch).await
    }

    /// Run a decision through the orchestrator
    pub async fn decide(&self, request_id: u64, decision: PermissionDecision) -> Result<Receipt> {
        let action = decision.action(request_id);

        // Approving and declining the same request are mutually exclusive
        let _token = match self.guard.acquire(ActionKind::ApprovePermission, request_id.to_string()) {
            Ok(token) => token,
            Err(err) => {
                let key = format!("tx:{}:{}", action.kind(), request_id);
                report(self.orchestrator.sink(), &key, decision.failure_context(), &err);
                return Err(err);
            }
        };

        let tx = Decide {
            request_id,
            decision,
            requests: &self.requests,
        };
        let outcome = self.orchestrator.execute(&tx, self.signer.as_ref()).await?;
        Ok(outcome.receipt)
    }
}

struct Decide<'a> {
    request_id: u64,
    decision: PermissionDecision,
    requests: &'a Reconciler<PermissionRequests>,
}

#[async_trait]
impl LedgerTransaction for Decide<'_> {
    type Output = Vec<PermissionRequest>;

    fn action(&self) -> WriteAction {
        self.decision.action(self.request_id)
    }

    fn failure_context(&self) -> String {
        self.decision.failure_context().to_string()
    }

    fn success_message(&self, _receipt: &Receipt, _output: &Vec<PermissionRequest>) -> String {
        match self.decision {
            PermissionDecision::Approve => format!("Permission request {} approved", self.request_id),
            PermissionDecision::Decline => format!("Permission request {} declined", self.request_id),
            PermissionDecision::ApproveBatch => "Batch access request approved successfully".to_string(),
        }
    }

    /// Verified requests are installed here, under the reconciler's lock
    async fn verify(&self, _gateway: &dyn LedgerGateway, _receipt: &Receipt) -> Result<Vec<PermissionRequest>> {
        self.requests
            .verify_and_install(|requests| {
                match requests.iter().find(|r| r.request_id == self.request_id) {
                    Some(request) if !self.decision.accepts(request.status) => {
                        Err(Error::VerificationMismatch(format!(
                            "request {} is {} after the write",
                            self.request_id, request.status
                        )))
                    }
                    _ => Ok(()),
                }
            })
            .await
    }

    async fn apply(&self, _requests: &Vec<PermissionRequest>) {}
}
