//! Insurance claim submission
//!
//! Validate locally, store the supporting document, convert the amount to
//! native units, file the claim, then reset the form and reconcile claims.
//! The claim id is whatever the Ledger assigns; it reaches the claims
//! snapshot through reconciliation, never from the submitted values.

use super::{report, InFlightGuard};
use crate::orchestrator::{LedgerTransaction, TransactionOrchestrator};
use crate::reconciler::{Claims, Reconciler, RefreshTrigger};
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use ledger_gateway::{ActionKind, BlobStore, Capability, ContentId, LedgerGateway, Receipt, Signer, WriteAction};
use record_core::{Address, NativeAmount};
use rust_decimal::Decimal;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Attached medical report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimDocument {
    /// Original file name
    pub file_name: String,
    /// File content
    pub content: Bytes,
}

/// Claim input as entered by the patient
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClaimForm {
    /// Human-entered amount, e.g. "1.5"
    pub claim_amount: String,
    /// Diagnosis
    pub diagnosis: String,
    /// Treating hospital
    pub hospital_name: String,
    /// Insurer address
    pub insurance_provider: String,
    /// Supporting document
    pub document: Option<ClaimDocument>,
}

impl ClaimForm {
    /// Check every required field, in form order. Fails on the first problem.
    pub fn validate(&self, decimals: u32) -> Result<NativeAmount> {
        if self.claim_amount.trim().is_empty() {
            return Err(Error::validation("claim_amount", "Please enter the claim amount"));
        }
        let amount = NativeAmount::parse_human(self.claim_amount.trim(), decimals)
            .map_err(|e| Error::validation("claim_amount", e.to_string()))?;
        if amount.is_zero() {
            return Err(Error::validation("claim_amount", "Claim amount must be greater than zero"));
        }

        if self.diagnosis.trim().is_empty() {
            return Err(Error::validation("diagnosis", "Please enter a diagnosis"));
        }
        if self.hospital_name.trim().is_empty() {
            return Err(Error::validation("hospital_name", "Please enter the hospital name"));
        }

        let insurer = Address::new(self.insurance_provider.trim());
        if insurer.is_empty() {
            return Err(Error::validation(
                "insurance_provider",
                "Please enter the insurance provider address",
            ));
        }
        if !insurer.is_well_formed() {
            return Err(Error::validation(
                "insurance_provider",
                format!("'{}' is not a valid address", insurer),
            ));
        }

        match &self.document {
            Some(doc) if !doc.content.is_empty() => Ok(amount),
            _ => Err(Error::validation("document", "Please upload a medical report")),
        }
    }

    /// Clear every field
    pub fn reset(&mut self) {
        *self = ClaimForm::default();
    }
}

/// Filed claim
#[derive(Debug, Clone)]
pub struct ClaimReceipt {
    /// Ledger receipt
    pub receipt: Receipt,
    /// Stored document
    pub document: ContentId,
    /// Amount in native units
    pub claim_amount: NativeAmount,
    /// Amount as entered
    pub claim_amount_human: Decimal,
}

/// Claim submission for one patient
pub struct ClaimSubmission {
    orchestrator: Arc<TransactionOrchestrator>,
    blobs: Arc<dyn BlobStore>,
    signer: Arc<dyn Signer>,
    guard: InFlightGuard,
    claims: Arc<Reconciler<Claims>>,
    decimals: u32,
}

impl fmt::Debug for ClaimSubmission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClaimSubmission")
            .field("patient", self.signer.address())
            .field("decimals", &self.decimals)
            .finish()
    }
}

const CONTEXT: &str = "Error submitting claim";

impl ClaimSubmission {
    /// Create workflow
    pub fn new(
        orchestrator: Arc<TransactionOrchestrator>,
        blobs: Arc<dyn BlobStore>,
        signer: Arc<dyn Signer>,
        guard: InFlightGuard,
        claims: Arc<Reconciler<Claims>>,
        decimals: u32,
    ) -> Self {
        Self {
            orchestrator,
            blobs,
            signer,
            guard,
            claims,
            decimals,
        }
    }

    /// File the claim described by `form`; the form is reset on success
    pub async fn submit(&self, form: &mut ClaimForm) -> Result<ClaimReceipt> {
        let patient = self.signer.address();
        let key = format!("claim-submit:{}", patient);

        let _token = match self.guard.acquire(ActionKind::SubmitInsuranceClaim, patient.as_str()) {
            Ok(token) => token,
            Err(err) => {
                report(self.orchestrator.sink(), &key, CONTEXT, &err);
                return Err(err);
            }
        };

        let (tx, claim_amount) = match self.prepare(form).await {
            Ok(prepared) => prepared,
            Err(err) => {
                warn!(%patient, "claim not submitted: {}", err);
                report(self.orchestrator.sink(), &key, CONTEXT, &err);
                return Err(err);
            }
        };

        let outcome = self.orchestrator.execute(&tx, self.signer.as_ref()).await?;
        let document = tx.document;
        form.reset();

        // The claim id only reaches the snapshot if claims can be read back
        if self.orchestrator.capabilities().supports(Capability::PatientClaims) {
            if let Err(e) = self.claims.refresh(RefreshTrigger::PostWrite).await {
                warn!("Claims refresh after submission failed: {}", e);
            }
        } else {
            debug!(%patient, "claims not readable on this ledger, skipping refresh");
        }

        info!(%patient, tx_hash = %outcome.receipt.tx_hash, document = %document, "insurance claim filed");
        Ok(ClaimReceipt {
            receipt: outcome.receipt,
            document,
            claim_amount,
            claim_amount_human: claim_amount
                .to_decimal(self.decimals)
                .unwrap_or_default(),
        })
    }

    /// Steps before the Ledger: validation, capability, document storage,
    /// amount conversion
    async fn prepare(&self, form: &ClaimForm) -> Result<(SubmitClaim, NativeAmount)> {
        let claim_amount = form.validate(self.decimals)?;

        self.orchestrator.require(Capability::SubmitInsuranceClaim)?;

        let content = form
            .document
            .as_ref()
            .map(|doc| doc.content.clone())
            .unwrap_or_default();
        let document = self.blobs.store(content).await?;

        let tx = SubmitClaim {
            insurer: Address::new(form.insurance_provider.trim()),
            document,
            claim_amount,
            diagnosis: form.diagnosis.trim().to_string(),
            hospital_name: form.hospital_name.trim().to_string(),
        };
        Ok((tx, claim_amount))
    }
}

struct SubmitClaim {
    insurer: Address,
    document: ContentId,
    claim_amount: NativeAmount,
    diagnosis: String,
    hospital_name: String,
}

#[async_trait]
impl LedgerTransaction for SubmitClaim {
    type Output = ();

    fn action(&self) -> WriteAction {
        WriteAction::SubmitInsuranceClaim {
            insurer: self.insurer.clone(),
            ipfs_hash: self.document.as_str().to_string(),
            claim_amount: self.claim_amount,
            diagnosis: self.diagnosis.clone(),
            hospital_name: self.hospital_name.clone(),
        }
    }

    fn failure_context(&self) -> String {
        CONTEXT.to_string()
    }

    fn success_message(&self, receipt: &Receipt, _output: &()) -> String {
        format!(
            "Insurance claim submitted successfully (transaction {}...). Your claim is now pending review by the insurance provider",
            receipt.tx_hash.get(..20).unwrap_or(&receipt.tx_hash)
        )
    }

    /// Confirmation is the postcondition; the claims refresh picks up the entry
    async fn verify(&self, _gateway: &dyn LedgerGateway, _receipt: &Receipt) -> Result<()> {
        Ok(())
    }

    async fn apply(&self, _output: &()) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled() -> ClaimForm {
        ClaimForm {
            claim_amount: "1.5".to_string(),
            diagnosis: "Fracture".to_string(),
            hospital_name: "General".to_string(),
            insurance_provider: "0x4444444444444444444444444444444444444444".to_string(),
            document: Some(ClaimDocument {
                file_name: "report.pdf".to_string(),
                content: Bytes::from_static(b"%PDF"),
            }),
        }
    }

    fn field_of(result: Result<NativeAmount>) -> &'static str {
        match result {
            Err(Error::Validation { field, .. }) => field,
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_valid_form_converts_amount() {
        assert_eq!(
            filled().validate(18).unwrap(),
            NativeAmount::new(1_500_000_000_000_000_000)
        );
    }

    #[test]
    fn test_fields_checked_in_order() {
        let mut form = filled();
        form.diagnosis.clear();
        form.document = None;
        assert_eq!(field_of(form.validate(18)), "diagnosis");

        let mut form = filled();
        form.claim_amount = "0".to_string();
        assert_eq!(field_of(form.validate(18)), "claim_amount");

        let mut form = filled();
        form.claim_amount = "abc".to_string();
        assert_eq!(field_of(form.validate(18)), "claim_amount");

        let mut form = filled();
        form.insurance_provider = "insurer".to_string();
        assert_eq!(field_of(form.validate(18)), "insurance_provider");

        let mut form = filled();
        form.document = None;
        assert_eq!(field_of(form.validate(18)), "document");
    }

    #[test]
    fn test_reset() {
        let mut form = filled();
        form.reset();
        assert_eq!(form, ClaimForm::default());
    }
}
