//! Signing capability
//!
//! The engine never holds keys. Callers hand it an already-authenticated
//! [`Signer`]; every write is authorized through it before submission.

use crate::{action::WriteAction, GatewayError, Result};
use async_trait::async_trait;
use record_core::Address;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicBool, Ordering};

/// A write authorized by a signer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedWrite {
    /// Signing identity
    pub signer: Address,

    /// Authorized action
    pub action: WriteAction,

    /// Signature over the action
    pub signature: String,
}

/// Caller-provided signing capability
#[async_trait]
pub trait Signer: Send + Sync {
    /// Signing identity
    fn address(&self) -> &Address;

    /// Authorize a write; [`GatewayError::UserCancelled`] when declined
    async fn authorize(&self, action: &WriteAction) -> Result<SignedWrite>;
}

/// Local signer that digests the action instead of holding a real key
#[derive(Debug)]
pub struct LocalSigner {
    address: Address,
    declining: AtomicBool,
}

impl LocalSigner {
    /// Create new signer
    pub fn new(address: impl Into<Address>) -> Self {
        Self {
            address: address.into(),
            declining: AtomicBool::new(false),
        }
    }

    /// Make subsequent authorizations fail as if the user declined
    pub fn set_declining(&self, declining: bool) {
        self.declining.store(declining, Ordering::SeqCst);
    }
}

#[async_trait]
impl Signer for LocalSigner {
    fn address(&self) -> &Address {
        &self.address
    }

    async fn authorize(&self, action: &WriteAction) -> Result<SignedWrite> {
        if self.declining.load(Ordering::SeqCst) {
            return Err(GatewayError::UserCancelled);
        }

        let payload = serde_json::to_vec(action)
            .map_err(|e| GatewayError::Rejected { reason: format!("unencodable action: {}", e) })?;
        let mut hasher = Sha256::new();
        hasher.update(self.address.as_str().as_bytes());
        hasher.update(&payload);

        Ok(SignedWrite {
            signer: self.address.clone(),
            action: action.clone(),
            signature: format!("{:x}", hasher.finalize()),
        })
    }
}
