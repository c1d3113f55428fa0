//! Content-addressed document storage

use crate::{GatewayError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;

/// Content identifier returned by a blob store
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentId(String);

impl ContentId {
    /// Wrap an identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Blob store trait
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Persist a payload; [`GatewayError::StorageFailure`] on failure
    async fn store(&self, payload: Bytes) -> Result<ContentId>;
}

/// In-process blob store keyed by SHA-256
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<ContentId, Bytes>>,
    failure: Mutex<Option<String>>,
}

impl MemoryBlobStore {
    /// Create empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every subsequent store with `reason` (`None` clears)
    pub fn set_failure(&self, reason: Option<String>) {
        *self.failure.lock() = reason;
    }

    /// Fetch a stored payload
    pub fn get(&self, id: &ContentId) -> Option<Bytes> {
        self.blobs.read().get(id).cloned()
    }

    /// Number of stored payloads
    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    /// True when nothing is stored
    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }

    fn content_id(payload: &[u8]) -> ContentId {
        let digest = format!("{:x}", Sha256::digest(payload));
        ContentId::new(format!("Qm{}", &digest[..44]))
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn store(&self, payload: Bytes) -> Result<ContentId> {
        if let Some(reason) = self.failure.lock().clone() {
            return Err(GatewayError::StorageFailure(reason));
        }

        let id = Self::content_id(&payload);
        self.blobs.write().insert(id.clone(), payload);
        tracing::debug!(content_id = %id, "stored blob");
        Ok(id)
    }
}
