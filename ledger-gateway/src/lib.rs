//! # MedLedger Gateway
//!
//! Typed seams to the external collaborators the sync engine depends on:
//! - `LedgerGateway`: read collections, submit writes, await confirmation, check access
//! - `Signer`: caller-provided signing capability, required for every write
//! - `BlobStore`: content-addressed storage for attached documents
//! - Capability negotiation: optional Ledger operations are declared once
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │        Sync Engine (reconcilers + workflows)        │
//! └────────────┬───────────────────────┬────────────────┘
//!              │                       │
//!      ┌───────▼────────┐      ┌───────▼──────┐
//!      │ LedgerGateway  │      │  BlobStore   │
//!      │  (dyn, async)  │      │ (dyn, async) │
//!      └───────┬────────┘      └───────┬──────┘
//!              │                       │
//!   ┌──────────▼──────────┐   ┌────────▼─────────┐
//!   │ RPC provider / or   │   │ IPFS pinning /   │
//!   │ InMemoryLedger      │   │ MemoryBlobStore  │
//!   └─────────────────────┘   └──────────────────┘
//! ```
//!
//! Nothing here retries: every failure is returned to the caller classified as
//! [`GatewayError`].

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

pub mod action;
pub mod blob;
pub mod error;
pub mod gateway;
pub mod memory;
pub mod signer;

pub use action::{ActionKind, PendingHandle, Receipt, WriteAction};
pub use blob::{BlobStore, ContentId, MemoryBlobStore};
pub use error::{GatewayError, Result};
pub use gateway::{Capabilities, Capability, LedgerGateway};
pub use memory::InMemoryLedger;
pub use signer::{LocalSigner, SignedWrite, Signer};
