//! Firestore REST API client and credit ledger.
//!
//! This crate provides:
//! - A thin Firestore REST client with service account authentication
//! - A serde codec between records and Firestore documents
//! - The [`LedgerStore`] trait and its Firestore implementation, which
//!   commits every credit mutation atomically with an optimistic
//!   precondition on the user document

pub mod client;
pub mod codec;
pub mod error;
pub mod ledger;
pub mod ledger_repo;
pub mod metrics;
pub mod retry;
pub mod token_cache;
pub mod types;

pub use client::{FirestoreClient, FirestoreConfig};
pub use error::{FirestoreError, FirestoreResult};
pub use ledger::{
    require_identity, ChargeReceipt, LedgerError, LedgerResult, LedgerStore, ResetSummary,
    UserIdentity,
};
pub use ledger_repo::FirestoreLedger;
pub use retry::RetryConfig;
pub use types::{Document, StructuredQuery, Value};
