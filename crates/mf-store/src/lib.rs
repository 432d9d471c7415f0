//! Transactional document store for the studio control plane.
//!
//! A single SQLite database holds every collection as JSON documents
//! addressed by `(collection, id)`, with indexed owner/scope/lookup key
//! columns for the handful of query shapes the domain needs. All
//! invariant-checking mutations run inside one SQLite transaction via
//! [`DocStore::with_tx`].

pub mod collections;
pub mod doc_store;
pub mod idempotency;

pub use doc_store::{DocKeys, DocStore, StoreError, TxContext};
pub use idempotency::{IdempotencyLedger, IdempotencyOutcome, IdempotencyRecord};
