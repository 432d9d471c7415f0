//! Studio tool-library loan lifecycle: checkout, check-in, mark-lost,
//! and replacement-fee assessment, all sharing the idempotency-ledger
//! discipline and the copy-count invariants.

pub mod loans;
pub mod types;

pub use loans::LibraryService;
pub use types::*;
