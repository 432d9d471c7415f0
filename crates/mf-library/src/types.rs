use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Loan term in days.
pub const LOAN_TERM_DAYS: i64 = 28;
pub const RENEWAL_LIMIT: u32 = 1;

// ---------------------------------------------------------------------------
// Items
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Available,
    CheckedOut,
    Overdue,
    Lost,
    Unavailable,
    Archived,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    Book,
    Physical,
    Print,
    Digital,
}

impl MediaType {
    /// Digital media never leaves the building.
    pub fn is_lendable(&self) -> bool {
        matches!(self, MediaType::Book | MediaType::Physical | MediaType::Print)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryItem {
    pub item_id: String,
    pub title: String,
    #[serde(default)]
    pub isbn10: Option<String>,
    #[serde(default)]
    pub isbn13: Option<String>,
    pub media_type: MediaType,
    pub total_copies: u32,
    pub available_copies: u32,
    pub status: ItemStatus,
    #[serde(default)]
    pub replacement_value_cents: i64,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Loans
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoanStatus {
    CheckedOut,
    ReturnRequested,
    Overdue,
    Returned,
    Lost,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Loan {
    pub loan_id: String,
    pub item_id: String,
    pub borrower_uid: String,
    pub status: LoanStatus,
    pub loaned_at: DateTime<Utc>,
    pub due_at: DateTime<Utc>,
    #[serde(default)]
    pub returned_at: Option<DateTime<Utc>>,
    pub renewal_limit: u32,
    #[serde(default)]
    pub renewal_count: u32,
    #[serde(default)]
    pub replacement_value_cents: i64,
    #[serde(default)]
    pub replacement_fee_id: Option<String>,
    #[serde(default)]
    pub replacement_fee_status: Option<String>,
    #[serde(default)]
    pub replacement_fee_amount_cents: Option<i64>,
}

// ---------------------------------------------------------------------------
// Replacement fees
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplacementFee {
    pub fee_id: String,
    pub loan_id: String,
    pub item_id: String,
    pub borrower_uid: String,
    pub amount_cents: i64,
    pub status: String,
    pub assessed_by_uid: String,
    pub assessed_at: DateTime<Utc>,
}
