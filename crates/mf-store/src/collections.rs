//! Collection names for every persisted document family.

pub const RESERVATIONS: &str = "reservations";
pub const RESERVATION_STORAGE_AUDIT: &str = "reservationStorageAudit";
pub const RESERVATION_QUEUE_FAIRNESS_AUDIT: &str = "reservationQueueFairnessAudit";

pub const AGENT_QUOTES: &str = "agentQuotes";
pub const AGENT_RESERVATIONS: &str = "agentReservations";
pub const AGENT_ORDERS: &str = "agentOrders";
pub const AGENT_CLIENTS: &str = "agentClients";
pub const AGENT_ACCOUNTS: &str = "agentAccounts";
pub const AGENT_AUDIT_LOGS: &str = "agentAuditLogs";
pub const AGENT_REQUESTS: &str = "agentRequests";
pub const AGENT_TERMS_ACCEPTANCES: &str = "agentTermsAcceptances";

pub const LIBRARY_ITEMS: &str = "libraryItems";
pub const LIBRARY_LOANS: &str = "libraryLoans";
pub const LIBRARY_REPLACEMENT_FEES: &str = "libraryReplacementFees";
pub const LIBRARY_LOAN_IDEMPOTENCY: &str = "libraryLoanIdempotency";

pub const BATCHES: &str = "batches";
pub const NOTIFICATIONS: &str = "notifications";

/// Per-account spend ledger sub-collection.
pub fn account_ledger(agent_client_id: &str) -> String {
    format!("{AGENT_ACCOUNTS}/{agent_client_id}/ledger")
}

/// Per-request audit sub-collection for commission/X1C requests.
pub fn agent_request_audit(request_id: &str) -> String {
    format!("{AGENT_REQUESTS}/{request_id}/audit")
}

/// Per-batch timeline sub-collection.
pub fn batch_timeline(batch_id: &str) -> String {
    format!("{BATCHES}/{batch_id}/timeline")
}
