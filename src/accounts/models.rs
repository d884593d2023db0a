//! Row types for a debtor partition.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

/// Sentinel creditor id for the debtor's own issuance account.
pub const ROOT_CREDITOR_ID: i64 = -1;
/// Coordinator created with every debtor.
pub const DEFAULT_COORDINATOR_ID: i64 = 1;
/// Branch created with every debtor.
pub const DEFAULT_BRANCH_ID: i32 = 1;

/// Issuer of a unit of account; root of one ledger partition.
///
/// The two seqnum columns are the per-partition counters behind prepared
/// transfer and withdrawal-request sequence numbers.
#[derive(Debug, Clone, FromRow)]
pub struct Debtor {
    pub debtor_id: i64,
    pub demurrage_rate: f64,
    pub demurrage_rate_ceiling: f64,
    pub prepared_transfer_seqnum: i64,
    pub withdrawal_request_seqnum: i64,
    pub created_at: DateTime<Utc>,
}

/// Balance record for a `(debtor, creditor)` pair.
///
/// `avl_balance` is the spendable part: total balance minus accrued demurrage
/// minus amounts locked by in-flight prepared transfers. Rows are created
/// lazily on first reference and never deleted.
#[derive(Debug, Clone, FromRow)]
pub struct Account {
    pub debtor_id: i64,
    pub creditor_id: i64,
    pub balance: i64,
    pub avl_balance: i64,
    pub demurrage: i64,
    pub discount_demurrage_rate: f64,
    pub last_transfer_ts: DateTime<Utc>,
}

impl Account {
    /// The debtor's own issuance account.
    pub fn is_root(&self) -> bool {
        self.creditor_id == ROOT_CREDITOR_ID
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct Branch {
    pub debtor_id: i64,
    pub branch_id: i32,
    pub info: serde_json::Value,
}

/// An authorized agent acting for a branch. The capability flags are policy
/// inputs checked by the caller; the core only stores them.
#[derive(Debug, Clone, FromRow)]
pub struct Operator {
    pub debtor_id: i64,
    pub branch_id: i32,
    pub user_id: i64,
    pub alias: String,
    pub profile: serde_json::Value,
    pub can_withdraw: bool,
    pub can_deposit: bool,
    pub can_audit: bool,
}

/// Initiator of one circular-clearing cycle.
#[derive(Debug, Clone, FromRow)]
pub struct Coordinator {
    pub debtor_id: i64,
    pub coordinator_id: i64,
}
