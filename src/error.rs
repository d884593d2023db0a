//! Error kinds for the debtor node core.
//!
//! The atomic execution wrapper dispatches on these kinds: `Conflict` is
//! retried transparently, `NestedAtomic` and `KeySpaceExhausted` are fatal
//! misuse/exhaustion, and domain errors are returned to the caller untouched.

use thiserror::Error;

/// SQLSTATE raised by PostgreSQL when a transaction cannot be serialized.
pub const SERIALIZATION_FAILURE: &str = "40001";
/// SQLSTATE raised by PostgreSQL when it breaks a deadlock.
pub const DEADLOCK_DETECTED: &str = "40P01";
/// SQLSTATE raised by PostgreSQL on a uniqueness violation.
pub const UNIQUE_VIOLATION: &str = "23505";

#[derive(Debug, Error)]
pub enum LedgerError {
    /// `execute_atomic` was invoked while another atomic unit was already
    /// running on the same session. Caller bug, never retried.
    #[error("atomic execution units cannot be nested")]
    NestedAtomic,

    /// The store detected a write/write or read/write conflict. The atomic
    /// wrapper re-executes the whole unit of work.
    #[error("transaction serialization conflict")]
    Conflict,

    #[error("amount must be positive")]
    InvalidAmount,

    #[error("insufficient funds: {available} available")]
    InsufficientFunds { available: i64 },

    #[error("withdrawal request does not exist")]
    InvalidWithdrawalRequest,

    #[error("prepared transfer does not exist or does not match the claimed role")]
    InvalidPreparedTransfer,

    #[error("debtor does not exist")]
    DebtorNotFound,

    /// The keyspace is 2^63, so hitting this bound means the random source
    /// is broken, not that the space is full.
    #[error("could not allocate a unique debtor id after {tries} attempts")]
    KeySpaceExhausted { tries: u32 },

    /// A stored row violates an invariant the schema should have enforced.
    #[error("ledger inconsistency: {0}")]
    Inconsistency(String),

    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),
}

impl LedgerError {
    /// True for the one kind the atomic wrapper retries.
    pub fn is_conflict(&self) -> bool {
        matches!(self, LedgerError::Conflict)
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(e: sqlx::Error) -> Self {
        if sqlstate(&e).as_deref().is_some_and(is_conflict_code) {
            LedgerError::Conflict
        } else {
            LedgerError::Database(e)
        }
    }
}

/// SQLSTATE code carried by an sqlx error, if it is a database error.
pub fn sqlstate(e: &sqlx::Error) -> Option<String> {
    match e {
        sqlx::Error::Database(db) => db.code().map(|c| c.into_owned()),
        _ => None,
    }
}

/// Serialization failures and broken deadlocks both signal "retry the unit".
pub fn is_conflict_code(code: &str) -> bool {
    code == SERIALIZATION_FAILURE || code == DEADLOCK_DETECTED
}

/// True for racing-insert uniqueness violations. These are *not* conflicts by
/// default; only code that expects the race converts them (see
/// [`crate::atomic::retry_on_integrity_conflict`]).
pub fn is_unique_violation(e: &sqlx::Error) -> bool {
    sqlstate(e).as_deref() == Some(UNIQUE_VIOLATION)
}
