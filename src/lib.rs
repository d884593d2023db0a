//! Accounting core of a debtor node in a mutual-credit network.
//!
//! A debtor issues a unit of account and keeps per-creditor balances. This
//! crate is the prepared-transfer engine behind that ledger: two-phase
//! (prepare → commit/cancel) fund locking, balance and demurrage invariants,
//! globally-unique partition ids, and an atomic-retry execution wrapper that
//! makes every procedure safe under concurrent access to a shared
//! PostgreSQL store.
//!
//! # Modules
//!
//! - [`keygen`] - Collision-free 63-bit debtor id generation
//! - [`atomic`] - One-transaction execution with conflict retry
//! - [`accounts`] - Debtor partitions, balance rows, demurrage policy
//! - [`transfer`] - The prepare/commit/cancel state machine
//! - [`withdrawal`] - Operator withdrawal requests and terminal records
//! - [`procedures`] - Caller-facing atomic procedures
//! - [`context`] - Process context (store, clock, policy, hooks)
//! - [`db`] - Connection pool and schema bootstrap
//!
//! HTTP/task-dispatch wiring, broker setup, and authorization policy are the
//! caller's concern; procedures only re-check structural role consistency.

pub mod accounts;
pub mod atomic;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod keygen;
pub mod logging;
pub mod procedures;
pub mod transfer;
pub mod withdrawal;

// Convenient re-exports at crate root
pub use accounts::{
    Account, Branch, Coordinator, DEFAULT_BRANCH_ID, DEFAULT_COORDINATOR_ID, Debtor, Operator,
    ROOT_CREDITOR_ID,
};
pub use atomic::{Session, retry_on_integrity_conflict};
pub use context::{Clock, Context, ContextBuilder, LogSettlementHook, SettlementHook, SystemClock};
pub use db::Database;
pub use error::LedgerError;
pub use keygen::KeyGenerator;
pub use transfer::{CommitRole, PreparedTransfer, TransferKind};
pub use withdrawal::{Withdrawal, WithdrawalRequest};
