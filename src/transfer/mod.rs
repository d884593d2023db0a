//! The prepared-transfer engine.
//!
//! A prepared transfer is a two-phase fund movement: `prepare` locks the
//! amount on the sender account and inserts the in-flight row; `commit`
//! settles and deletes it; `cancel` releases the lock and deletes it. The
//! row exists only while in flight; there is no terminal transfer state,
//! only the balance deltas (and, for withdrawals, the terminal audit record).
//!
//! ```text
//! prepare ──▶ [row exists, funds locked] ──▶ commit  (settle, delete)
//!                                        └─▶ cancel  (release, delete)
//! ```

pub mod engine;
pub mod types;

pub use engine::TransferEngine;
pub use types::{CommitRole, PreparedTransfer, TransferKind};
