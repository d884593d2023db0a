//! Atomic execution wrapper.
//!
//! Every mutating procedure runs beneath [`Session::execute_atomic`]: one
//! store transaction at REPEATABLE READ, committed on normal return, rolled
//! back on error, and re-executed from the start whenever the store reports a
//! serialization conflict. The unit of work must therefore be re-runnable;
//! its only observable side effects are the writes of the one execution that
//! commits.
//!
//! Uniqueness violations are deliberately *not* conflicts: code that inserts
//! optimistically and expects a race wraps the insert in
//! [`retry_on_integrity_conflict`], which converts the violation into the
//! conflict signal so the outer unit, not just the insert, is what gets
//! retried. On the retry the prior-to-insert check sees the winning row.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rand::Rng;

use crate::db::{Database, PgTx};
use crate::error::{LedgerError, is_unique_violation};

/// Delay before the first conflict retry; doubles per attempt up to the cap.
const RETRY_BASE_DELAY_MS: u64 = 10;
const RETRY_MAX_DELAY_MS: u64 = 1000;

/// One logical store session. Atomic units cannot nest within a session;
/// independent sessions (one per concurrent task) retry independently.
pub struct Session<'a> {
    db: &'a Database,
    active: AtomicBool,
}

impl<'a> Session<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self {
            db,
            active: AtomicBool::new(false),
        }
    }

    /// Run `work` as one atomic unit.
    ///
    /// Commits on normal return, rolls back and returns the error otherwise.
    /// A [`LedgerError::Conflict`], whether raised inside `work` or detected
    /// at commit, re-executes `work` from the start after a jittered
    /// backoff, so the caller observes exactly one effective application.
    pub async fn execute_atomic<T, F>(&self, work: F) -> Result<T, LedgerError>
    where
        F: AsyncFn(&mut PgTx) -> Result<T, LedgerError>,
    {
        if self.active.swap(true, Ordering::AcqRel) {
            return Err(LedgerError::NestedAtomic);
        }
        let _reset = ActiveGuard(&self.active);

        let mut attempt: u32 = 0;
        loop {
            match self.run_once(&work).await {
                Err(LedgerError::Conflict) => {
                    attempt += 1;
                    if attempt % 10 == 0 {
                        tracing::warn!(attempt, "atomic unit keeps conflicting, still retrying");
                    }
                    tokio::time::sleep(retry_delay(attempt)).await;
                }
                other => return other,
            }
        }
    }

    async fn run_once<T, F>(&self, work: &F) -> Result<T, LedgerError>
    where
        F: AsyncFn(&mut PgTx) -> Result<T, LedgerError>,
    {
        let mut tx = self.db.pool().begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ")
            .execute(&mut *tx)
            .await?;

        match work(&mut tx).await {
            Ok(value) => {
                // A serialization failure at commit maps to Conflict and is
                // retried like any other.
                tx.commit().await?;
                Ok(value)
            }
            Err(e) => {
                // The rollback result is secondary to the original error.
                let _ = tx.rollback().await;
                Err(e)
            }
        }
    }
}

struct ActiveGuard<'a>(&'a AtomicBool);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Convert a uniqueness violation raised inside `fut` into the serialization
/// conflict signal, so the *enclosing* atomic unit is retried as a whole.
///
/// Use around optimistic inserts whose key may be racing another session:
/// the losing session re-runs its whole unit and its prior-to-insert check
/// then finds the winner's row.
pub async fn retry_on_integrity_conflict<T, F>(fut: F) -> Result<T, LedgerError>
where
    F: Future<Output = Result<T, LedgerError>>,
{
    match fut.await {
        Err(LedgerError::Database(e)) if is_unique_violation(&e) => Err(LedgerError::Conflict),
        other => other,
    }
}

fn retry_delay(attempt: u32) -> Duration {
    let exp = RETRY_BASE_DELAY_MS.saturating_mul(1u64 << attempt.min(7).saturating_sub(1));
    let capped = exp.min(RETRY_MAX_DELAY_MS);
    // Jitter desynchronizes units that conflicted with each other.
    let jitter = rand::thread_rng().gen_range(0..=capped / 2);
    Duration::from_millis(capped + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_delay_grows_and_caps() {
        for attempt in 1..64 {
            let delay = retry_delay(attempt).as_millis() as u64;
            assert!(delay >= RETRY_BASE_DELAY_MS.min(RETRY_MAX_DELAY_MS));
            assert!(delay <= RETRY_MAX_DELAY_MS + RETRY_MAX_DELAY_MS / 2);
        }
    }

    #[tokio::test]
    async fn test_integrity_conflict_passthrough() {
        // Non-database errors are untouched.
        let r: Result<(), _> =
            retry_on_integrity_conflict(async { Err(LedgerError::InvalidAmount) }).await;
        assert!(matches!(r, Err(LedgerError::InvalidAmount)));

        let r: Result<i64, LedgerError> = retry_on_integrity_conflict(async { Ok(7) }).await;
        assert_eq!(r.unwrap(), 7);
    }
}
