//! Balance bookkeeping for debtor partitions.
//!
//! Every mutation here runs inside an enclosing atomic unit and takes the
//! row-level exclusive lock first (`SELECT ... FOR UPDATE`); the lock is held
//! until the unit commits or rolls back. There are no in-process locks; all
//! coordination is store-transactional plus the wrapper's conflict retry.

use chrono::{DateTime, Utc};

use super::demurrage::{self, DemurragePolicy};
use super::models::{Account, Debtor};
use crate::atomic::retry_on_integrity_conflict;
use crate::db::PgTx;
use crate::error::LedgerError;

const ACCOUNT_COLUMNS: &str = "debtor_id, creditor_id, balance, avl_balance, \
                               demurrage, discount_demurrage_rate, last_transfer_ts";

/// Debtor-row operations: lookups and the per-partition sequence counters.
pub struct DebtorRegistry;

impl DebtorRegistry {
    pub async fn get(tx: &mut PgTx, debtor_id: i64) -> Result<Option<Debtor>, LedgerError> {
        let debtor = sqlx::query_as::<_, Debtor>(
            r#"SELECT debtor_id, demurrage_rate, demurrage_rate_ceiling,
                      prepared_transfer_seqnum, withdrawal_request_seqnum, created_at
               FROM debtors WHERE debtor_id = $1"#,
        )
        .bind(debtor_id)
        .fetch_optional(&mut **tx)
        .await?;

        Ok(debtor)
    }

    pub async fn require(tx: &mut PgTx, debtor_id: i64) -> Result<Debtor, LedgerError> {
        Self::get(tx, debtor_id)
            .await?
            .ok_or(LedgerError::DebtorNotFound)
    }

    /// Set the partition-wide demurrage caps. Done once, at creation.
    pub async fn set_rates(
        tx: &mut PgTx,
        debtor_id: i64,
        demurrage_rate: f64,
        demurrage_rate_ceiling: f64,
    ) -> Result<(), LedgerError> {
        let updated = sqlx::query(
            "UPDATE debtors SET demurrage_rate = $2, demurrage_rate_ceiling = $3 \
             WHERE debtor_id = $1",
        )
        .bind(debtor_id)
        .bind(demurrage_rate)
        .bind(demurrage_rate_ceiling)
        .execute(&mut **tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(LedgerError::DebtorNotFound);
        }
        Ok(())
    }

    /// Draw the next prepared-transfer seqnum for a partition. The counter
    /// update locks the debtor row, serializing prepares per partition.
    pub async fn next_transfer_seqnum(tx: &mut PgTx, debtor_id: i64) -> Result<i64, LedgerError> {
        sqlx::query_scalar::<_, i64>(
            "UPDATE debtors SET prepared_transfer_seqnum = prepared_transfer_seqnum + 1 \
             WHERE debtor_id = $1 RETURNING prepared_transfer_seqnum",
        )
        .bind(debtor_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(LedgerError::DebtorNotFound)
    }

    /// Draw the next withdrawal-request seqnum for a partition.
    pub async fn next_withdrawal_seqnum(tx: &mut PgTx, debtor_id: i64) -> Result<i64, LedgerError> {
        sqlx::query_scalar::<_, i64>(
            "UPDATE debtors SET withdrawal_request_seqnum = withdrawal_request_seqnum + 1 \
             WHERE debtor_id = $1 RETURNING withdrawal_request_seqnum",
        )
        .bind(debtor_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(LedgerError::DebtorNotFound)
    }
}

/// Account-row operations.
pub struct AccountLedger;

impl AccountLedger {
    pub async fn get(
        tx: &mut PgTx,
        debtor_id: i64,
        creditor_id: i64,
    ) -> Result<Option<Account>, LedgerError> {
        let account = sqlx::query_as::<_, Account>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE debtor_id = $1 AND creditor_id = $2"
        ))
        .bind(debtor_id)
        .bind(creditor_id)
        .fetch_optional(&mut **tx)
        .await?;

        Ok(account)
    }

    /// Locking read: row-level exclusive lock held until the atomic unit ends.
    pub async fn lock(
        tx: &mut PgTx,
        debtor_id: i64,
        creditor_id: i64,
    ) -> Result<Option<Account>, LedgerError> {
        let account = sqlx::query_as::<_, Account>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts \
             WHERE debtor_id = $1 AND creditor_id = $2 FOR UPDATE"
        ))
        .bind(debtor_id)
        .bind(creditor_id)
        .fetch_optional(&mut **tx)
        .await?;

        Ok(account)
    }

    /// Idempotent fetch-or-insert with default (empty) balances.
    ///
    /// A racing insert from another session surfaces as a uniqueness
    /// violation, converted here into the conflict signal: the enclosing
    /// unit retries and this time the fetch finds the winner's row.
    pub async fn get_or_create(
        tx: &mut PgTx,
        debtor_id: i64,
        creditor_id: i64,
    ) -> Result<Account, LedgerError> {
        if let Some(account) = Self::get(tx, debtor_id, creditor_id).await? {
            return Ok(account);
        }

        retry_on_integrity_conflict(async {
            let account = sqlx::query_as::<_, Account>(&format!(
                "INSERT INTO accounts (debtor_id, creditor_id) VALUES ($1, $2) \
                 RETURNING {ACCOUNT_COLUMNS}"
            ))
            .bind(debtor_id)
            .bind(creditor_id)
            .fetch_one(&mut **tx)
            .await?;

            tracing::debug!(debtor_id, creditor_id, "account created");
            Ok(account)
        })
        .await
    }

    /// Insert an account row with an explicit demurrage discount cap. Used
    /// for the ROOT issuance account, which is always pinned to `0`.
    pub async fn create_with_discount(
        tx: &mut PgTx,
        debtor_id: i64,
        creditor_id: i64,
        discount_demurrage_rate: f64,
    ) -> Result<Account, LedgerError> {
        let account = sqlx::query_as::<_, Account>(&format!(
            "INSERT INTO accounts (debtor_id, creditor_id, discount_demurrage_rate) \
             VALUES ($1, $2, $3) RETURNING {ACCOUNT_COLUMNS}"
        ))
        .bind(debtor_id)
        .bind(creditor_id)
        .bind(discount_demurrage_rate)
        .fetch_one(&mut **tx)
        .await?;

        Ok(account)
    }

    /// Lock the sender row and reserve `amount` from its spendable balance.
    ///
    /// `include_demurrage` widens availability by the accrued demurrage; it
    /// is only legal for transfer kinds allowed to spend into it (repaying
    /// the issuer). Fails with `InsufficientFunds` carrying the availability
    /// that was actually observed; a missing account reports `0`.
    pub async fn lock_and_reserve(
        tx: &mut PgTx,
        policy: &dyn DemurragePolicy,
        debtor: &Debtor,
        creditor_id: i64,
        amount: i64,
        include_demurrage: bool,
        now: DateTime<Utc>,
    ) -> Result<Account, LedgerError> {
        debug_assert!(amount > 0);

        let Some(mut account) = Self::lock(tx, debtor.debtor_id, creditor_id).await? else {
            return Err(LedgerError::InsufficientFunds { available: 0 });
        };

        let accrued = demurrage::accrued_since_last_transfer(policy, &account, debtor, now);
        let mut available = account.avl_balance - accrued;
        if include_demurrage {
            available += account.demurrage + accrued;
        }
        if amount > available {
            return Err(LedgerError::InsufficientFunds { available });
        }

        sqlx::query(
            "UPDATE accounts SET avl_balance = avl_balance - $3 \
             WHERE debtor_id = $1 AND creditor_id = $2",
        )
        .bind(debtor.debtor_id)
        .bind(creditor_id)
        .bind(amount)
        .execute(&mut **tx)
        .await?;

        account.avl_balance -= amount;
        Ok(account)
    }

    /// Settle a committed transfer: move `amount` from sender to recipient
    /// and consume the sender's lock.
    ///
    /// Demurrage accrued since each row's last settlement folds into the
    /// stored columns here, and `last_transfer_ts` advances on both rows.
    /// The recipient account is created lazily on first reference.
    #[allow(clippy::too_many_arguments)]
    pub async fn apply_settlement(
        tx: &mut PgTx,
        policy: &dyn DemurragePolicy,
        debtor: &Debtor,
        sender_creditor_id: i64,
        recipient_creditor_id: i64,
        amount: i64,
        sender_locked_amount: i64,
        now: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        let sender = Self::lock(tx, debtor.debtor_id, sender_creditor_id)
            .await?
            .ok_or_else(|| {
                LedgerError::Inconsistency(
                    "sender account vanished under a prepared transfer".into(),
                )
            })?;
        let sender_accrued = demurrage::accrued_since_last_transfer(policy, &sender, debtor, now);

        // The extra debit is `amount - sender_locked_amount`: a no-op for all
        // current kinds since locking is always exact, but kept general.
        sqlx::query(
            "UPDATE accounts \
             SET balance = balance - $3, \
                 avl_balance = avl_balance - $4 - $5, \
                 demurrage = demurrage + $5, \
                 last_transfer_ts = $6 \
             WHERE debtor_id = $1 AND creditor_id = $2",
        )
        .bind(debtor.debtor_id)
        .bind(sender_creditor_id)
        .bind(amount)
        .bind(amount - sender_locked_amount)
        .bind(sender_accrued)
        .bind(now)
        .execute(&mut **tx)
        .await?;

        Self::get_or_create(tx, debtor.debtor_id, recipient_creditor_id).await?;
        let recipient = Self::lock(tx, debtor.debtor_id, recipient_creditor_id)
            .await?
            .ok_or_else(|| {
                LedgerError::Inconsistency("recipient account vanished during settlement".into())
            })?;
        let recipient_accrued =
            demurrage::accrued_since_last_transfer(policy, &recipient, debtor, now);

        sqlx::query(
            "UPDATE accounts \
             SET balance = balance + $3, \
                 avl_balance = avl_balance + $3 - $4, \
                 demurrage = demurrage + $4, \
                 last_transfer_ts = $5 \
             WHERE debtor_id = $1 AND creditor_id = $2",
        )
        .bind(debtor.debtor_id)
        .bind(recipient_creditor_id)
        .bind(amount)
        .bind(recipient_accrued)
        .bind(now)
        .execute(&mut **tx)
        .await?;

        tracing::debug!(
            debtor_id = debtor.debtor_id,
            sender_creditor_id,
            recipient_creditor_id,
            amount,
            "settlement applied"
        );
        Ok(())
    }

    /// Undo a reservation on cancel: the locked amount returns to the
    /// spendable balance, the total balance is untouched.
    pub async fn release_lock(
        tx: &mut PgTx,
        debtor_id: i64,
        creditor_id: i64,
        locked_amount: i64,
    ) -> Result<(), LedgerError> {
        let locked = Self::lock(tx, debtor_id, creditor_id).await?;
        if locked.is_none() {
            return Err(LedgerError::Inconsistency(
                "sender account vanished under a prepared transfer".into(),
            ));
        }

        sqlx::query(
            "UPDATE accounts SET avl_balance = avl_balance + $3 \
             WHERE debtor_id = $1 AND creditor_id = $2",
        )
        .bind(debtor_id)
        .bind(creditor_id)
        .bind(locked_amount)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }
}
