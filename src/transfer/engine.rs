//! Prepare, commit, and cancel of fund movements.

use crate::accounts::{AccountLedger, Debtor, DebtorRegistry, ROOT_CREDITOR_ID};
use crate::atomic::retry_on_integrity_conflict;
use crate::context::Context;
use crate::db::PgTx;
use crate::error::LedgerError;
use crate::withdrawal::{WithdrawalRequest, WithdrawalRequests, Withdrawals};

use super::types::{CommitRole, PreparedTransfer, TransferKind};

const TRANSFER_COLUMNS: &str = "debtor_id, seqnum, transfer_type, sender_creditor_id, \
                                recipient_creditor_id, amount, sender_locked_amount, \
                                coordinator_id, withdrawal_request_seqnum, \
                                third_party_debtor_id, third_party_amount, prepared_at";

pub struct TransferEngine;

impl TransferEngine {
    /// Lock `amount` on the sender account and insert the in-flight row.
    ///
    /// Not idempotent: every call creates a new transfer. Callers needing
    /// idempotency must dedupe upstream.
    pub async fn prepare_direct(
        ctx: &Context,
        tx: &mut PgTx,
        debtor_id: i64,
        sender_creditor_id: i64,
        recipient_creditor_id: i64,
        amount: i64,
    ) -> Result<PreparedTransfer, LedgerError> {
        let debtor = DebtorRegistry::require(tx, debtor_id).await?;
        // Only repaying the issuer may spend into accrued demurrage.
        let include_demurrage = recipient_creditor_id == ROOT_CREDITOR_ID;
        Self::prepare(
            ctx,
            tx,
            &debtor,
            sender_creditor_id,
            recipient_creditor_id,
            TransferKind::Direct {
                withdrawal_request_seqnum: None,
            },
            amount,
            include_demurrage,
        )
        .await
    }

    /// Prepare one leg of a circular clearing cycle on behalf of its
    /// coordinator.
    pub async fn prepare_circular(
        ctx: &Context,
        tx: &mut PgTx,
        debtor_id: i64,
        sender_creditor_id: i64,
        recipient_creditor_id: i64,
        coordinator_id: i64,
        amount: i64,
    ) -> Result<PreparedTransfer, LedgerError> {
        let debtor = DebtorRegistry::require(tx, debtor_id).await?;
        Self::prepare(
            ctx,
            tx,
            &debtor,
            sender_creditor_id,
            recipient_creditor_id,
            TransferKind::Circular { coordinator_id },
            amount,
            false,
        )
        .await
    }

    /// Prepare the transfer behind a withdrawal request.
    ///
    /// Safe to retry: if a transfer is already linked to the request it is
    /// returned unchanged. Racing calls collide on the link's unique index
    /// and the loser's unit re-runs into the idempotent path.
    pub async fn prepare_withdrawal(
        ctx: &Context,
        tx: &mut PgTx,
        debtor_id: i64,
        creditor_id: i64,
        request_seqnum: i64,
    ) -> Result<PreparedTransfer, LedgerError> {
        let Some(request) =
            WithdrawalRequests::get(tx, debtor_id, creditor_id, request_seqnum).await?
        else {
            return Err(LedgerError::InvalidWithdrawalRequest);
        };

        if let Some(existing) = Self::get_linked(tx, &request).await? {
            return Ok(existing);
        }

        let debtor = DebtorRegistry::require(tx, debtor_id).await?;
        Self::prepare(
            ctx,
            tx,
            &debtor,
            request.creditor_id,
            ROOT_CREDITOR_ID,
            TransferKind::Direct {
                withdrawal_request_seqnum: Some(request.seqnum),
            },
            request.amount,
            false,
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn prepare(
        ctx: &Context,
        tx: &mut PgTx,
        debtor: &Debtor,
        sender_creditor_id: i64,
        recipient_creditor_id: i64,
        kind: TransferKind,
        amount: i64,
        include_demurrage: bool,
    ) -> Result<PreparedTransfer, LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount);
        }

        let now = ctx.now();
        AccountLedger::lock_and_reserve(
            tx,
            ctx.demurrage(),
            debtor,
            sender_creditor_id,
            amount,
            include_demurrage,
            now,
        )
        .await?;

        let seqnum = DebtorRegistry::next_transfer_seqnum(tx, debtor.debtor_id).await?;

        // Any uniqueness violation here is a racing insert (in practice the
        // withdrawal link index); retry the whole unit.
        let transfer = retry_on_integrity_conflict(async {
            let row = sqlx::query(&format!(
                "INSERT INTO prepared_transfers \
                     (debtor_id, seqnum, transfer_type, sender_creditor_id, \
                      recipient_creditor_id, amount, sender_locked_amount, coordinator_id, \
                      withdrawal_request_seqnum, third_party_debtor_id, third_party_amount, \
                      prepared_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
                 RETURNING {TRANSFER_COLUMNS}"
            ))
            .bind(debtor.debtor_id)
            .bind(seqnum)
            .bind(kind.type_id())
            .bind(sender_creditor_id)
            .bind(recipient_creditor_id)
            .bind(amount)
            .bind(amount) // locking is always exact
            .bind(kind.coordinator_id())
            .bind(kind.withdrawal_request_seqnum())
            .bind(kind.third_party_debtor_id())
            .bind(kind.third_party_amount())
            .bind(now)
            .fetch_one(&mut **tx)
            .await?;

            PreparedTransfer::from_row(&row)
        })
        .await?;

        tracing::info!(
            debtor_id = debtor.debtor_id,
            seqnum,
            transfer_type = kind.type_id(),
            sender_creditor_id,
            recipient_creditor_id,
            amount,
            "transfer prepared"
        );
        Ok(transfer)
    }

    pub async fn get(
        tx: &mut PgTx,
        debtor_id: i64,
        seqnum: i64,
    ) -> Result<Option<PreparedTransfer>, LedgerError> {
        let row = sqlx::query(&format!(
            "SELECT {TRANSFER_COLUMNS} FROM prepared_transfers \
             WHERE debtor_id = $1 AND seqnum = $2"
        ))
        .bind(debtor_id)
        .bind(seqnum)
        .fetch_optional(&mut **tx)
        .await?;

        row.as_ref().map(PreparedTransfer::from_row).transpose()
    }

    /// Resolve with a row lock, so two units cannot settle the same transfer.
    async fn lock(
        tx: &mut PgTx,
        debtor_id: i64,
        seqnum: i64,
    ) -> Result<Option<PreparedTransfer>, LedgerError> {
        let row = sqlx::query(&format!(
            "SELECT {TRANSFER_COLUMNS} FROM prepared_transfers \
             WHERE debtor_id = $1 AND seqnum = $2 FOR UPDATE"
        ))
        .bind(debtor_id)
        .bind(seqnum)
        .fetch_optional(&mut **tx)
        .await?;

        row.as_ref().map(PreparedTransfer::from_row).transpose()
    }

    async fn get_linked(
        tx: &mut PgTx,
        request: &WithdrawalRequest,
    ) -> Result<Option<PreparedTransfer>, LedgerError> {
        let row = sqlx::query(&format!(
            "SELECT {TRANSFER_COLUMNS} FROM prepared_transfers \
             WHERE debtor_id = $1 AND sender_creditor_id = $2 \
               AND withdrawal_request_seqnum = $3"
        ))
        .bind(request.debtor_id)
        .bind(request.creditor_id)
        .bind(request.seqnum)
        .fetch_optional(&mut **tx)
        .await?;

        row.as_ref().map(PreparedTransfer::from_row).transpose()
    }

    /// Settle and delete a prepared transfer.
    ///
    /// For withdrawal-linked transfers this also closes the request: the
    /// terminal record is inserted, the request deleted, and the settlement
    /// hook fired, all inside the same atomic unit. A passed deadline fails
    /// the commit and leaves every balance untouched.
    pub async fn commit(
        ctx: &Context,
        tx: &mut PgTx,
        role: CommitRole,
        debtor_id: i64,
        seqnum: i64,
        comment: serde_json::Value,
    ) -> Result<(), LedgerError> {
        let Some(transfer) = Self::lock(tx, debtor_id, seqnum).await? else {
            return Err(LedgerError::InvalidPreparedTransfer);
        };
        transfer.check_role(role)?;

        let debtor = DebtorRegistry::require(tx, debtor_id).await?;
        let now = ctx.now();

        let settled_withdrawal = match transfer.kind.withdrawal_request_seqnum() {
            Some(request_seqnum) => {
                let request = WithdrawalRequests::get(
                    tx,
                    debtor_id,
                    transfer.sender_creditor_id,
                    request_seqnum,
                )
                .await?
                .ok_or_else(|| {
                    LedgerError::Inconsistency(
                        "prepared transfer links a missing withdrawal request".into(),
                    )
                })?;

                if request.amount != transfer.amount {
                    return Err(LedgerError::Inconsistency(format!(
                        "withdrawal request amount {} does not match transfer amount {}",
                        request.amount, transfer.amount
                    )));
                }
                if now > request.deadline_ts {
                    return Err(LedgerError::InvalidPreparedTransfer);
                }

                Some(Withdrawals::close_request(tx, &request, now, comment).await?)
            }
            None => None,
        };

        AccountLedger::apply_settlement(
            tx,
            ctx.demurrage(),
            &debtor,
            transfer.sender_creditor_id,
            transfer.recipient_creditor_id,
            transfer.amount,
            transfer.sender_locked_amount,
            now,
        )
        .await?;
        Self::delete(tx, debtor_id, seqnum).await?;

        if let Some(withdrawal) = &settled_withdrawal {
            ctx.settlement_hook().on_withdrawal_settled(withdrawal).await;
        }

        tracing::info!(
            debtor_id,
            seqnum,
            amount = transfer.amount,
            "prepared transfer committed"
        );
        Ok(())
    }

    /// Release the sender's lock and delete the transfer. The total balance
    /// is untouched; a second cancel (or commit) of the same transfer fails
    /// with `InvalidPreparedTransfer`.
    pub async fn cancel(
        tx: &mut PgTx,
        role: CommitRole,
        debtor_id: i64,
        seqnum: i64,
    ) -> Result<(), LedgerError> {
        let Some(transfer) = Self::lock(tx, debtor_id, seqnum).await? else {
            return Err(LedgerError::InvalidPreparedTransfer);
        };
        transfer.check_role(role)?;

        AccountLedger::release_lock(
            tx,
            debtor_id,
            transfer.sender_creditor_id,
            transfer.sender_locked_amount,
        )
        .await?;
        Self::delete(tx, debtor_id, seqnum).await?;

        tracing::info!(
            debtor_id,
            seqnum,
            amount = transfer.amount,
            "prepared transfer cancelled"
        );
        Ok(())
    }

    async fn delete(tx: &mut PgTx, debtor_id: i64, seqnum: i64) -> Result<(), LedgerError> {
        let deleted =
            sqlx::query("DELETE FROM prepared_transfers WHERE debtor_id = $1 AND seqnum = $2")
                .bind(debtor_id)
                .bind(seqnum)
                .execute(&mut **tx)
                .await?;

        if deleted.rows_affected() == 0 {
            return Err(LedgerError::Inconsistency(
                "prepared transfer disappeared while locked".into(),
            ));
        }
        Ok(())
    }
}
