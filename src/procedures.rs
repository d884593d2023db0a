//! Caller-facing procedures.
//!
//! Each procedure is exactly one atomic unit: it runs in a single store
//! transaction and is transparently re-executed on serialization conflicts.
//! Task-dispatch and RPC wiring live outside this crate and call straight
//! into these. Domain errors come back as typed [`LedgerError`] values;
//! conflicts are invisible to callers.

use chrono::{DateTime, Utc};

use crate::accounts::{
    Account, AccountLedger, Branches, Coordinators, DEFAULT_BRANCH_ID, DEFAULT_COORDINATOR_ID,
    Debtor, DebtorRegistry, Operator, Operators, ROOT_CREDITOR_ID,
};
use crate::context::Context;
use crate::db::PgTx;
use crate::error::LedgerError;
use crate::transfer::{CommitRole, PreparedTransfer, TransferEngine};
use crate::withdrawal::{WithdrawalRequest, WithdrawalRequests};

/// Create a debtor partition: the debtor row under a freshly generated
/// unique id, its ROOT issuance account (demurrage discount pinned to zero),
/// the default branch and coordinator, and an admin operator for `user_id`.
pub async fn create_debtor(
    ctx: &Context,
    user_id: i64,
    demurrage_rate: f64,
    demurrage_rate_ceiling: f64,
) -> Result<Debtor, LedgerError> {
    let session = ctx.session();
    let debtor = session
        .execute_atomic(async |tx: &mut PgTx| {
            let debtor_id = ctx.keygen().generate(tx).await?;
            DebtorRegistry::set_rates(tx, debtor_id, demurrage_rate, demurrage_rate_ceiling)
                .await?;
            AccountLedger::create_with_discount(tx, debtor_id, ROOT_CREDITOR_ID, 0.0).await?;
            Branches::create(tx, debtor_id, DEFAULT_BRANCH_ID).await?;
            Coordinators::create(tx, debtor_id, DEFAULT_COORDINATOR_ID).await?;
            Operators::create(
                tx,
                debtor_id,
                DEFAULT_BRANCH_ID,
                user_id,
                "admin",
                true,
                false,
                true,
            )
            .await?;
            DebtorRegistry::require(tx, debtor_id).await
        })
        .await?;

    tracing::info!(debtor_id = debtor.debtor_id, user_id, "debtor created");
    Ok(debtor)
}

/// Fetch-or-create the account for a `(debtor, creditor)` pair.
pub async fn get_account(
    ctx: &Context,
    debtor_id: i64,
    creditor_id: i64,
) -> Result<Account, LedgerError> {
    let session = ctx.session();
    session
        .execute_atomic(async |tx: &mut PgTx| {
            AccountLedger::get_or_create(tx, debtor_id, creditor_id).await
        })
        .await
}

/// Look up an operator by its composite key.
pub async fn get_operator(
    ctx: &Context,
    debtor_id: i64,
    branch_id: i32,
    user_id: i64,
) -> Result<Option<Operator>, LedgerError> {
    let session = ctx.session();
    session
        .execute_atomic(async |tx: &mut PgTx| {
            Operators::get(tx, debtor_id, branch_id, user_id).await
        })
        .await
}

/// Record an operator's intent to withdraw from a creditor's account. Pure
/// creation; no funds move until [`prepare_withdrawal`]. The operator's
/// `can_withdraw` capability is the caller's responsibility.
pub async fn create_withdrawal_request(
    ctx: &Context,
    operator: &Operator,
    creditor_id: i64,
    amount: i64,
    deadline_ts: DateTime<Utc>,
    details: serde_json::Value,
) -> Result<WithdrawalRequest, LedgerError> {
    let session = ctx.session();
    session
        .execute_atomic(async |tx: &mut PgTx| {
            let details = details.clone();
            WithdrawalRequests::create(tx, operator, creditor_id, amount, deadline_ts, details)
                .await
        })
        .await
}

/// Lock the requested amount behind a prepared transfer linked to the
/// request. Fails with `InvalidWithdrawalRequest` if the request no longer
/// exists; returns the already-linked transfer unchanged on a retry.
pub async fn prepare_withdrawal(
    ctx: &Context,
    request: &WithdrawalRequest,
) -> Result<PreparedTransfer, LedgerError> {
    let session = ctx.session();
    session
        .execute_atomic(async |tx: &mut PgTx| {
            TransferEngine::prepare_withdrawal(
                ctx,
                tx,
                request.debtor_id,
                request.creditor_id,
                request.seqnum,
            )
            .await
        })
        .await
}

/// Prepare a direct transfer out of the sender's account.
pub async fn prepare_direct_transfer(
    ctx: &Context,
    debtor_id: i64,
    sender_creditor_id: i64,
    recipient_creditor_id: i64,
    amount: i64,
) -> Result<PreparedTransfer, LedgerError> {
    let session = ctx.session();
    session
        .execute_atomic(async |tx: &mut PgTx| {
            TransferEngine::prepare_direct(
                ctx,
                tx,
                debtor_id,
                sender_creditor_id,
                recipient_creditor_id,
                amount,
            )
            .await
        })
        .await
}

/// Prepare one leg of a circular clearing cycle for `coordinator_id`.
pub async fn prepare_circular_transfer(
    ctx: &Context,
    debtor_id: i64,
    sender_creditor_id: i64,
    recipient_creditor_id: i64,
    coordinator_id: i64,
    amount: i64,
) -> Result<PreparedTransfer, LedgerError> {
    let session = ctx.session();
    session
        .execute_atomic(async |tx: &mut PgTx| {
            TransferEngine::prepare_circular(
                ctx,
                tx,
                debtor_id,
                sender_creditor_id,
                recipient_creditor_id,
                coordinator_id,
                amount,
            )
            .await
        })
        .await
}

async fn commit(
    ctx: &Context,
    role: CommitRole,
    debtor_id: i64,
    seqnum: i64,
    comment: serde_json::Value,
) -> Result<(), LedgerError> {
    let session = ctx.session();
    session
        .execute_atomic(async |tx: &mut PgTx| {
            let comment = comment.clone();
            TransferEngine::commit(ctx, tx, role, debtor_id, seqnum, comment).await
        })
        .await
}

async fn cancel(
    ctx: &Context,
    role: CommitRole,
    debtor_id: i64,
    seqnum: i64,
) -> Result<(), LedgerError> {
    let session = ctx.session();
    session
        .execute_atomic(async |tx: &mut PgTx| {
            TransferEngine::cancel(tx, role, debtor_id, seqnum).await
        })
        .await
}

/// Commit a circular transfer on behalf of its coordinator.
pub async fn commit_coordinator_prepared_transfer(
    ctx: &Context,
    coordinator_id: i64,
    debtor_id: i64,
    seqnum: i64,
    comment: serde_json::Value,
) -> Result<(), LedgerError> {
    commit(
        ctx,
        CommitRole::Coordinator { coordinator_id },
        debtor_id,
        seqnum,
        comment,
    )
    .await
}

/// Commit a direct transfer or withdrawal from the creditor's own account.
pub async fn commit_creditor_prepared_transfer(
    ctx: &Context,
    creditor_id: i64,
    debtor_id: i64,
    seqnum: i64,
    comment: serde_json::Value,
) -> Result<(), LedgerError> {
    commit(
        ctx,
        CommitRole::Creditor { creditor_id },
        debtor_id,
        seqnum,
        comment,
    )
    .await
}

/// Commit a deposit out of the debtor's ROOT issuance account.
pub async fn commit_debtor_prepared_transfer(
    ctx: &Context,
    debtor_id: i64,
    seqnum: i64,
    comment: serde_json::Value,
) -> Result<(), LedgerError> {
    commit(ctx, CommitRole::Debtor, debtor_id, seqnum, comment).await
}

/// Commit a third-party transfer on behalf of the guarantor.
pub async fn commit_guarantor_prepared_transfer(
    ctx: &Context,
    debtor_id: i64,
    seqnum: i64,
    comment: serde_json::Value,
) -> Result<(), LedgerError> {
    commit(ctx, CommitRole::Guarantor, debtor_id, seqnum, comment).await
}

/// Cancel a circular transfer on behalf of its coordinator.
pub async fn cancel_coordinator_prepared_transfer(
    ctx: &Context,
    coordinator_id: i64,
    debtor_id: i64,
    seqnum: i64,
) -> Result<(), LedgerError> {
    cancel(ctx, CommitRole::Coordinator { coordinator_id }, debtor_id, seqnum).await
}

/// Cancel a direct transfer or withdrawal from the creditor's own account.
pub async fn cancel_creditor_prepared_transfer(
    ctx: &Context,
    creditor_id: i64,
    debtor_id: i64,
    seqnum: i64,
) -> Result<(), LedgerError> {
    cancel(ctx, CommitRole::Creditor { creditor_id }, debtor_id, seqnum).await
}

/// Cancel a deposit out of the debtor's ROOT issuance account.
pub async fn cancel_debtor_prepared_transfer(
    ctx: &Context,
    debtor_id: i64,
    seqnum: i64,
) -> Result<(), LedgerError> {
    cancel(ctx, CommitRole::Debtor, debtor_id, seqnum).await
}

/// Cancel a third-party transfer on behalf of the guarantor.
pub async fn cancel_guarantor_prepared_transfer(
    ctx: &Context,
    debtor_id: i64,
    seqnum: i64,
) -> Result<(), LedgerError> {
    cancel(ctx, CommitRole::Guarantor, debtor_id, seqnum).await
}
