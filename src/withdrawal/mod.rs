//! Operator-authorized withdrawals.
//!
//! A withdrawal request is pure intent: creating one moves no funds. Funds
//! move when the request is prepared (locking the amount behind a linked
//! prepared transfer) and settle when that transfer commits, at which point
//! the request is consumed and replaced by a terminal [`Withdrawal`] audit
//! record.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

use crate::accounts::{DebtorRegistry, Operator};
use crate::db::PgTx;
use crate::error::LedgerError;

/// Operator intent to withdraw from a creditor's account. Deleted when its
/// linked prepared transfer commits.
#[derive(Debug, Clone, FromRow)]
pub struct WithdrawalRequest {
    pub debtor_id: i64,
    pub creditor_id: i64,
    pub seqnum: i64,
    pub amount: i64,
    pub deadline_ts: DateTime<Utc>,
    pub details: serde_json::Value,
    pub operator_branch_id: i32,
    pub operator_user_id: i64,
    pub created_at: DateTime<Utc>,
}

/// Terminal audit record of a settled withdrawal. Carries the request's
/// audit fields plus when and with what comment it closed.
#[derive(Debug, Clone, FromRow)]
pub struct Withdrawal {
    pub debtor_id: i64,
    pub creditor_id: i64,
    pub seqnum: i64,
    pub amount: i64,
    pub details: serde_json::Value,
    pub operator_branch_id: i32,
    pub operator_user_id: i64,
    pub closing_ts: DateTime<Utc>,
    pub closing_comment: serde_json::Value,
}

const REQUEST_COLUMNS: &str = "debtor_id, creditor_id, seqnum, amount, deadline_ts, \
                               details, operator_branch_id, operator_user_id, created_at";

pub struct WithdrawalRequests;

impl WithdrawalRequests {
    /// Record an operator's withdrawal intent. No funds move here; the
    /// `can_withdraw` capability was checked by the caller.
    pub async fn create(
        tx: &mut PgTx,
        operator: &Operator,
        creditor_id: i64,
        amount: i64,
        deadline_ts: DateTime<Utc>,
        details: serde_json::Value,
    ) -> Result<WithdrawalRequest, LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount);
        }

        let seqnum = DebtorRegistry::next_withdrawal_seqnum(tx, operator.debtor_id).await?;
        let request = sqlx::query_as::<_, WithdrawalRequest>(&format!(
            "INSERT INTO withdrawal_requests \
                 (debtor_id, creditor_id, seqnum, amount, deadline_ts, details, \
                  operator_branch_id, operator_user_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING {REQUEST_COLUMNS}"
        ))
        .bind(operator.debtor_id)
        .bind(creditor_id)
        .bind(seqnum)
        .bind(amount)
        .bind(deadline_ts)
        .bind(details)
        .bind(operator.branch_id)
        .bind(operator.user_id)
        .fetch_one(&mut **tx)
        .await?;

        tracing::info!(
            debtor_id = request.debtor_id,
            creditor_id,
            seqnum,
            amount,
            "withdrawal request created"
        );
        Ok(request)
    }

    pub async fn get(
        tx: &mut PgTx,
        debtor_id: i64,
        creditor_id: i64,
        seqnum: i64,
    ) -> Result<Option<WithdrawalRequest>, LedgerError> {
        let request = sqlx::query_as::<_, WithdrawalRequest>(&format!(
            "SELECT {REQUEST_COLUMNS} FROM withdrawal_requests \
             WHERE debtor_id = $1 AND creditor_id = $2 AND seqnum = $3"
        ))
        .bind(debtor_id)
        .bind(creditor_id)
        .bind(seqnum)
        .fetch_optional(&mut **tx)
        .await?;

        Ok(request)
    }
}

pub struct Withdrawals;

impl Withdrawals {
    /// Replace a request with its terminal record: insert the withdrawal,
    /// delete the request. Runs inside the committing atomic unit.
    pub async fn close_request(
        tx: &mut PgTx,
        request: &WithdrawalRequest,
        closing_ts: DateTime<Utc>,
        closing_comment: serde_json::Value,
    ) -> Result<Withdrawal, LedgerError> {
        let withdrawal = sqlx::query_as::<_, Withdrawal>(
            "INSERT INTO withdrawals \
                 (debtor_id, creditor_id, seqnum, amount, details, \
                  operator_branch_id, operator_user_id, closing_ts, closing_comment) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             RETURNING debtor_id, creditor_id, seqnum, amount, details, \
                       operator_branch_id, operator_user_id, closing_ts, closing_comment",
        )
        .bind(request.debtor_id)
        .bind(request.creditor_id)
        .bind(request.seqnum)
        .bind(request.amount)
        .bind(&request.details)
        .bind(request.operator_branch_id)
        .bind(request.operator_user_id)
        .bind(closing_ts)
        .bind(closing_comment)
        .fetch_one(&mut **tx)
        .await?;

        sqlx::query(
            "DELETE FROM withdrawal_requests \
             WHERE debtor_id = $1 AND creditor_id = $2 AND seqnum = $3",
        )
        .bind(request.debtor_id)
        .bind(request.creditor_id)
        .bind(request.seqnum)
        .execute(&mut **tx)
        .await?;

        Ok(withdrawal)
    }
}
