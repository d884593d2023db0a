//! Organizational rows scoped to a debtor: branches, operators, coordinators.

use crate::db::PgTx;
use crate::error::LedgerError;

use super::models::{Branch, Coordinator, Operator};

pub struct Branches;

impl Branches {
    pub async fn create(tx: &mut PgTx, debtor_id: i64, branch_id: i32) -> Result<Branch, LedgerError> {
        let branch = sqlx::query_as::<_, Branch>(
            "INSERT INTO branches (debtor_id, branch_id) VALUES ($1, $2) \
             RETURNING debtor_id, branch_id, info",
        )
        .bind(debtor_id)
        .bind(branch_id)
        .fetch_one(&mut **tx)
        .await?;

        Ok(branch)
    }
}

pub struct Operators;

impl Operators {
    #[allow(clippy::too_many_arguments)]
    pub async fn create(
        tx: &mut PgTx,
        debtor_id: i64,
        branch_id: i32,
        user_id: i64,
        alias: &str,
        can_withdraw: bool,
        can_deposit: bool,
        can_audit: bool,
    ) -> Result<Operator, LedgerError> {
        let operator = sqlx::query_as::<_, Operator>(
            "INSERT INTO operators \
                 (debtor_id, branch_id, user_id, alias, can_withdraw, can_deposit, can_audit) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING debtor_id, branch_id, user_id, alias, profile, \
                       can_withdraw, can_deposit, can_audit",
        )
        .bind(debtor_id)
        .bind(branch_id)
        .bind(user_id)
        .bind(alias)
        .bind(can_withdraw)
        .bind(can_deposit)
        .bind(can_audit)
        .fetch_one(&mut **tx)
        .await?;

        Ok(operator)
    }

    pub async fn get(
        tx: &mut PgTx,
        debtor_id: i64,
        branch_id: i32,
        user_id: i64,
    ) -> Result<Option<Operator>, LedgerError> {
        let operator = sqlx::query_as::<_, Operator>(
            "SELECT debtor_id, branch_id, user_id, alias, profile, \
                    can_withdraw, can_deposit, can_audit \
             FROM operators WHERE debtor_id = $1 AND branch_id = $2 AND user_id = $3",
        )
        .bind(debtor_id)
        .bind(branch_id)
        .bind(user_id)
        .fetch_optional(&mut **tx)
        .await?;

        Ok(operator)
    }
}

pub struct Coordinators;

impl Coordinators {
    pub async fn create(
        tx: &mut PgTx,
        debtor_id: i64,
        coordinator_id: i64,
    ) -> Result<Coordinator, LedgerError> {
        let coordinator = sqlx::query_as::<_, Coordinator>(
            "INSERT INTO coordinators (debtor_id, coordinator_id) VALUES ($1, $2) \
             RETURNING debtor_id, coordinator_id",
        )
        .bind(debtor_id)
        .bind(coordinator_id)
        .fetch_one(&mut **tx)
        .await?;

        Ok(coordinator)
    }
}
