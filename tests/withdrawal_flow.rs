//! The operator withdrawal workflow end to end.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use chrono::{Duration, Utc};
use debtor_node::{
    Context, LedgerError, Operator, SettlementHook, Withdrawal, procedures,
};

async fn debtor_with_operator(ctx: &Context) -> (i64, Operator) {
    let debtor = procedures::create_debtor(ctx, 42, 0.0, 0.0).await.unwrap();
    let operator = procedures::get_operator(ctx, debtor.debtor_id, 1, 42)
        .await
        .unwrap()
        .expect("admin operator should exist");
    (debtor.debtor_id, operator)
}

#[tokio::test]
async fn test_withdrawal_scenario_end_to_end() {
    let Some(ctx) = common::test_context().await else {
        return;
    };
    let (debtor_id, operator) = debtor_with_operator(&ctx).await;

    let request = procedures::create_withdrawal_request(
        &ctx,
        &operator,
        777,
        1000,
        Utc::now() + Duration::days(30),
        serde_json::json!({ "teller": "front desk" }),
    )
    .await
    .unwrap();
    assert_eq!(request.amount, 1000);

    // Creating the request moved nothing; there is no funded account yet.
    let unfunded = procedures::prepare_withdrawal(&ctx, &request).await;
    assert!(matches!(
        unfunded,
        Err(LedgerError::InsufficientFunds { available: 0 })
    ));

    common::fund_account(&ctx, debtor_id, 777, 3000).await;

    let payment = procedures::prepare_withdrawal(&ctx, &request).await.unwrap();
    assert_eq!(payment.amount, 1000);
    assert_eq!(common::balances(&ctx, debtor_id, 777).await, (3000, 2000));

    // Preparing again is an idempotent-safe retry: same transfer back.
    let retried = procedures::prepare_withdrawal(&ctx, &request).await.unwrap();
    assert_eq!(retried.seqnum, payment.seqnum);
    assert_eq!(common::balances(&ctx, debtor_id, 777).await, (3000, 2000));

    procedures::commit_creditor_prepared_transfer(
        &ctx,
        777,
        debtor_id,
        payment.seqnum,
        serde_json::json!({ "receipt": 9001 }),
    )
    .await
    .unwrap();

    assert_eq!(common::balances(&ctx, debtor_id, 777).await, (2000, 2000));
    // The issuance account received the repayment.
    assert_eq!(common::balances(&ctx, debtor_id, -1).await, (1000, 1000));

    let pool = ctx.db().pool();
    let requests: i64 =
        sqlx::query_scalar("SELECT count(*) FROM withdrawal_requests WHERE debtor_id = $1")
            .bind(debtor_id)
            .fetch_one(pool)
            .await
            .unwrap();
    assert_eq!(requests, 0, "the request is consumed on commit");

    let (amount, closing_comment): (i64, serde_json::Value) = sqlx::query_as(
        "SELECT amount, closing_comment FROM withdrawals \
         WHERE debtor_id = $1 AND creditor_id = 777",
    )
    .bind(debtor_id)
    .fetch_one(pool)
    .await
    .unwrap();
    assert_eq!(amount, 1000);
    assert_eq!(closing_comment, serde_json::json!({ "receipt": 9001 }));
}

#[tokio::test]
async fn test_withdrawal_request_validation() {
    let Some(ctx) = common::test_context().await else {
        return;
    };
    let (_debtor_id, operator) = debtor_with_operator(&ctx).await;

    for amount in [0, -100] {
        let result = procedures::create_withdrawal_request(
            &ctx,
            &operator,
            777,
            amount,
            Utc::now() + Duration::days(1),
            serde_json::json!({}),
        )
        .await;
        assert!(matches!(result, Err(LedgerError::InvalidAmount)));
    }
}

#[tokio::test]
async fn test_prepare_withdrawal_for_missing_request() {
    let Some(ctx) = common::test_context().await else {
        return;
    };
    let (_debtor_id, operator) = debtor_with_operator(&ctx).await;

    let mut request = procedures::create_withdrawal_request(
        &ctx,
        &operator,
        777,
        500,
        Utc::now() + Duration::days(1),
        serde_json::json!({}),
    )
    .await
    .unwrap();

    // Point at a seqnum that was never issued.
    request.seqnum += 1000;
    let result = procedures::prepare_withdrawal(&ctx, &request).await;
    assert!(matches!(result, Err(LedgerError::InvalidWithdrawalRequest)));
}

#[tokio::test]
async fn test_commit_past_deadline_fails_and_leaves_balances() {
    let Some(ctx) = common::test_context().await else {
        return;
    };
    let (debtor_id, operator) = debtor_with_operator(&ctx).await;
    common::fund_account(&ctx, debtor_id, 777, 3000).await;

    // The deadline gates the commit, not the prepare.
    let request = procedures::create_withdrawal_request(
        &ctx,
        &operator,
        777,
        1000,
        Utc::now() - Duration::hours(1),
        serde_json::json!({}),
    )
    .await
    .unwrap();
    let payment = procedures::prepare_withdrawal(&ctx, &request).await.unwrap();

    let expired = procedures::commit_creditor_prepared_transfer(
        &ctx,
        777,
        debtor_id,
        payment.seqnum,
        serde_json::json!({}),
    )
    .await;
    assert!(matches!(expired, Err(LedgerError::InvalidPreparedTransfer)));

    // Nothing settled: the amount is still locked, the request still there.
    assert_eq!(common::balances(&ctx, debtor_id, 777).await, (3000, 2000));
    let pool = ctx.db().pool();
    let requests: i64 =
        sqlx::query_scalar("SELECT count(*) FROM withdrawal_requests WHERE debtor_id = $1")
            .bind(debtor_id)
            .fetch_one(pool)
            .await
            .unwrap();
    assert_eq!(requests, 1);
    let withdrawals: i64 =
        sqlx::query_scalar("SELECT count(*) FROM withdrawals WHERE debtor_id = $1")
            .bind(debtor_id)
            .fetch_one(pool)
            .await
            .unwrap();
    assert_eq!(withdrawals, 0);

    // The creditor can still walk the lock back.
    procedures::cancel_creditor_prepared_transfer(&ctx, 777, debtor_id, payment.seqnum)
        .await
        .unwrap();
    assert_eq!(common::balances(&ctx, debtor_id, 777).await, (3000, 3000));
}

struct CountingHook(AtomicU32);

#[async_trait::async_trait]
impl SettlementHook for CountingHook {
    async fn on_withdrawal_settled(&self, withdrawal: &Withdrawal) {
        assert!(withdrawal.amount > 0);
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_settlement_hook_fires_once_per_withdrawal() {
    let Some(db) = common::test_db().await else {
        return;
    };
    let hook = Arc::new(CountingHook(AtomicU32::new(0)));
    let ctx = Context::builder(db).settlement_hook(hook.clone()).build();

    let (debtor_id, operator) = debtor_with_operator(&ctx).await;
    common::fund_account(&ctx, debtor_id, 777, 2000).await;

    let request = procedures::create_withdrawal_request(
        &ctx,
        &operator,
        777,
        800,
        Utc::now() + Duration::days(7),
        serde_json::json!({}),
    )
    .await
    .unwrap();
    let payment = procedures::prepare_withdrawal(&ctx, &request).await.unwrap();
    assert_eq!(hook.0.load(Ordering::SeqCst), 0, "prepare must not settle");

    procedures::commit_creditor_prepared_transfer(
        &ctx,
        777,
        debtor_id,
        payment.seqnum,
        serde_json::json!({}),
    )
    .await
    .unwrap();
    assert_eq!(hook.0.load(Ordering::SeqCst), 1);

    // Plain direct transfers settle without firing the withdrawal hook.
    let direct = procedures::prepare_direct_transfer(&ctx, debtor_id, 777, 888, 100)
        .await
        .unwrap();
    procedures::commit_creditor_prepared_transfer(
        &ctx,
        777,
        debtor_id,
        direct.seqnum,
        serde_json::json!({}),
    )
    .await
    .unwrap();
    assert_eq!(hook.0.load(Ordering::SeqCst), 1);
}
