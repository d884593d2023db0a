//! Atomic wrapper and key generator behavior against a live store.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use debtor_node::db::PgTx;
use debtor_node::{KeyGenerator, LedgerError, retry_on_integrity_conflict};

#[tokio::test]
async fn test_conflicts_are_retried_until_success() {
    let Some(ctx) = common::test_context().await else {
        return;
    };
    let session = ctx.session();
    let calls = AtomicU32::new(0);

    // The unit raises three conflicts before succeeding; the caller sees
    // exactly one successful call.
    let result = session
        .execute_atomic(async |_tx: &mut PgTx| {
            if calls.fetch_add(1, Ordering::SeqCst) < 3 {
                Err(LedgerError::Conflict)
            } else {
                Ok(42)
            }
        })
        .await;

    assert_eq!(result.unwrap(), 42);
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_domain_errors_are_not_retried() {
    let Some(ctx) = common::test_context().await else {
        return;
    };
    let session = ctx.session();
    let calls = AtomicU32::new(0);

    let result: Result<(), LedgerError> = session
        .execute_atomic(async |_tx: &mut PgTx| {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(LedgerError::InvalidAmount)
        })
        .await;

    assert!(matches!(result, Err(LedgerError::InvalidAmount)));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_nested_atomic_is_misuse() {
    let Some(ctx) = common::test_context().await else {
        return;
    };
    let session = ctx.session();

    let result = session
        .execute_atomic(async |_tx: &mut PgTx| {
            let nested: Result<(), LedgerError> = session
                .execute_atomic(async |_tx: &mut PgTx| Ok(()))
                .await;
            assert!(matches!(nested, Err(LedgerError::NestedAtomic)));
            Ok(())
        })
        .await;

    assert!(result.is_ok());
    // The guard reset on exit: the session is usable again.
    let again: Result<(), LedgerError> = session
        .execute_atomic(async |_tx: &mut PgTx| Ok(()))
        .await;
    assert!(again.is_ok());
}

#[tokio::test]
async fn test_integrity_conflict_retries_whole_unit() {
    let Some(ctx) = common::test_context().await else {
        return;
    };

    // Occupy an id so the unit's first attempt collides.
    let taken = common::random_id();
    let fresh = common::random_id();
    sqlx::query("INSERT INTO debtors (debtor_id) VALUES ($1)")
        .bind(taken)
        .execute(ctx.db().pool())
        .await
        .unwrap();

    let session = ctx.session();
    let attempts = AtomicU32::new(0);

    let result = session
        .execute_atomic(async |tx: &mut PgTx| {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            let id = if attempt == 0 { taken } else { fresh };
            retry_on_integrity_conflict(async {
                sqlx::query("INSERT INTO debtors (debtor_id) VALUES ($1)")
                    .bind(id)
                    .execute(&mut **tx)
                    .await
                    .map_err(LedgerError::from)?;
                Ok(id)
            })
            .await
        })
        .await;

    // The uniqueness violation became a conflict: the whole unit re-ran and
    // succeeded on its second attempt.
    assert_eq!(result.unwrap(), fresh);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_keygen_retries_collisions_in_savepoints() {
    let Some(ctx) = common::test_context().await else {
        return;
    };

    let taken = common::random_id();
    let fresh = common::random_id();
    sqlx::query("INSERT INTO debtors (debtor_id) VALUES ($1)")
        .bind(taken)
        .execute(ctx.db().pool())
        .await
        .unwrap();

    // First two draws collide, the third is free.
    let draws = Arc::new(AtomicU32::new(0));
    let draws_in_source = draws.clone();
    let keygen = KeyGenerator::with_source(5, move || {
        let n = draws_in_source.fetch_add(1, Ordering::SeqCst);
        if n < 2 { taken as u64 } else { fresh as u64 }
    });

    let session = ctx.session();
    let generated = session
        .execute_atomic(async |tx: &mut PgTx| {
            keygen.generate(tx).await
        })
        .await
        .unwrap();

    assert_eq!(generated, fresh);
    assert_eq!(draws.load(Ordering::SeqCst), 3);

    // The winning row was committed by the enclosing unit.
    let count: i64 = sqlx::query_scalar("SELECT count(*) FROM debtors WHERE debtor_id = $1")
        .bind(fresh)
        .fetch_one(ctx.db().pool())
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn test_keygen_exhaustion_is_fatal() {
    let Some(ctx) = common::test_context().await else {
        return;
    };

    let taken = common::random_id();
    sqlx::query("INSERT INTO debtors (debtor_id) VALUES ($1)")
        .bind(taken)
        .execute(ctx.db().pool())
        .await
        .unwrap();

    // Every draw collides; the bound must fail fast instead of retrying the
    // enclosing unit forever.
    let keygen = KeyGenerator::with_source(4, move || taken as u64);

    let session = ctx.session();
    let result = session
        .execute_atomic(async |tx: &mut PgTx| {
            keygen.generate(tx).await
        })
        .await;

    assert!(matches!(
        result,
        Err(LedgerError::KeySpaceExhausted { tries: 4 })
    ));
}
