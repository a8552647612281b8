//! Integration tests for transaction deadlines and atomicity

use crate::integration::test_utils::{temp_runtime, Partner};
use std::time::Duration;
use strongbox::{
    Collection, RuntimeError, TransactionMode, TransactionScope, TransactionState,
};

#[tokio::test]
async fn test_slow_work_times_out_and_persists_nothing() {
    let runtime = temp_runtime();
    runtime.initialize().await.unwrap();
    let partners = Collection::<Partner>::new("partners");

    let err = runtime
        .transaction_with_timeout(
            "partners",
            TransactionMode::ReadWrite,
            Duration::from_millis(200),
            |scope| {
                let partners = partners.clone();
                async move {
                    partners.put(&scope, &Partner::new("p1", "Acme"))?;
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    Ok(())
                }
            },
        )
        .await
        .unwrap_err();

    assert!(matches!(err, RuntimeError::TransactionTimeout { ref collection, .. } if collection == "partners"));
    assert_eq!(runtime.transaction_stats().timed_out, 1);
    assert!(runtime.status().active_transactions.is_empty());

    let found: Option<Partner> = runtime.get("partners", "p1").await.unwrap();
    assert!(found.is_none());
}

#[tokio::test]
async fn test_scope_is_unusable_after_timeout() {
    let runtime = temp_runtime();
    runtime.initialize().await.unwrap();

    let leaked: std::sync::Arc<parking_lot::Mutex<Option<TransactionScope>>> = Default::default();
    let slot = leaked.clone();
    let _ = runtime
        .transaction_with_timeout(
            "partners",
            TransactionMode::ReadWrite,
            Duration::from_millis(20),
            |scope| async move {
                *slot.lock() = Some(scope);
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(())
            },
        )
        .await;

    let scope = leaked.lock().take().unwrap();
    assert_eq!(scope.state(), TransactionState::TimedOut);
    assert!(scope.put(b"p1", b"{}".to_vec()).is_err());
}

#[tokio::test]
async fn test_failed_work_rolls_back_earlier_writes() {
    let runtime = temp_runtime();
    runtime.initialize().await.unwrap();
    let partners = Collection::<Partner>::new("partners");

    let err = runtime
        .transaction("partners", TransactionMode::ReadWrite, |scope| {
            let partners = partners.clone();
            async move {
                partners.put(&scope, &Partner::new("p1", "Acme"))?;
                partners.put(&scope, &Partner::new("p2", "Globex"))?;
                Err::<(), _>(RuntimeError::Storage("disk full".into()))
            }
        })
        .await
        .unwrap_err();

    assert!(matches!(err, RuntimeError::Transaction { ref message, .. } if message.contains("disk full")));
    let all: Vec<Partner> = runtime.get_all("partners").await.unwrap();
    assert!(all.is_empty());
    assert_eq!(runtime.transaction_stats().aborted, 1);
}

#[tokio::test]
async fn test_batch_with_invalid_record_writes_nothing() {
    let runtime = temp_runtime();
    runtime.initialize().await.unwrap();

    let batch = vec![
        Partner::new("p1", "Acme"),
        Partner::new("p2", ""),
        Partner::new("p3", "Initech"),
    ];
    let err = runtime.put_many("partners", batch).await.unwrap_err();
    assert!(matches!(err, RuntimeError::Validation(ref msg) if msg.contains("name")));

    let all: Vec<Partner> = runtime.get_all("partners").await.unwrap();
    assert!(all.is_empty());
}

#[tokio::test]
async fn test_batch_commits_all_records_together() {
    let runtime = temp_runtime();
    runtime.initialize().await.unwrap();

    let written = runtime
        .put_many(
            "partners",
            vec![Partner::new("p1", "Acme"), Partner::new("p2", "Globex")],
        )
        .await
        .unwrap();
    assert_eq!(written, 2);

    let all: Vec<Partner> = runtime.get_all("partners").await.unwrap();
    assert_eq!(all.len(), 2);
}

#[tokio::test]
async fn test_read_only_transaction_rejects_writes() {
    let runtime = temp_runtime();
    runtime.initialize().await.unwrap();

    let err = runtime
        .transaction("partners", TransactionMode::ReadOnly, |scope| async move {
            scope.put(b"p1", b"{}".to_vec())
        })
        .await
        .unwrap_err();
    assert!(matches!(err, RuntimeError::Transaction { .. }));
}

#[tokio::test]
async fn test_transaction_before_initialize_fails_fast() {
    let runtime = temp_runtime();
    let err = runtime
        .transaction("partners", TransactionMode::ReadOnly, |_scope| async { Ok(()) })
        .await
        .unwrap_err();
    assert!(matches!(err, RuntimeError::RuntimeErrorState(ref msg) if msg.contains("not open")));
}
