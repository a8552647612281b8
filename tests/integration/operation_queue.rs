//! Integration tests for the operation queue behind the runtime
//!
//! Tests cover:
//! - Operations submitted before initialization run after it
//! - Priority and arrival ordering
//! - Retry bound and backoff
//! - Clear, overflow, and error-state rejection

use crate::integration::test_utils::{fast_options, temp_runtime, Partner};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use strongbox::queue::QueueConfig;
use strongbox::{
    DatabaseRuntime, LifecycleState, Priority, RuntimeError, RuntimeOptions, SledOpener,
};

async fn wait_for_pending(runtime: &DatabaseRuntime, count: usize) {
    for _ in 0..200 {
        if runtime.stats().pending == count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("expected {} pending operations, found {}", count, runtime.stats().pending);
}

#[tokio::test]
async fn test_put_before_initialize_then_get() {
    let runtime = temp_runtime();
    let pending = tokio::spawn({
        let runtime = runtime.clone();
        async move { runtime.put("partners", Partner::new("p1", "Acme")).await }
    });
    wait_for_pending(&runtime, 1).await;

    runtime.initialize().await.unwrap();
    pending.await.unwrap().unwrap();

    let partner: Partner = runtime.get("partners", "p1").await.unwrap().unwrap();
    assert_eq!(partner, Partner::new("p1", "Acme"));
}

#[tokio::test]
async fn test_backlog_runs_by_priority_then_arrival() {
    let runtime = temp_runtime();
    let order = Arc::new(Mutex::new(Vec::new()));

    let mut handles = Vec::new();
    for (name, priority) in [
        ("low", Priority::LOW),
        ("normal-1", Priority::NORMAL),
        ("urgent", Priority::URGENT),
        ("normal-2", Priority::NORMAL),
        ("high", Priority::HIGH),
    ] {
        let runtime_handle = runtime.clone();
        let order = Arc::clone(&order);
        handles.push(tokio::spawn(async move {
            runtime_handle
                .queue_operation_with_priority(priority, move || {
                    order.lock().push(name);
                    async { Ok(()) }
                })
                .await
        }));
        // Arrival order is what the test asserts on
        let expected = handles.len();
        wait_for_pending(&runtime, expected).await;
    }

    runtime.initialize().await.unwrap();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(
        *order.lock(),
        vec!["urgent", "high", "normal-1", "normal-2", "low"]
    );
}

#[tokio::test]
async fn test_same_priority_writes_apply_in_submission_order() {
    let runtime = temp_runtime();
    runtime.initialize().await.unwrap();

    let first = runtime.put("partners", Partner::new("p1", "First"));
    let second = runtime.put("partners", Partner::new("p1", "Second"));
    let (a, b) = tokio::join!(first, second);
    a.unwrap();
    b.unwrap();

    let partner: Partner = runtime.get("partners", "p1").await.unwrap().unwrap();
    assert_eq!(partner.name, "Second");
}

#[tokio::test]
async fn test_always_failing_operation_attempted_max_retries_plus_one() {
    let runtime = temp_runtime();
    runtime.initialize().await.unwrap();

    let attempts = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempts);
    let err = runtime
        .queue_operation(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(RuntimeError::transaction("partners", "write conflict")) }
        })
        .await
        .unwrap_err();

    assert_eq!(attempts.load(Ordering::SeqCst), 4);
    assert!(matches!(err, RuntimeError::RetriesExhausted { attempts: 4, .. }));
    assert_eq!(runtime.stats().retried, 3);
}

#[tokio::test]
async fn test_transient_failure_recovers_on_retry() {
    let runtime = temp_runtime();
    runtime.initialize().await.unwrap();

    let attempts = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempts);
    let value = runtime
        .queue_operation(move || {
            let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if attempt < 3 {
                    Err(RuntimeError::Storage("busy".into()))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await
        .unwrap();

    assert_eq!(value, 3);
}

#[tokio::test]
async fn test_validation_error_is_not_retried() {
    let runtime = temp_runtime();
    runtime.initialize().await.unwrap();

    let err = runtime
        .put("partners", Partner::new("p1", "   "))
        .await
        .unwrap_err();
    assert!(matches!(err, RuntimeError::Validation(_)));
    assert_eq!(runtime.stats().retried, 0);
}

#[tokio::test]
async fn test_clear_discards_pending_work() {
    let runtime = temp_runtime();
    let pending = tokio::spawn({
        let runtime = runtime.clone();
        async move { runtime.put("partners", Partner::new("p1", "Acme")).await }
    });
    wait_for_pending(&runtime, 1).await;

    assert_eq!(runtime.clear(), 1);
    assert!(matches!(
        pending.await.unwrap(),
        Err(RuntimeError::OperationDiscarded)
    ));

    runtime.initialize().await.unwrap();
    let found: Option<Partner> = runtime.get("partners", "p1").await.unwrap();
    assert!(found.is_none());
}

#[tokio::test]
async fn test_overflow_rejects_new_work() {
    let runtime = DatabaseRuntime::new(
        SledOpener::temporary(),
        RuntimeOptions {
            queue: QueueConfig {
                max_queue_size: 2,
                ..fast_options().queue
            },
            ..fast_options()
        },
    );
    let mut handles = Vec::new();
    for _ in 0..2 {
        let runtime = runtime.clone();
        handles.push(tokio::spawn(async move {
            runtime.queue_operation(|| async { Ok(()) }).await
        }));
    }
    wait_for_pending(&runtime, 2).await;

    let err = runtime
        .queue_operation(|| async { Ok(()) })
        .await
        .unwrap_err();
    assert!(matches!(err, RuntimeError::QueueOverflow { limit: 2 }));

    runtime.initialize().await.unwrap();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }
}

#[tokio::test]
async fn test_initialization_failure_rejects_backlog() {
    let runtime = DatabaseRuntime::new(
        crate::integration::test_utils::FailingOpener {
            delay: Duration::from_millis(1),
        },
        fast_options(),
    );
    let pending = tokio::spawn({
        let runtime = runtime.clone();
        async move { runtime.put("partners", Partner::new("p1", "Acme")).await }
    });
    wait_for_pending(&runtime, 1).await;

    assert!(runtime.initialize().await.is_err());
    assert!(matches!(
        pending.await.unwrap(),
        Err(RuntimeError::RuntimeErrorState(_))
    ));
}

#[tokio::test]
async fn test_reset_cancels_backoff_wait() {
    let runtime = DatabaseRuntime::new(
        SledOpener::temporary(),
        RuntimeOptions {
            queue: QueueConfig {
                retry_delay: Duration::from_secs(30),
                max_retry_delay: Duration::from_secs(30),
                ..QueueConfig::default()
            },
            ..RuntimeOptions::default()
        },
    );
    runtime.initialize().await.unwrap();

    let pending = tokio::spawn({
        let runtime = runtime.clone();
        async move {
            runtime
                .queue_operation(|| async { Err::<(), _>(RuntimeError::Storage("busy".into())) })
                .await
        }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    runtime.reset();
    let outcome = tokio::time::timeout(Duration::from_secs(2), pending)
        .await
        .expect("caller should be released promptly")
        .unwrap();
    assert!(matches!(outcome, Err(RuntimeError::OperationDiscarded)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_work_queued_after_reset_waits_for_next_initialize() {
    let runtime = temp_runtime();
    runtime.initialize().await.unwrap();

    let in_flight = tokio::spawn({
        let runtime = runtime.clone();
        async move {
            runtime
                .queue_operation(|| async {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Ok(())
                })
                .await
        }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    runtime.reset();

    let observed = Arc::new(Mutex::new(None));
    let recorder = tokio::spawn({
        let runtime = runtime.clone();
        let observed = Arc::clone(&observed);
        async move {
            let state_of = runtime.clone();
            runtime
                .queue_operation(move || {
                    *observed.lock() = Some(state_of.state());
                    futures::future::ready(Ok(()))
                })
                .await
        }
    });
    let put = tokio::spawn({
        let runtime = runtime.clone();
        async move { runtime.put("partners", Partner::new("p1", "Acme")).await }
    });
    wait_for_pending(&runtime, 2).await;

    // The in-flight operation finishes while the runtime is uninitialized
    in_flight.await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(observed.lock().is_none());
    assert!(!put.is_finished());
    assert_eq!(runtime.stats().pending, 2);

    runtime.initialize().await.unwrap();
    recorder.await.unwrap().unwrap();
    put.await.unwrap().unwrap();
    assert_eq!(*observed.lock(), Some(LifecycleState::Ready));
    let partner: Option<Partner> = runtime.get("partners", "p1").await.unwrap();
    assert_eq!(partner, Some(Partner::new("p1", "Acme")));
}
