//! Properties of backlog ordering and retry backoff

use parking_lot::Mutex;
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use strongbox::queue::QueueManager;
use strongbox::{BackoffPolicy, Priority, QueueConfig};

fn priorities() -> impl Strategy<Value = Vec<i32>> {
    prop::collection::vec(prop_oneof![Just(-10), Just(0), Just(10), Just(100), -5i32..5], 0..40)
}

/// Pending operations are always held highest priority first
#[test]
fn test_backlog_stays_sorted_by_priority() {
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(&priorities(), |values| {
            let queue = QueueManager::new(QueueConfig::default());
            for value in &values {
                queue
                    .enqueue(Priority(*value), || async { Ok(()) })
                    .unwrap();
            }

            let pending = queue.pending_priorities();
            prop_assert_eq!(pending.len(), values.len());
            prop_assert!(pending.windows(2).all(|pair| pair[0] >= pair[1]));
            Ok(())
        })
        .unwrap();
}

/// Drain order is a stable sort of arrival order by descending priority
#[test]
fn test_drain_order_is_priority_then_arrival() {
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(&priorities(), |values| {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            let order = Arc::new(Mutex::new(Vec::new()));

            rt.block_on(async {
                let queue = QueueManager::new(QueueConfig::default());
                let mut receivers = Vec::new();
                for (arrival, value) in values.iter().enumerate() {
                    let order = Arc::clone(&order);
                    let (_, rx) = queue
                        .enqueue(Priority(*value), move || {
                            order.lock().push(arrival);
                            async { Ok(()) }
                        })
                        .unwrap();
                    receivers.push(rx);
                }
                queue.process_queue(|| true).await;
                for rx in receivers {
                    rx.await.unwrap().unwrap();
                }
            });

            let mut expected: Vec<usize> = (0..values.len()).collect();
            expected.sort_by_key(|&arrival| std::cmp::Reverse(values[arrival]));
            prop_assert_eq!(order.lock().clone(), expected);
            Ok(())
        })
        .unwrap();
}

/// Backoff never exceeds the cap and never shrinks as retries grow
#[test]
fn test_backoff_is_monotonic_and_capped() {
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(
            &(1u64..2_000, 1u64..60_000, any::<bool>(), 1u32..40),
            |(delay_ms, cap_ms, exponential, retries)| {
                let config = QueueConfig {
                    retry_delay: Duration::from_millis(delay_ms),
                    max_retry_delay: Duration::from_millis(cap_ms),
                    backoff: if exponential {
                        BackoffPolicy::Exponential
                    } else {
                        BackoffPolicy::Linear
                    },
                    ..QueueConfig::default()
                };

                let delays: Vec<Duration> =
                    (1..=retries).map(|retry| config.backoff_delay(retry)).collect();
                prop_assert!(delays.iter().all(|d| *d <= config.max_retry_delay));
                prop_assert!(delays.windows(2).all(|pair| pair[0] <= pair[1]));
                Ok(())
            },
        )
        .unwrap();
}
