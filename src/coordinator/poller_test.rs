// ABOUTME: Tests for the cancellable status poller.
// ABOUTME: Covers terminal states, retries, exhaustion, cancellation, and backoff.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use super::poller::Poller;
use crate::error::PollError;

#[tokio::test]
async fn test_returns_immediately_on_terminal_state() {
    let poller = Poller::new(Duration::from_millis(10), 5);

    let start = Instant::now();
    let value = poller
        .run(
            || async { Ok(Some("completed".to_string())) },
            std::future::pending::<()>(),
        )
        .await
        .unwrap();

    assert_eq!(value, "completed");
    assert!(
        start.elapsed() < Duration::from_millis(50),
        "A terminal first probe should not sleep, took {:?}",
        start.elapsed()
    );
}

#[tokio::test]
async fn test_retries_until_terminal_state() {
    let poller = Poller::new(Duration::from_millis(10), 10);
    let attempts = Arc::new(AtomicUsize::new(0));

    let probe_attempts = attempts.clone();
    let value = poller
        .run(
            move || {
                let attempts = probe_attempts.clone();
                async move {
                    if attempts.fetch_add(1, Ordering::SeqCst) + 1 < 3 {
                        Ok(None)
                    } else {
                        Ok(Some(42))
                    }
                }
            },
            std::future::pending::<()>(),
        )
        .await
        .unwrap();

    assert_eq!(value, 42);
    assert_eq!(
        attempts.load(Ordering::SeqCst),
        3,
        "Polling should stop at the first terminal probe"
    );
}

#[tokio::test]
async fn test_attempts_exhausted() {
    let poller = Poller::new(Duration::from_millis(10), 3);
    let attempts = Arc::new(AtomicUsize::new(0));

    let probe_attempts = attempts.clone();
    let result = poller
        .run(
            move || {
                let attempts = probe_attempts.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Ok(None::<u32>)
                }
            },
            std::future::pending::<()>(),
        )
        .await;

    match result.unwrap_err() {
        PollError::AttemptsExhausted { attempts: reported } => assert_eq!(reported, 3),
        other => panic!("Expected AttemptsExhausted, got {:?}", other),
    }
    assert_eq!(
        attempts.load(Ordering::SeqCst),
        3,
        "Every budgeted attempt should run exactly once"
    );
}

#[tokio::test]
async fn test_probe_failure_is_terminal() {
    let poller = Poller::new(Duration::from_millis(10), 5);
    let attempts = Arc::new(AtomicUsize::new(0));

    let probe_attempts = attempts.clone();
    let result = poller
        .run(
            move || {
                let attempts = probe_attempts.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err::<Option<u32>, _>(anyhow::anyhow!("status endpoint returned 500"))
                }
            },
            std::future::pending::<()>(),
        )
        .await;

    match result.unwrap_err() {
        PollError::Probe(error) => {
            assert!(error.to_string().contains("500"));
        }
        other => panic!("Expected Probe, got {:?}", other),
    }
    assert_eq!(
        attempts.load(Ordering::SeqCst),
        1,
        "A failing probe should not be retried"
    );
}

#[tokio::test]
async fn test_cancelled_during_wait() {
    let poller = Poller::new(Duration::from_millis(500), 10);

    let cancel = async {
        tokio::time::sleep(Duration::from_millis(30)).await;
    };

    let start = Instant::now();
    let result = poller.run(|| async { Ok(None::<u32>) }, cancel).await;
    let elapsed = start.elapsed();

    assert!(matches!(result, Err(PollError::Cancelled)));
    assert!(
        elapsed < Duration::from_millis(300),
        "Cancellation should cut the wait short, took {:?}",
        elapsed
    );
}

#[tokio::test]
async fn test_backoff_grows_delay() {
    // Delays: 10ms, 20ms, 40ms, then capped at 50ms.
    let poller =
        Poller::new(Duration::from_millis(10), 5).with_backoff(2.0, Duration::from_millis(50));

    let start = Instant::now();
    let result = poller
        .run(|| async { Ok(None::<u32>) }, std::future::pending::<()>())
        .await;
    let elapsed = start.elapsed();

    assert!(matches!(
        result,
        Err(PollError::AttemptsExhausted { attempts: 5 })
    ));
    assert!(
        elapsed >= Duration::from_millis(100),
        "Backoff should stretch the total wait beyond 4 fixed intervals, took {:?}",
        elapsed
    );
    assert!(
        elapsed < Duration::from_millis(500),
        "The cap should bound the total wait, took {:?}",
        elapsed
    );
}

#[test]
#[should_panic(expected = "interval must be positive")]
fn test_zero_interval_panics() {
    let _ = Poller::new(Duration::ZERO, 5);
}

#[test]
#[should_panic(expected = "max_attempts must be positive")]
fn test_zero_attempts_panics() {
    let _ = Poller::new(Duration::from_millis(10), 0);
}

#[test]
#[should_panic(expected = "multiplier must be at least 1.0")]
fn test_shrinking_backoff_panics() {
    let _ = Poller::new(Duration::from_millis(10), 5).with_backoff(0.5, Duration::from_secs(1));
}

#[tokio::test]
async fn test_poll_error_display() {
    let err = PollError::Probe(anyhow::anyhow!("timeout"));
    assert!(err.to_string().contains("timeout"));

    let err = PollError::AttemptsExhausted { attempts: 7 };
    assert!(err.to_string().contains("7"));

    let err = PollError::Cancelled;
    assert!(err.to_string().contains("cancelled"));
}
