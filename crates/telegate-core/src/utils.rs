/*!
 * Async helpers shared across TeleGate crates.
 */
use std::future::Future;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Run a future with a timeout
///
/// # Arguments
///
/// * `duration` - The timeout duration
/// * `future` - The future to run
///
/// # Returns
///
/// The result of the future, or a timeout error if the timeout is reached
pub async fn with_timeout<F, T>(duration: Duration, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(Error::timeout(format!("Operation timed out after {:?}", duration))),
    }
}

/// Run a future with a timeout and retry on failure
///
/// # Arguments
///
/// * `duration` - The timeout duration for each attempt
/// * `retries` - The number of retries after the first attempt
/// * `pause` - Delay between attempts
/// * `future_factory` - A function that creates a new future for each attempt
///
/// # Returns
///
/// The result of the future, or the last error if all attempts fail
pub async fn with_retry<F, Fut, T>(
    duration: Duration,
    retries: usize,
    pause: Duration,
    mut future_factory: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_error = None;
    let start = Instant::now();

    for i in 0..=retries {
        if i > 0 {
            debug!("Retry {}/{}", i, retries);
            tokio::time::sleep(pause).await;
        }

        match with_timeout(duration, future_factory()).await {
            Ok(result) => return Ok(result),
            Err(e) => {
                warn!("Attempt {} failed: {}", i + 1, e);
                last_error = Some(e);
            }
        }
    }

    warn!("All {} attempts failed after {:?}", retries + 1, start.elapsed());

    Err(last_error.unwrap_or_else(|| Error::other("Unknown error in retry loop")))
}

/// Spawn a background task and log its outcome
///
/// # Arguments
///
/// * `name` - A name for the task (for logging)
/// * `fut` - The future to run
pub fn spawn_and_log<F, T, E>(name: &str, fut: F) -> tokio::task::JoinHandle<()>
where
    F: Future<Output = std::result::Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let task_name = name.to_string();
    tokio::spawn(async move {
        match fut.await {
            Ok(_) => {
                debug!("Task '{}' completed successfully", task_name);
            }
            Err(e) => {
                warn!("Task '{}' failed: {}", task_name, e);
            }
        }
    })
}

/// Task handle that aborts the task when dropped.
///
/// Lets a supervising future own a spawned task, so cancelling the
/// supervisor also stops the task.
#[derive(Debug)]
pub struct AbortOnDrop<T>(pub JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Convert milliseconds from settings to a Duration, clamping negatives to zero
pub fn millis_to_duration(millis: i64) -> Duration {
    Duration::from_millis(millis.max(0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_with_timeout_success() {
        let result = with_timeout(Duration::from_secs(1), async { Ok::<_, Error>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_with_timeout_failure() {
        let result = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok::<_, Error>(42)
        })
        .await;
        assert!(matches!(result, Err(Error::Timeout(_))));
    }

    #[tokio::test]
    async fn test_with_retry_success_after_retries() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();

        let result = with_retry(Duration::from_secs(1), 3, Duration::from_millis(1), move || {
            let current = counter_clone.fetch_add(1, Ordering::SeqCst);
            async move {
                if current < 2 {
                    Err(Error::other("Intentional failure"))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_all_failures() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();

        let result: Result<()> =
            with_retry(Duration::from_secs(1), 2, Duration::from_millis(1), move || {
                counter_clone.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::other("Intentional failure")) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_spawn_and_log_runs_to_completion() {
        let handle = spawn_and_log("unit", async { Err::<(), _>("boom") });
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_abort_on_drop_stops_the_task() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<()>();
        let guard = AbortOnDrop(tokio::spawn(async move {
            let _tx = tx;
            std::future::pending::<()>().await;
        }));

        drop(guard);
        // the sender is dropped with the aborted task
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn test_millis_to_duration() {
        assert_eq!(millis_to_duration(1500), Duration::from_millis(1500));
        assert_eq!(millis_to_duration(-3), Duration::ZERO);
    }
}
