/*!
 * Async and time helpers shared across bridgescan crates.
 */
use std::future::Future;
use std::time::Duration;

use tokio::time::timeout;

use crate::error::{Error, Result};

/// Run a future with an optional timeout
///
/// `None` waits for the future indefinitely.
///
/// # Returns
///
/// The output of the future, or a timeout error if the deadline passes first
pub async fn with_timeout<F, T>(duration: Option<Duration>, future: F) -> Result<T>
where
    F: Future<Output = T>,
{
    match duration {
        Some(duration) => timeout(duration, future)
            .await
            .map_err(|_| Error::timeout(format!("Operation timed out after {:?}", duration))),
        None => Ok(future.await),
    }
}

/// Convert a millisecond setting into a duration, treating 0 as "unset"
pub fn optional_millis(millis: u64) -> Option<Duration> {
    if millis == 0 {
        None
    } else {
        Some(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_with_timeout_success() {
        let result = with_timeout(Some(Duration::from_secs(1)), async { 42 }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout_failure() {
        let result = with_timeout(Some(Duration::from_millis(10)), async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            42
        })
        .await;
        assert!(matches!(result, Err(Error::Timeout(_))));
    }

    #[tokio::test]
    async fn test_with_timeout_unbounded() {
        let result = with_timeout(None, async { "done" }).await;
        assert_eq!(result.unwrap(), "done");
    }

    #[test]
    fn test_optional_millis() {
        assert_eq!(optional_millis(0), None);
        assert_eq!(optional_millis(250), Some(Duration::from_millis(250)));
    }
}
