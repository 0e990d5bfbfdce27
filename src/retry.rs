//! Retrying of asynchronous actions under a caller-supplied policy.
//!
//! The helper owns only the loop and the sleeping; whether to retry at all,
//! how long to back off, and when to give up are entirely the policy's
//! business. No upper bound is imposed here.

use std::future::Future;
use std::time::Duration;

/// Runs `action`, consulting `decide` after every failure.
///
/// `decide` receives the number of retries performed so far (zero on the
/// first failure) and the error. Returning a non-zero duration sleeps for
/// that long and retries; returning `None` (or a zero duration) re-throws
/// the error to the caller.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use synthrun::retry::retry;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let mut left = 2u32;
/// let value = retry(
///     || {
///         let ok = left == 0;
///         left = left.saturating_sub(1);
///         async move {
///             if ok { Ok(7) } else { Err("not yet") }
///         }
///     },
///     |retries, _err| (retries < 3).then(|| Duration::from_millis(1)),
/// )
/// .await
/// .unwrap();
/// assert_eq!(value, 7);
/// # }
/// ```
pub async fn retry<A, Fut, T, E, D>(mut action: A, mut decide: D) -> Result<T, E>
where
    A: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    D: FnMut(usize, &E) -> Option<Duration>,
{
    let mut retries = 0;
    loop {
        match action().await {
            Ok(value) => return Ok(value),
            Err(error) => match decide(retries, &error) {
                Some(wait) if !wait.is_zero() => {
                    retries += 1;
                    tokio::time::sleep(wait).await;
                }
                _ => return Err(error),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn returns_first_success_without_consulting_policy() {
        let polled = AtomicUsize::new(0);
        let result: Result<i32, ()> = retry(
            || async { Ok(5) },
            |_, _| {
                polled.fetch_add(1, Ordering::SeqCst);
                Some(Duration::from_millis(1))
            },
        )
        .await;
        assert_eq!(result, Ok(5));
        assert_eq!(polled.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn retries_until_policy_gives_up() {
        let attempts = AtomicUsize::new(0);
        let result: Result<(), &str> = retry(
            || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err("boom") }
            },
            |retries, _| (retries < 2).then(|| Duration::from_millis(1)),
        )
        .await;
        assert_eq!(result, Err("boom"));
        // First attempt plus two retries.
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn zero_wait_means_give_up() {
        let attempts = AtomicUsize::new(0);
        let result: Result<(), &str> = retry(
            || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err("boom") }
            },
            |_, _| Some(Duration::ZERO),
        )
        .await;
        assert_eq!(result, Err("boom"));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn policy_sees_incrementing_retry_counts() {
        let seen = std::sync::Mutex::new(Vec::new());
        let _: Result<(), &str> = retry(
            || async { Err("boom") },
            |retries, _| {
                seen.lock().unwrap().push(retries);
                (retries < 3).then(|| Duration::from_millis(1))
            },
        )
        .await;
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3]);
    }
}
