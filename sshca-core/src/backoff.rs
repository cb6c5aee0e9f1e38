//! Bounded, fixed-interval retry for the one condition in this system that's
//! *supposed* to be retried: a token whose `iat` is a little ahead of our
//! clock (design doc §4.2, "Clock-skew retry").
//!
//! This is deliberately not the exponential backoff used elsewhere in the
//! Lexe stack (see the teacher's `common::backoff`) — spec.md is explicit
//! that clock-skew retries are fixed 1-second pauses, bounded at N attempts,
//! and only for that one error condition.

use std::time::Duration;

/// The fixed pause between clock-skew retries.
pub const CLOCK_SKEW_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Runs `attempt` up to `max_retries + 1` times total, retrying only when it
/// returns `Err(Some(skew))` (a detected clock-skew condition). Any other
/// `Err` is returned immediately without retrying.
///
/// `sleep` is injected so tests can run this without touching a real clock.
pub async fn retry_on_clock_skew<T, E, Fut, FutSleep>(
    max_retries: u32,
    mut attempt: impl FnMut() -> Fut,
    mut sleep: impl FnMut(Duration) -> FutSleep,
) -> Result<T, E>
where
    Fut: std::future::Future<Output = Result<T, RetryableError<E>>>,
    FutSleep: std::future::Future<Output = ()>,
{
    let mut retries_left = max_retries;
    loop {
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(RetryableError::Terminal(e)) => return Err(e),
            Err(RetryableError::ClockSkew(e)) => {
                if retries_left == 0 {
                    return Err(e);
                }
                retries_left -= 1;
                sleep(CLOCK_SKEW_RETRY_INTERVAL).await;
            }
        }
    }
}

/// Distinguishes a retryable clock-skew failure from every other (terminal)
/// failure, so callers can't accidentally retry something they shouldn't.
pub enum RetryableError<E> {
    ClockSkew(E),
    Terminal(E),
}

#[cfg(test)]
mod test {
    use super::*;
    use std::cell::Cell;

    #[tokio::test]
    async fn retries_only_on_clock_skew_then_succeeds() {
        let attempts = Cell::new(0u32);
        let sleeps = Cell::new(0u32);

        let result: Result<&'static str, &'static str> = retry_on_clock_skew(
            5,
            || {
                attempts.set(attempts.get() + 1);
                async move {
                    if attempts.get() < 4 {
                        Err(RetryableError::ClockSkew("skew"))
                    } else {
                        Ok("ok")
                    }
                }
            },
            |_| {
                sleeps.set(sleeps.get() + 1);
                async move {}
            },
        )
        .await;

        assert_eq!(result, Ok("ok"));
        assert_eq!(attempts.get(), 4);
        assert_eq!(sleeps.get(), 3);
    }

    #[tokio::test]
    async fn terminal_errors_never_retry() {
        let attempts = Cell::new(0u32);
        let result: Result<&'static str, &'static str> = retry_on_clock_skew(
            5,
            || {
                attempts.set(attempts.get() + 1);
                async move { Err(RetryableError::Terminal("nope")) }
            },
            |_| async move {},
        )
        .await;

        assert_eq!(result, Err("nope"));
        assert_eq!(attempts.get(), 1);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let attempts = Cell::new(0u32);
        let result: Result<&'static str, &'static str> = retry_on_clock_skew(
            2,
            || {
                attempts.set(attempts.get() + 1);
                async move { Err(RetryableError::ClockSkew("still skewed")) }
            },
            |_| async move {},
        )
        .await;

        assert_eq!(result, Err("still skewed"));
        assert_eq!(attempts.get(), 3); // initial + 2 retries
    }
}
