// File: harness/src/orchestrator/clock.rs
//
// Clock Abstraction
//
// Poll loops and timeouts read time through this trait so tests can run them
// under tokio's paused clock without real waiting.

use std::future::Future;
use std::pin::Pin;
use tokio::time::{self, Duration, Instant};

/// Time source used by every waiting component of the harness
///
/// # Examples
///
/// ```rust,ignore
/// use std::sync::Arc;
/// use tokio::time::Duration;
/// use tos_throughput_harness::orchestrator::clock::{Clock, PausedClock};
///
/// #[tokio::test(start_paused = true)]
/// async fn test_poll_deadline() {
///     let clock = Arc::new(PausedClock::new());
///     let start = clock.now();
///     clock.advance(Duration::from_secs(30)).await;
///     assert_eq!(clock.now() - start, Duration::from_secs(30));
/// }
/// ```
pub trait Clock: Send + Sync {
    /// Returns the current instant
    fn now(&self) -> Instant;

    /// Sleeps for the specified duration
    fn sleep(&self, d: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// Real tokio time
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        time::Instant::now()
    }

    fn sleep(&self, d: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(time::sleep(d))
    }
}

/// Paused tokio time (tests)
///
/// Use inside `#[tokio::test(start_paused = true)]`, or construct with
/// [`PausedClock::pause`] on a current-thread runtime that is not paused yet.
/// While the runtime is idle, pending sleeps complete immediately because
/// tokio auto-advances paused time.
pub struct PausedClock;

impl PausedClock {
    /// Clock for a runtime whose time is already paused
    pub fn new() -> Self {
        Self
    }

    /// Pause tokio time and return the clock
    pub fn pause() -> Self {
        time::pause();
        Self
    }

    /// Advance paused time, waking expired sleeps
    pub async fn advance(&self, d: Duration) {
        time::advance(d).await;
    }
}

impl Default for PausedClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for PausedClock {
    fn now(&self) -> Instant {
        time::Instant::now()
    }

    fn sleep(&self, d: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(time::sleep(d))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_paused_clock_advance() {
        let clock = Arc::new(PausedClock::new());
        let start = clock.now();

        clock.advance(Duration::from_secs(3600)).await;
        assert_eq!(clock.now() - start, Duration::from_secs(3600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_completes_without_real_wait() {
        let clock: Arc<dyn Clock> = Arc::new(PausedClock::new());
        let wall = std::time::Instant::now();
        let start = clock.now();

        clock.sleep(Duration::from_secs(600)).await;

        assert!(clock.now() - start >= Duration::from_secs(600));
        assert!(wall.elapsed() < std::time::Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_system_clock_sleep() {
        let clock = SystemClock;
        let start = clock.now();
        clock.sleep(Duration::from_millis(10)).await;
        assert!(clock.now() - start >= Duration::from_millis(10));
    }
}
