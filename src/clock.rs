//! Injectable time source for drivers and the sequencer.
//!
//! Simulated devices must honour real timing contracts (an integration time
//! of 200 ms takes 200 ms) so that scan-duration estimates stay meaningful.
//! Tests, on the other hand, should not wait on the wall clock. Every timed
//! operation therefore goes through a [`Clock`]:
//!
//! - [`SystemClock`] sleeps with `tokio::time::sleep`. It also works with a
//!   paused tokio runtime (`#[tokio::test(start_paused = true)]`).
//! - [`SimulatedClock`] returns immediately and advances a virtual timeline,
//!   which it also uses for timestamps.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Source of delays and timestamps.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Suspend the caller for `duration`.
    async fn sleep(&self, duration: Duration);

    /// Current timestamp.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time backed by tokio.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Virtual clock that completes sleeps instantly.
///
/// A `sleep` moves the timeline forward to its own deadline (start time plus
/// duration). Sleeps that start together, such as the two arm moves of one
/// point, therefore overlap instead of adding up, and after a simulated scan
/// [`SimulatedClock::elapsed`] reports how long the same scan would take on
/// real hardware.
#[derive(Debug)]
pub struct SimulatedClock {
    epoch: DateTime<Utc>,
    elapsed_ns: AtomicU64,
}

impl SimulatedClock {
    /// Start a virtual timeline at the current wall-clock time.
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    /// Start a virtual timeline at a fixed timestamp.
    pub fn starting_at(epoch: DateTime<Utc>) -> Self {
        Self {
            epoch,
            elapsed_ns: AtomicU64::new(0),
        }
    }

    /// Total virtual time slept so far.
    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.elapsed_ns.load(Ordering::SeqCst))
    }

    /// Advance the timeline without sleeping.
    pub fn advance(&self, duration: Duration) {
        self.elapsed_ns.fetch_add(as_nanos(duration), Ordering::SeqCst);
    }
}

fn as_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

impl Default for SimulatedClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for SimulatedClock {
    async fn sleep(&self, duration: Duration) {
        let deadline = self.elapsed_ns.load(Ordering::SeqCst).saturating_add(as_nanos(duration));
        // Concurrent sleeps read their start time before anyone advances.
        tokio::task::yield_now().await;
        self.elapsed_ns.fetch_max(deadline, Ordering::SeqCst);
    }

    fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.elapsed()).unwrap_or(chrono::Duration::zero());
        self.epoch + elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn test_simulated_clock_accumulates_sleeps() {
        let epoch = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = SimulatedClock::starting_at(epoch);

        clock.sleep(Duration::from_millis(250)).await;
        clock.sleep(Duration::from_millis(750)).await;

        assert_eq!(clock.elapsed(), Duration::from_secs(1));
        assert_eq!(clock.now(), epoch + chrono::Duration::seconds(1));
    }

    #[tokio::test]
    async fn test_concurrent_sleeps_overlap() {
        let clock = SimulatedClock::new();

        tokio::join!(
            clock.sleep(Duration::from_secs(4)),
            clock.sleep(Duration::from_secs(1)),
        );
        assert_eq!(clock.elapsed(), Duration::from_secs(4));

        clock.sleep(Duration::from_millis(500)).await;
        assert_eq!(clock.elapsed(), Duration::from_millis(4500));
    }

    #[test]
    fn test_advance_without_sleeping() {
        let clock = SimulatedClock::new();
        clock.advance(Duration::from_secs(2));
        assert_eq!(clock.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_system_clock_follows_tokio_time() {
        let clock = SystemClock;
        let start = tokio::time::Instant::now();
        clock.sleep(Duration::from_secs(5)).await;
        assert!(start.elapsed() >= Duration::from_secs(5));
    }
}
