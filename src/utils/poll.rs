//! Wall-clock abstraction and bounded polling.
//!
//! Every wait in the engine (confirmation polling, inter-order spacing,
//! the cadence sleep between cycles) goes through a [`Clock`] and observes a
//! [`CancellationToken`]. Production code uses [`SystemClock`]; tests drive
//! [`ManualClock`], whose `sleep` advances virtual time instantly.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Source of wall-clock time and suspension.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    async fn sleep(&self, duration: Duration);
}

/// Real time backed by `tokio::time`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Virtual clock. `sleep` returns immediately after moving time forward.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, duration: Duration) {
        let step = to_chrono(duration);
        let mut now = self.now.lock().unwrap_or_else(|p| p.into_inner());
        *now += step;
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|p| p.into_inner()) = at;
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|p| p.into_inner())
    }

    async fn sleep(&self, duration: Duration) {
        self.advance(duration);
        tokio::task::yield_now().await;
    }
}

/// Fixed-interval polling bounded by a wall-clock deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub timeout: Duration,
}

impl PollPolicy {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }
}

/// Result of [`poll_until`].
#[derive(Debug, PartialEq, Eq)]
pub enum PollOutcome<T> {
    Ready { value: T, attempts: u32 },
    TimedOut { attempts: u32, waited: Duration },
    Cancelled,
}

impl<T> PollOutcome<T> {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }
}

/// Run `probe` until it yields `Some`, the deadline passes, or `cancel` fires.
///
/// The probe is always attempted at least once. It receives the 1-based
/// attempt number.
pub async fn poll_until<T, F, Fut>(
    clock: &dyn Clock,
    policy: PollPolicy,
    cancel: &CancellationToken,
    mut probe: F,
) -> PollOutcome<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let started = clock.now();
    let deadline = started + to_chrono(policy.timeout);
    let mut attempts = 0u32;

    loop {
        if cancel.is_cancelled() {
            return PollOutcome::Cancelled;
        }

        attempts += 1;
        if let Some(value) = probe(attempts).await {
            return PollOutcome::Ready { value, attempts };
        }

        let now = clock.now();
        if now >= deadline {
            return PollOutcome::TimedOut {
                attempts,
                waited: (now - started).to_std().unwrap_or_default(),
            };
        }

        if !sleep_or_cancel(clock, policy.interval, cancel).await {
            return PollOutcome::Cancelled;
        }
    }
}

/// Sleep on `clock`, returning `false` if `cancel` fired first.
pub async fn sleep_or_cancel(clock: &dyn Clock, duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = clock.sleep(duration) => true,
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(3650))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn clock() -> ManualClock {
        ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
    }

    #[tokio::test]
    async fn test_ready_on_third_attempt() {
        let clock = clock();
        let cancel = CancellationToken::new();
        let policy = PollPolicy::new(Duration::from_secs(5), Duration::from_secs(60));

        let outcome = poll_until(&clock, policy, &cancel, |attempt| async move {
            (attempt == 3).then_some("done")
        })
        .await;

        assert_eq!(
            outcome,
            PollOutcome::Ready {
                value: "done",
                attempts: 3
            }
        );
        // Two sleeps happened between three attempts.
        assert_eq!(
            clock.now(),
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 10).unwrap()
        );
    }

    #[tokio::test]
    async fn test_times_out_at_deadline() {
        let clock = clock();
        let cancel = CancellationToken::new();
        let policy = PollPolicy::new(Duration::from_secs(5), Duration::from_secs(15));
        let calls = AtomicU32::new(0);

        let outcome: PollOutcome<()> = poll_until(&clock, policy, &cancel, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { None }
        })
        .await;

        // Attempts at t=0, 5, 10, 15.
        assert_eq!(
            outcome,
            PollOutcome::TimedOut {
                attempts: 4,
                waited: Duration::from_secs(15)
            }
        );
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_attempt() {
        let clock = clock();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let policy = PollPolicy::new(Duration::from_secs(1), Duration::from_secs(10));

        let outcome: PollOutcome<()> = poll_until(&clock, policy, &cancel, |_| async { None }).await;
        assert_eq!(outcome, PollOutcome::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_real_sleep() {
        let cancel = CancellationToken::new();
        let child = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            child.cancel();
        });

        let completed = sleep_or_cancel(&SystemClock, Duration::from_secs(3600), &cancel).await;
        assert!(!completed);
    }
}
