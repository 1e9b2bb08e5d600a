//! Periodic Triggers
//!
//! Runs an async job on a fixed cadence until cancelled. Triggers are
//! aligned to wall-clock boundaries by default: an hourly trigger fires at
//! the top of each hour and a daily trigger at UTC midnight. The next
//! boundary is recomputed from the wall clock before every wait, so a run
//! never starts before its boundary.
//!
//! A job that overruns its period delays the next run instead of stacking
//! runs; missed boundaries are skipped.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// A named periodic job runner.
#[derive(Debug, Clone)]
pub struct PeriodicTrigger {
    name: &'static str,
    period: Duration,
    aligned: bool,
    cancel: CancellationToken,
    clock: fn() -> DateTime<Utc>,
}

impl PeriodicTrigger {
    /// Create a trigger aligned to multiples of `period` since the Unix epoch.
    #[must_use]
    pub const fn new(name: &'static str, period: Duration, cancel: CancellationToken) -> Self {
        Self {
            name,
            period,
            aligned: true,
            cancel,
            clock: Utc::now,
        }
    }

    /// Fire one full period after start instead of at the next boundary.
    #[must_use]
    pub const fn unaligned(mut self) -> Self {
        self.aligned = false;
        self
    }

    /// Run `job` on every tick until the cancellation token fires.
    ///
    /// A job already in progress when cancellation arrives runs to
    /// completion. Returns the number of completed runs.
    pub async fn run<F, Fut>(self, mut job: F) -> u64
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ()>,
    {
        let period = self.period.max(Duration::from_millis(1));
        tracing::info!(
            trigger = self.name,
            period_secs = period.as_secs(),
            aligned = self.aligned,
            "Periodic trigger armed"
        );

        let runs = if self.aligned {
            self.run_aligned(period, &mut job).await
        } else {
            self.run_fixed(period, &mut job).await
        };

        tracing::debug!(trigger = self.name, runs, "Periodic trigger cancelled");
        runs
    }

    async fn run_aligned<F, Fut>(&self, period: Duration, job: &mut F) -> u64
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ()>,
    {
        let now = (self.clock)();
        let mut target = shift(now, next_boundary_delay(now, period));
        let mut runs = 0;

        loop {
            let remaining = (target - (self.clock)()).to_std().unwrap_or(Duration::ZERO);
            if remaining.is_zero() {
                tracing::debug!(trigger = self.name, boundary = %target, "Periodic trigger fired");
                job().await;
                runs += 1;
                target = boundary_after((self.clock)(), period);
                continue;
            }

            // Woken early by clock drift: the loop waits out the remainder.
            tokio::select! {
                () = self.cancel.cancelled() => return runs,
                () = tokio::time::sleep(remaining) => {}
            }
        }
    }

    async fn run_fixed<F, Fut>(&self, period: Duration, job: &mut F) -> u64
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ()>,
    {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut runs = 0;
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => return runs,
                _ = interval.tick() => {
                    tracing::debug!(trigger = self.name, "Periodic trigger fired");
                    job().await;
                    runs += 1;
                }
            }
        }
    }
}

fn shift(instant: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(by)
        .ok()
        .and_then(|delta| instant.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// The first boundary strictly after `now`.
#[must_use]
pub fn boundary_after(now: DateTime<Utc>, period: Duration) -> DateTime<Utc> {
    let delay = next_boundary_delay(now, period);
    shift(now, if delay.is_zero() { period } else { delay })
}

/// Time from `now` until the next multiple of `period` since the epoch.
///
/// Returns zero when `now` sits exactly on a boundary.
#[must_use]
pub fn next_boundary_delay(now: DateTime<Utc>, period: Duration) -> Duration {
    let Ok(period_millis) = i64::try_from(period.as_millis()) else {
        return period;
    };
    if period_millis == 0 {
        return Duration::ZERO;
    }

    let elapsed = now.timestamp_millis().rem_euclid(period_millis);
    if elapsed == 0 {
        return Duration::ZERO;
    }

    #[allow(clippy::cast_sign_loss)]
    Duration::from_millis((period_millis - elapsed) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
    use test_case::test_case;

    const HOUR: Duration = Duration::from_secs(3600);
    const DAY: Duration = Duration::from_secs(86_400);

    #[test_case(14, 0, 0, HOUR, Duration::ZERO ; "on the hour")]
    #[test_case(14, 59, 30, HOUR, Duration::from_secs(30) ; "just before the hour")]
    #[test_case(14, 0, 1, HOUR, Duration::from_secs(3599) ; "just after the hour")]
    #[test_case(23, 0, 0, DAY, HOUR ; "one hour before midnight")]
    #[test_case(0, 0, 0, DAY, Duration::ZERO ; "midnight")]
    fn boundary_delay(h: u32, m: u32, s: u32, period: Duration, expected: Duration) {
        let now = Utc.with_ymd_and_hms(2024, 5, 17, h, m, s).unwrap();
        assert_eq!(next_boundary_delay(now, period), expected);
    }

    #[test_case((13, 59, 59), 999, (14, 0, 0) ; "a millisecond early")]
    #[test_case((14, 0, 0), 0, (15, 0, 0) ; "exactly on the hour")]
    #[test_case((14, 0, 0), 1, (15, 0, 0) ; "just after the hour")]
    fn next_hour_boundary(hms: (u32, u32, u32), millis: i64, expected: (u32, u32, u32)) {
        let now = Utc.with_ymd_and_hms(2024, 5, 17, hms.0, hms.1, hms.2).unwrap()
            + TimeDelta::milliseconds(millis);
        let (h, m, s) = expected;
        assert_eq!(
            boundary_after(now, HOUR),
            Utc.with_ymd_and_hms(2024, 5, 17, h, m, s).unwrap()
        );
    }

    static WALL_MILLIS: AtomicI64 = AtomicI64::new(0);

    fn wall_clock() -> DateTime<Utc> {
        DateTime::from_timestamp_millis(WALL_MILLIS.load(Ordering::SeqCst)).unwrap()
    }

    fn set_wall(h: u32, m: u32, s: u32, millis: i64) {
        let at = Utc.with_ymd_and_hms(2024, 5, 17, h, m, s).unwrap() + TimeDelta::milliseconds(millis);
        WALL_MILLIS.store(at.timestamp_millis(), Ordering::SeqCst);
    }

    #[tokio::test(start_paused = true)]
    async fn aligned_trigger_waits_for_the_wall_clock_boundary() {
        set_wall(13, 59, 59, 0);
        let cancel = CancellationToken::new();
        let count = Arc::new(AtomicU32::new(0));

        let mut trigger = PeriodicTrigger::new("hourly", HOUR, cancel.clone());
        trigger.clock = wall_clock;
        let counter = Arc::clone(&count);
        let handle = tokio::spawn(trigger.run(move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }));

        // The timer elapses but the wall clock lags behind 14:00.
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        set_wall(13, 59, 59, 999);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        set_wall(14, 0, 0, 0);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        // Still 14:00 on the wall: no second run for the same hour.
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        cancel.cancel();
        assert_eq!(handle.await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn runs_each_period_until_cancelled() {
        let cancel = CancellationToken::new();
        let count = Arc::new(AtomicU32::new(0));

        let trigger = PeriodicTrigger::new("test", Duration::from_secs(10), cancel.clone()).unaligned();
        let counter = Arc::clone(&count);
        let handle = tokio::spawn(trigger.run(move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }));

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);

        cancel.cancel();
        assert_eq!(handle.await.unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_before_first_tick() {
        let cancel = CancellationToken::new();
        let trigger = PeriodicTrigger::new("idle", HOUR, cancel.clone()).unaligned();
        let handle = tokio::spawn(trigger.run(|| async {}));

        cancel.cancel();
        assert_eq!(handle.await.unwrap(), 0);
    }
}
