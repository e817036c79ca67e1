//! Session lifecycle primitives: idle tracking and daily output quota

use std::time::Duration;

use chrono::NaiveDate;
use tokio::time::Instant;

/// Tracks last voice activity and the idle-timeout deadline
#[derive(Debug)]
pub struct IdleTimer {
    last_activity: Instant,
    timeout: Duration,
}

impl IdleTimer {
    /// Start the timer now
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            last_activity: Instant::now(),
            timeout,
        }
    }

    /// Record voice activity
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// When the idle timeout will fire absent further activity
    #[must_use]
    pub fn deadline(&self) -> Instant {
        self.last_activity + self.timeout
    }

    /// Whether the timeout has elapsed as of `now`
    #[must_use]
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.deadline()
    }
}

/// Daily output counter with day rollover.
///
/// Counts characters of synthesized assistant output; per the shared-
/// resource policy this is connection-local state, not a process-wide
/// per-device ledger.
#[derive(Debug)]
pub struct OutputCounter {
    day: NaiveDate,
    chars: u64,
}

impl OutputCounter {
    /// Start counting for the given day
    #[must_use]
    pub const fn new(today: NaiveDate) -> Self {
        Self {
            day: today,
            chars: 0,
        }
    }

    /// Add output characters, rolling the counter over on a new day
    pub fn add(&mut self, chars: u64, today: NaiveDate) {
        self.roll_over(today);
        self.chars += chars;
    }

    /// Accumulated output for `today`
    pub fn total(&mut self, today: NaiveDate) -> u64 {
        self.roll_over(today);
        self.chars
    }

    /// Whether the cap is exhausted; a zero cap disables the quota
    pub fn is_exceeded(&mut self, cap: u64, today: NaiveDate) -> bool {
        if cap == 0 {
            return false;
        }
        self.total(today) >= cap
    }

    fn roll_over(&mut self, today: NaiveDate) {
        if today != self.day {
            tracing::debug!(previous_day = %self.day, "daily output counter reset");
            self.day = today;
            self.chars = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 8, d).unwrap()
    }

    #[test]
    fn counter_accumulates_within_a_day() {
        let mut counter = OutputCounter::new(day(1));
        counter.add(100, day(1));
        counter.add(50, day(1));
        assert_eq!(counter.total(day(1)), 150);
        assert!(counter.is_exceeded(150, day(1)));
        assert!(!counter.is_exceeded(151, day(1)));
    }

    #[test]
    fn counter_rolls_over_on_new_day() {
        let mut counter = OutputCounter::new(day(1));
        counter.add(500, day(1));
        assert_eq!(counter.total(day(2)), 0);
        counter.add(10, day(2));
        assert_eq!(counter.total(day(2)), 10);
    }

    #[test]
    fn zero_cap_disables_quota() {
        let mut counter = OutputCounter::new(day(1));
        counter.add(u64::MAX / 2, day(1));
        assert!(!counter.is_exceeded(0, day(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_timer_expires_after_timeout() {
        let mut timer = IdleTimer::new(Duration::from_secs(120));
        assert!(!timer.is_expired(Instant::now()));

        tokio::time::advance(Duration::from_secs(119)).await;
        assert!(!timer.is_expired(Instant::now()));
        timer.touch();
        tokio::time::advance(Duration::from_secs(119)).await;
        assert!(!timer.is_expired(Instant::now()));
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(timer.is_expired(Instant::now()));
    }
}
