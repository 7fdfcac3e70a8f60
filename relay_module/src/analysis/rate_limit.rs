use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::Serialize;

pub const DEFAULT_REQUESTS_PER_MINUTE: u32 = 8;
pub const DEFAULT_REQUESTS_PER_DAY: u32 = 450;

const MINUTE: Duration = Duration::from_secs(60);
const DAY: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitStatus {
    pub requests_this_minute: u32,
    pub requests_today: u32,
    pub rpm_limit: u32,
    pub rpd_limit: u32,
}

#[derive(Debug)]
struct Windows {
    minute_started: Instant,
    minute_count: u32,
    day_started: Instant,
    day_count: u32,
}

impl Windows {
    fn roll(&mut self, now: Instant) {
        if now.saturating_duration_since(self.minute_started) >= MINUTE {
            self.minute_started = now;
            self.minute_count = 0;
        }
        if now.saturating_duration_since(self.day_started) >= DAY {
            self.day_started = now;
            self.day_count = 0;
        }
    }
}

/// Fixed-window request counters for the model API.
#[derive(Debug)]
pub struct RateLimiter {
    per_minute: u32,
    per_day: u32,
    windows: Mutex<Windows>,
}

impl RateLimiter {
    pub fn new(per_minute: u32, per_day: u32) -> Self {
        let now = Instant::now();
        Self {
            per_minute,
            per_day,
            windows: Mutex::new(Windows {
                minute_started: now,
                minute_count: 0,
                day_started: now,
                day_count: 0,
            }),
        }
    }

    fn windows(&self) -> MutexGuard<'_, Windows> {
        self.windows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Counts one request if both windows have room.
    pub fn try_acquire(&self) -> bool {
        self.try_acquire_at(Instant::now())
    }

    fn try_acquire_at(&self, now: Instant) -> bool {
        let mut windows = self.windows();
        windows.roll(now);
        if windows.minute_count >= self.per_minute || windows.day_count >= self.per_day {
            return false;
        }
        windows.minute_count += 1;
        windows.day_count += 1;
        true
    }

    pub fn status(&self) -> RateLimitStatus {
        let mut windows = self.windows();
        windows.roll(Instant::now());
        RateLimitStatus {
            requests_this_minute: windows.minute_count,
            requests_today: windows.day_count,
            rpm_limit: self.per_minute,
            rpd_limit: self.per_day,
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_REQUESTS_PER_MINUTE, DEFAULT_REQUESTS_PER_DAY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minute_limit_blocks_until_window_rolls() {
        let limiter = RateLimiter::new(2, 100);
        let start = Instant::now();
        assert!(limiter.try_acquire_at(start));
        assert!(limiter.try_acquire_at(start));
        assert!(!limiter.try_acquire_at(start + Duration::from_secs(59)));
        assert!(limiter.try_acquire_at(start + MINUTE));
    }

    #[test]
    fn day_limit_applies_across_minutes() {
        let limiter = RateLimiter::new(10, 3);
        let start = Instant::now();
        for minute in 0..3 {
            assert!(limiter.try_acquire_at(start + MINUTE * minute));
        }
        assert!(!limiter.try_acquire_at(start + MINUTE * 5));
        assert!(limiter.try_acquire_at(start + DAY));
    }

    #[test]
    fn status_reports_counts_and_limits() {
        let limiter = RateLimiter::default();
        assert!(limiter.try_acquire());
        let status = limiter.status();
        assert_eq!(status.requests_this_minute, 1);
        assert_eq!(status.requests_today, 1);
        assert_eq!(status.rpm_limit, DEFAULT_REQUESTS_PER_MINUTE);
        assert_eq!(status.rpd_limit, DEFAULT_REQUESTS_PER_DAY);
    }
}
