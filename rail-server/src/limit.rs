//! Per-subject fixed-window rate limiting.
//!
//! Time is cut into windows of fixed length aligned to the Unix epoch. Each
//! subject may make `limit` requests per window; the counter resets when a
//! new window starts. A burst straddling a boundary can therefore see up to
//! twice the limit within one window length.

use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

/// Default requests per window.
const DEFAULT_LIMIT: u32 = 100;

/// Default window length (1 minute).
const DEFAULT_WINDOW_SECS: u64 = 60;

/// Rate limiter configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Requests allowed per subject per window
    pub limit: u32,
    /// Window length, in whole seconds
    pub window: Duration,
}

impl RateLimitConfig {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self { limit, window }
    }

    fn window_secs(&self) -> i64 {
        self.window.as_secs().max(1) as i64
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::new(DEFAULT_LIMIT, Duration::from_secs(DEFAULT_WINDOW_SECS))
    }
}

/// Outcome of a rate check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The request fits; `remaining` more are allowed this window
    Allowed { remaining: u32 },
    /// The window is used up until `retry_after` from now
    Rejected { retry_after: Duration },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }
}

#[derive(Debug, Clone, Copy)]
struct WindowCount {
    window_start: i64,
    count: u32,
}

/// Thread-safe per-subject request counter.
///
/// Counting is check-and-increment under the map's shard lock, so concurrent
/// requests from one subject never admit more than `limit` per window.
/// Entries for idle subjects are not removed; they are reset on next use.
#[derive(Debug)]
pub struct RateLimiter {
    windows: DashMap<String, WindowCount>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            windows: DashMap::new(),
            config,
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Count a request from `subject` against the current window.
    pub fn admit(&self, subject: &str) -> Decision {
        self.admit_at(subject, Utc::now())
    }

    /// Count a request from `subject` as of `now`.
    pub fn admit_at(&self, subject: &str, now: DateTime<Utc>) -> Decision {
        let now_secs = now.timestamp();
        let (window_start, retry_after) = window_bounds(now_secs, self.config.window_secs());

        let mut entry = self
            .windows
            .entry(subject.to_string())
            .or_insert(WindowCount {
                window_start,
                count: 0,
            });

        if entry.window_start != window_start {
            *entry = WindowCount {
                window_start,
                count: 0,
            };
        }

        if entry.count >= self.config.limit {
            return Decision::Rejected { retry_after };
        }

        entry.count += 1;
        Decision::Allowed {
            remaining: self.config.limit - entry.count,
        }
    }

    /// Number of subjects with a tracked window.
    pub fn tracked_subjects(&self) -> usize {
        self.windows.len()
    }
}

/// Start of the window containing `now_secs`, and the time left in it.
///
/// The remaining time is always between one second and the window length.
fn window_bounds(now_secs: i64, window_secs: i64) -> (i64, Duration) {
    let window_start = now_secs - now_secs.rem_euclid(window_secs);
    let remaining = window_start + window_secs - now_secs;
    (window_start, Duration::from_secs(remaining as u64))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use chrono::TimeZone;
    use proptest::prelude::*;

    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    // 2024-06-01T12:00:00Z, on a minute boundary
    const T0: i64 = 1_717_243_200;

    #[test]
    fn admits_up_to_limit() {
        let limiter = RateLimiter::new(RateLimitConfig::new(3, Duration::from_secs(60)));

        assert_eq!(
            limiter.admit_at("alice", at(T0)),
            Decision::Allowed { remaining: 2 }
        );
        assert_eq!(
            limiter.admit_at("alice", at(T0 + 1)),
            Decision::Allowed { remaining: 1 }
        );
        assert_eq!(
            limiter.admit_at("alice", at(T0 + 2)),
            Decision::Allowed { remaining: 0 }
        );
        assert_eq!(
            limiter.admit_at("alice", at(T0 + 20)),
            Decision::Rejected {
                retry_after: Duration::from_secs(40)
            }
        );
    }

    #[test]
    fn next_window_resets() {
        let limiter = RateLimiter::new(RateLimitConfig::new(2, Duration::from_secs(60)));

        limiter.admit_at("alice", at(T0 + 58));
        limiter.admit_at("alice", at(T0 + 59));
        assert!(!limiter.admit_at("alice", at(T0 + 59)).is_allowed());

        // First request of the new window counts as one
        assert_eq!(
            limiter.admit_at("alice", at(T0 + 60)),
            Decision::Allowed { remaining: 1 }
        );
    }

    #[test]
    fn boundary_burst_allows_twice_the_limit() {
        let limiter = RateLimiter::new(RateLimitConfig::new(5, Duration::from_secs(60)));

        let admitted = (0..10)
            .map(|i| limiter.admit_at("alice", at(T0 + 59 + i / 5)))
            .filter(Decision::is_allowed)
            .count();
        assert_eq!(admitted, 10);
    }

    #[test]
    fn subjects_are_independent() {
        let limiter = RateLimiter::new(RateLimitConfig::new(1, Duration::from_secs(60)));

        assert!(limiter.admit_at("alice", at(T0)).is_allowed());
        assert!(!limiter.admit_at("alice", at(T0)).is_allowed());
        assert!(limiter.admit_at("bob", at(T0)).is_allowed());
        assert_eq!(limiter.tracked_subjects(), 2);
    }

    #[test]
    fn retry_after_counts_down_to_window_end() {
        let limiter = RateLimiter::new(RateLimitConfig::new(1, Duration::from_secs(10)));
        limiter.admit_at("alice", at(T0));

        assert_eq!(
            limiter.admit_at("alice", at(T0 + 9)),
            Decision::Rejected {
                retry_after: Duration::from_secs(1)
            }
        );
    }

    #[test]
    fn concurrent_requests_never_exceed_limit() {
        let limit = 50;
        let limiter = Arc::new(RateLimiter::new(RateLimitConfig::new(
            limit,
            Duration::from_secs(3600),
        )));
        let admitted = Arc::new(AtomicU32::new(0));
        let now = at(T0 + 10);

        std::thread::scope(|scope| {
            for _ in 0..(2 * limit) {
                let limiter = limiter.clone();
                let admitted = admitted.clone();
                scope.spawn(move || {
                    if limiter.admit_at("alice", now).is_allowed() {
                        admitted.fetch_add(1, Ordering::SeqCst);
                    }
                });
            }
        });

        assert_eq!(admitted.load(Ordering::SeqCst), limit);
    }

    #[test]
    fn default_config() {
        let config = RateLimitConfig::default();
        assert_eq!(config.limit, 100);
        assert_eq!(config.window, Duration::from_secs(60));
    }

    proptest! {
        #[test]
        fn window_contains_now(now in -1_000_000_000i64..4_000_000_000, window in 1i64..86_400) {
            let (start, remaining) = window_bounds(now, window);

            prop_assert!(start <= now);
            prop_assert_eq!(start.rem_euclid(window), 0);
            prop_assert!(remaining >= Duration::from_secs(1));
            prop_assert!(remaining <= Duration::from_secs(window as u64));
            prop_assert_eq!(start + window, now + remaining.as_secs() as i64);
        }
    }
}
