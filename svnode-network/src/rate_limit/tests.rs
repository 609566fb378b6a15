use std::{
    env,
    time::{Duration, Instant},
};

use proptest::prelude::*;

use crate::config::RateLimitConfig;

use super::RateLimiter;

/// The number of test cases to use for rate limiter properties.
const DEFAULT_PROPTEST_CASES: u32 = 256;

#[test]
fn chunks_are_capped_and_window_fills() {
    svnode_test::init();

    let mut limiter = RateLimiter::new(&RateLimitConfig::new(1000, Duration::from_secs(1)));
    let start = Instant::now();

    assert_eq!(limiter.max_chunk(), 100);
    for _ in 0..10 {
        assert_eq!(limiter.next_chunk(start), 100);
        limiter.record(start, 100);
    }

    assert_eq!(limiter.next_chunk(start), 0);
    assert_eq!(limiter.in_window(start), 1000);
    assert_eq!(limiter.available_at(start), start + Duration::from_secs(1));

    // Just before the window ends, nothing has expired.
    let almost = start + Duration::from_millis(999);
    assert_eq!(limiter.next_chunk(almost), 0);

    let later = start + Duration::from_secs(1);
    assert_eq!(limiter.next_chunk(later), 100);
    assert_eq!(limiter.in_window(later), 0);
}

#[test]
fn partial_window_limits_the_chunk() {
    svnode_test::init();

    let mut limiter = RateLimiter::new(&RateLimitConfig::new(1000, Duration::from_secs(1)));
    let start = Instant::now();

    limiter.record(start, 950);
    assert_eq!(limiter.next_chunk(start), 50);
    assert_eq!(limiter.available_at(start), start);
}

#[test]
fn overdrawn_window_releases_nothing() {
    svnode_test::init();

    let mut limiter = RateLimiter::new(&RateLimitConfig::new(100, Duration::from_secs(10)));
    let start = Instant::now();

    // A caller that moved more than it was allowed to.
    limiter.record(start, 150);
    assert_eq!(limiter.next_chunk(start), 0);
    assert_eq!(limiter.in_window(start), 150);
    assert_eq!(limiter.available_at(start), start + Duration::from_secs(10));

    let later = start + Duration::from_secs(10);
    assert_eq!(limiter.next_chunk(later), 10);
}

#[test]
fn tiny_windows_still_release_bytes() {
    svnode_test::init();

    let mut limiter = RateLimiter::new(&RateLimitConfig::new(5, Duration::from_millis(10)));
    assert_eq!(limiter.max_chunk(), 1);
    assert_eq!(limiter.next_chunk(Instant::now()), 1);
}

#[test]
fn smoothing_pauses_after_each_chunk() {
    svnode_test::init();

    let config = RateLimitConfig {
        smoothing_fraction: 0.5,
        ..RateLimitConfig::new(1000, Duration::from_secs(1))
    };
    let mut limiter = RateLimiter::new(&config);
    let start = Instant::now();

    limiter.record(start, 100);

    // 100 bytes take 100ms at the configured rate, and half of that is paused.
    let resume = start + Duration::from_millis(50);
    assert_eq!(limiter.next_chunk(start + Duration::from_millis(49)), 0);
    assert_eq!(limiter.available_at(start), resume);
    assert_eq!(limiter.next_chunk(resume), 100);
}

proptest! {
    // Set the PROPTEST_CASES env var to override this default.
    #![proptest_config(proptest::test_runner::Config::with_cases(env::var("PROPTEST_CASES")
                                                                 .ok()
                                                                 .and_then(|v| v.parse().ok())
                                                                 .unwrap_or(DEFAULT_PROPTEST_CASES)))]

    /// Callers that move at most `next_chunk` bytes never exceed the window capacity.
    #[test]
    fn window_capacity_is_never_exceeded(
        capacity in 1..10_000u64,
        window_ms in 1..1_000u64,
        max_chunk_fraction in 0.01..=1.0f64,
        smoothing_fraction in prop_oneof![Just(0.0), 0.0..=1.0f64],
        steps in prop::collection::vec((0..200u64, 0.0..=1.0f64), 1..200),
    ) {
        svnode_test::init();

        let window = Duration::from_millis(window_ms);
        let config = RateLimitConfig {
            bytes_per_window: capacity,
            window,
            max_chunk_fraction,
            smoothing_fraction,
        };
        let mut limiter = RateLimiter::new(&config);

        let mut now = Instant::now();
        let mut history: Vec<(Instant, u64)> = Vec::new();

        for (advance_ms, used_fraction) in steps {
            now += Duration::from_millis(advance_ms);

            let chunk = limiter.next_chunk(now);
            prop_assert!(chunk <= limiter.max_chunk());

            // Callers may move less than they were allowed.
            let moved = (chunk as f64 * used_fraction) as u64;
            limiter.record(now, moved);
            if moved > 0 {
                history.push((now, moved));
            }

            let recent: u64 = history
                .iter()
                .filter(|(recorded, _)| now.duration_since(*recorded) < window)
                .map(|(_, bytes)| bytes)
                .sum();
            prop_assert!(recent <= capacity, "{recent} bytes in one window, capacity {capacity}");
            prop_assert_eq!(limiter.in_window(now), recent);
        }
    }

    /// Waiting until `available_at` always makes progress.
    #[test]
    fn available_at_releases_bytes(
        capacity in 1..10_000u64,
        window_ms in 1..1_000u64,
        smoothing_fraction in 0.0..=1.0f64,
        records in prop::collection::vec(0..200u64, 1..50),
    ) {
        svnode_test::init();

        let config = RateLimitConfig {
            smoothing_fraction,
            ..RateLimitConfig::new(capacity, Duration::from_millis(window_ms))
        };
        let mut limiter = RateLimiter::new(&config);
        let mut now = Instant::now();

        for _ in records {
            let chunk = limiter.next_chunk(now);
            if chunk == 0 {
                now = limiter.available_at(now);
                prop_assert!(limiter.next_chunk(now) > 0);
            } else {
                limiter.record(now, chunk);
            }
        }
    }
}
