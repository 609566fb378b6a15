//! A sliding-window throttle for socket reads and writes.

use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

use crate::config::RateLimitConfig;

/// Bounds the bytes moved in one direction of a connection.
///
/// The limiter keeps the `(time, bytes)` samples recorded during the last
/// window. [`RateLimiter::next_chunk`] returns how much the caller may move
/// now, and [`RateLimiter::record`] must be called with the amount actually
/// moved.
///
/// Over any interval of one window, recorded bytes never exceed the window
/// capacity, as long as callers never move more than `next_chunk` allows.
#[derive(Debug)]
pub struct RateLimiter {
    capacity: u64,
    window: Duration,
    max_chunk: u64,
    smoothing_fraction: f64,

    samples: VecDeque<(Instant, u64)>,
    /// The sum of the bytes in `samples`.
    in_window: u64,
    /// Set by smoothing: no bytes are released before this time.
    resume_at: Option<Instant>,
}

impl RateLimiter {
    /// Returns a limiter with the limits in `config`.
    pub fn new(config: &RateLimitConfig) -> RateLimiter {
        let capacity = config.bytes_per_window.max(1);
        let max_chunk = ((capacity as f64 * config.max_chunk_fraction) as u64).clamp(1, capacity);

        RateLimiter {
            capacity,
            window: config.window,
            max_chunk,
            smoothing_fraction: config.smoothing_fraction,
            samples: VecDeque::new(),
            in_window: 0,
            resume_at: None,
        }
    }

    /// Returns the most bytes any single chunk may have.
    pub fn max_chunk(&self) -> u64 {
        self.max_chunk
    }

    /// Returns the number of bytes the caller may move at `now`.
    ///
    /// Zero means the caller must wait until [`RateLimiter::available_at`].
    pub fn next_chunk(&mut self, now: Instant) -> u64 {
        self.prune(now);

        if self.resume_at.map_or(false, |resume_at| now < resume_at) {
            return 0;
        }

        self.capacity
            .saturating_sub(self.in_window)
            .min(self.max_chunk)
    }

    /// Records that `bytes` were moved at `now`.
    pub fn record(&mut self, now: Instant, bytes: u64) {
        if bytes == 0 {
            return;
        }
        self.prune(now);

        self.samples.push_back((now, bytes));
        self.in_window += bytes;

        if self.smoothing_fraction > 0.0 {
            let transfer_time = self
                .window
                .mul_f64(bytes as f64 / self.capacity as f64);
            self.resume_at = Some(now + transfer_time.mul_f64(self.smoothing_fraction));
        }
    }

    /// Returns the earliest time at which [`RateLimiter::next_chunk`] can be
    /// non-zero.
    pub fn available_at(&mut self, now: Instant) -> Instant {
        self.prune(now);

        let window_frees = if self.in_window < self.capacity {
            now
        } else {
            // A full window always has at least one sample.
            self.samples
                .front()
                .map_or(now, |&(recorded, _)| recorded + self.window)
        };

        match self.resume_at {
            Some(resume_at) => window_frees.max(resume_at),
            None => window_frees,
        }
    }

    /// Returns the bytes recorded during the window ending at `now`.
    pub fn in_window(&mut self, now: Instant) -> u64 {
        self.prune(now);
        self.in_window
    }

    /// Drops samples that are a whole window old.
    fn prune(&mut self, now: Instant) {
        while let Some(&(recorded, bytes)) = self.samples.front() {
            if now.saturating_duration_since(recorded) < self.window {
                break;
            }
            self.samples.pop_front();
            self.in_window -= bytes;
        }
    }
}

#[cfg(test)]
mod tests;
