//! Token-bucket admission control.
//!
//! Sits at the engine boundary: every public operation takes one token
//! before entering the pipeline, and over-limit requests are rejected
//! up front rather than queued.

use std::time::Instant;

/// A token bucket with a fixed refill rate and burst capacity.
#[derive(Debug)]
pub struct TokenBucket {
    /// Maximum tokens the bucket can hold (burst size).
    capacity: f64,

    /// Tokens currently available.
    tokens: f64,

    /// Refill rate in tokens per second.
    refill_per_sec: f64,

    /// Last refill instant.
    last_refill: Instant,
}

impl TokenBucket {
    /// Creates a full bucket refilling at `rate_per_sec`, holding at most
    /// `burst` tokens.
    pub fn new(rate_per_sec: f64, burst: usize) -> Self {
        let capacity = burst.max(1) as f64;
        Self {
            capacity,
            tokens: capacity,
            refill_per_sec: rate_per_sec,
            last_refill: Instant::now(),
        }
    }

    /// Takes one token if available. Returns `false` when the bucket is
    /// empty — the caller should reject the request.
    pub fn try_acquire(&mut self) -> bool {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.last_refill = now;
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
    }

    /// Tokens currently available (after refill).
    pub fn available(&mut self) -> f64 {
        self.refill();
        self.tokens
    }
}
