//! Monotonic timestamp assignment for order submission.
//!
//! Price-time priority depends on `Order::timestamp` being strictly
//! increasing across one engine's lifetime — two orders submitted back to
//! back must never tie, even if the wall clock hasn't ticked forward
//! between them (a real risk at sub-microsecond submission rates). This
//! wraps `Utc::now()` with a compare-and-swap ratchet that bumps by one
//! nanosecond whenever the wall clock would otherwise repeat or go backward.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, Ordering};

/// Hands out strictly increasing [`DateTime<Utc>`] timestamps.
pub struct MonotonicClock {
    last_nanos: AtomicI64,
}

impl MonotonicClock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_nanos: AtomicI64::new(i64::MIN),
        }
    }

    /// Returns a timestamp strictly greater than every timestamp this clock
    /// has previously returned.
    pub fn now(&self) -> DateTime<Utc> {
        loop {
            let wall = Utc::now().timestamp_nanos_opt().unwrap_or(i64::MIN);
            let last = self.last_nanos.load(Ordering::Acquire);
            let candidate = if wall > last { wall } else { last + 1 };
            if self
                .last_nanos
                .compare_exchange_weak(last, candidate, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                let secs = candidate.div_euclid(1_000_000_000);
                let nsecs = candidate.rem_euclid(1_000_000_000) as u32;
                return DateTime::from_timestamp(secs, nsecs).unwrap_or_else(Utc::now);
            }
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}
