//! Token-bucket rate limiting and a concurrent-connection cap.
//!
//! Both are used on the RPC side of the gate. The bucket refills from
//! elapsed time at acquisition; there is no background refill task.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// A token-bucket rate limiter.
pub struct RateLimiter {
    state: Mutex<BucketState>,
    rate: f64,
    capacity: f64,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    /// Build a limiter admitting `rate` operations per second with a
    /// burst of `burst`.
    pub fn new(rate: f64, burst: u32) -> Self {
        let capacity = f64::from(burst).max(1.0);
        Self {
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
            rate: rate.max(0.0),
            capacity,
        }
    }

    /// Take one token if available.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock().expect("limiter lock");
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.rate).min(self.capacity);
        state.last_refill = now;
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Hard cap on concurrent connections, RAII-released.
pub struct ConnectionLimiter {
    max: usize,
    active: Arc<AtomicUsize>,
}

/// Permit held for a connection's lifetime.
pub struct ConnectionPermit {
    active: Arc<AtomicUsize>,
}

impl ConnectionLimiter {
    /// Build a limiter allowing `max` concurrent connections.
    pub fn new(max: usize) -> Self {
        Self {
            max,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Claim a slot, or `None` when the cap is reached.
    pub fn acquire(&self) -> Option<ConnectionPermit> {
        let mut current = self.active.load(Ordering::Acquire);
        loop {
            if current >= self.max {
                return None;
            }
            match self.active.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    return Some(ConnectionPermit {
                        active: self.active.clone(),
                    })
                }
                Err(observed) => current = observed,
            }
        }
    }

    /// Connections currently held.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }
}

impl Drop for ConnectionPermit {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::AcqRel);
    }
}
