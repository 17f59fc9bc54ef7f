//! Time and randomness sources for the pipeline.
//!
//! Production uses a monotonic clock and the thread-local RNG. Tests and
//! offline simulation inject deterministic ones.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub trait Clock: Send + Sync {
    /// Monotonic nanoseconds.
    fn now_ns(&self) -> u64;
}

pub trait RandomSource: Send + Sync {
    fn next_u32(&self) -> u32;

    fn next_u64(&self) -> u64 {
        (u64::from(self.next_u32()) << 32) | u64::from(self.next_u32())
    }
}

// ── Production ────────────────────────────────────────────────────────────────

/// Nanoseconds since the clock was created.
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ns(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }
}

pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn next_u32(&self) -> u32 {
        rand::thread_rng().gen()
    }

    fn next_u64(&self) -> u64 {
        rand::thread_rng().gen()
    }
}

// ── Deterministic ─────────────────────────────────────────────────────────────

/// A clock that only moves when told to.
#[derive(Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start_ns: u64) -> Self {
        Self {
            now: AtomicU64::new(start_ns),
        }
    }

    pub fn set(&self, ns: u64) {
        self.now.store(ns, Ordering::SeqCst);
    }

    pub fn advance(&self, ns: u64) {
        self.now.fetch_add(ns, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ns(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Reproducible pseudo-random stream.
pub struct SeededRandom {
    rng: Mutex<StdRng>,
}

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl RandomSource for SeededRandom {
    fn next_u32(&self) -> u32 {
        match self.rng.lock() {
            Ok(mut rng) => rng.gen(),
            Err(poisoned) => poisoned.into_inner().gen(),
        }
    }
}

/// Replays a fixed list of values, cycling.
pub struct FixedSequence {
    values: Vec<u64>,
    pos: AtomicUsize,
}

impl FixedSequence {
    pub fn new(values: Vec<u64>) -> Self {
        Self {
            values,
            pos: AtomicUsize::new(0),
        }
    }

    fn next(&self) -> u64 {
        if self.values.is_empty() {
            return 0;
        }
        let i = self.pos.fetch_add(1, Ordering::Relaxed);
        self.values[i % self.values.len()]
    }
}

impl RandomSource for FixedSequence {
    fn next_u32(&self) -> u32 {
        self.next() as u32
    }

    fn next_u64(&self) -> u64 {
        self.next()
    }
}
