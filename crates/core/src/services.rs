//! Injected time and randomness
//!
//! The protocol state machines never read the system clock or an entropy
//! source directly. They go through these ports so tests can drive them
//! deterministically.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Monotonic millisecond clock
pub trait Clock {
    fn now_ms(&self) -> u64;
}

/// Source of random 64-bit identifiers
pub trait IdSource {
    fn random_u64(&mut self) -> u64;
}

/// Milliseconds since this clock was created
#[derive(Debug, Clone, Copy)]
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
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// Hand-driven clock. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start_ms)),
        }
    }

    pub fn set(&self, ms: u64) {
        self.now.store(ms, Ordering::SeqCst);
    }

    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Entropy-seeded ids
pub struct RandomIds {
    rng: StdRng,
}

impl RandomIds {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for RandomIds {
    fn default() -> Self {
        Self::new()
    }
}

impl IdSource for RandomIds {
    fn random_u64(&mut self) -> u64 {
        self.rng.gen()
    }
}

/// Counts up from a fixed start
#[derive(Debug, Clone)]
pub struct SequenceIds {
    next: u64,
}

impl SequenceIds {
    pub fn starting_at(first: u64) -> Self {
        Self { next: first }
    }
}

impl IdSource for SequenceIds {
    fn random_u64(&mut self) -> u64 {
        let id = self.next;
        self.next = self.next.wrapping_add(1);
        id
    }
}
