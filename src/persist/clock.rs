//! Clock Abstraction
//!
//! Task expiry is detected lazily at read time, never by a background
//! timer, so "now" must be an explicit input. The trait keeps production
//! code on real time and lets tests drive virtual time deterministically.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Clock trait for time observations
///
/// Implementations:
/// - `SystemClock`: real system time
/// - `SimulatedClock`: controlled virtual time for tests
pub trait Clock: Send + Sync + Clone + 'static {
    /// Current Unix time in milliseconds
    fn now_ms(&self) -> u64;
}

/// Production clock using real system time
#[derive(Debug, Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("system time before Unix epoch")
            .as_millis() as u64
    }
}

/// Simulated clock for deterministic testing
///
/// Time only advances when explicitly told to.
#[derive(Debug, Clone)]
pub struct SimulatedClock {
    time_ms: Arc<AtomicU64>,
}

impl SimulatedClock {
    /// Create a new simulated clock starting at the given time
    pub fn new(start_ms: u64) -> Self {
        SimulatedClock {
            time_ms: Arc::new(AtomicU64::new(start_ms)),
        }
    }

    /// Advance time by milliseconds
    pub fn advance_ms(&self, ms: u64) {
        self.time_ms.fetch_add(ms, Ordering::SeqCst);
    }

    /// Set time to a specific value
    pub fn set(&self, time_ms: u64) {
        self.time_ms.store(time_ms, Ordering::SeqCst);
    }
}

impl Default for SimulatedClock {
    fn default() -> Self {
        Self::new(0)
    }
}

impl Clock for SimulatedClock {
    fn now_ms(&self) -> u64 {
        self.time_ms.load(Ordering::SeqCst)
    }
}
