// Clock module
// Injectable time source used for stage timing


use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Monotonic time source. Readings are offsets from an arbitrary, fixed origin.
pub trait Clock: Send + Sync {
    /// Current reading of the clock
    fn now(&self) -> Duration;

    /// Milliseconds elapsed since an earlier reading of the same clock
    #[inline]
    fn millis_since(&self, earlier: Duration) -> f64 {
        self.now().saturating_sub(earlier).as_secs_f64() * 1000.0
    }
}

/// Wall-clock backed implementation using `Instant`
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    #[inline]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    #[inline]
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Deterministic clock that advances by a fixed step on every reading.
///
/// Useful for asserting exact stage timings without depending on the host scheduler.
#[derive(Debug)]
pub struct SteppingClock {
    step: Duration,
    current: Mutex<Duration>,
}

impl SteppingClock {
    #[inline]
    pub fn new(step: Duration) -> Self {
        Self {
            step,
            current: Mutex::new(Duration::ZERO),
        }
    }

    /// Number of readings taken so far
    #[inline]
    pub fn readings(&self) -> u32 {
        let current = *self
            .current
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if self.step.is_zero() {
            return 0;
        }
        (current.as_nanos() / self.step.as_nanos()) as u32
    }
}

impl Clock for SteppingClock {
    #[inline]
    fn now(&self) -> Duration {
        let mut current = self
            .current
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let reading = *current;
        *current += self.step;
        reading
    }
}
