// Per-stage timing against an injected clock

use std::collections::HashMap;
use std::time::Duration;

use super::errors::Stage;
use crate::clock::Clock;

/// Records one split per stage plus the span since the tracker was created
pub struct TimingTracker<'a> {
    clock: &'a dyn Clock,
    start: Duration,
    marks: HashMap<Stage, Duration>,
    splits: HashMap<Stage, f64>,
}

impl<'a> TimingTracker<'a> {
    #[inline]
    pub fn new(clock: &'a dyn Clock) -> Self {
        Self {
            clock,
            start: clock.now(),
            marks: HashMap::new(),
            splits: HashMap::new(),
        }
    }

    #[inline]
    pub fn mark(&mut self, stage: Stage) {
        self.marks.insert(stage, self.clock.now());
    }

    /// Close the split opened by `mark`; a stage that was never marked is ignored
    #[inline]
    pub fn stop(&mut self, stage: Stage) -> f64 {
        let Some(start) = self.marks.remove(&stage) else {
            return 0.0;
        };
        let elapsed = self.clock.millis_since(start);
        self.splits.insert(stage, elapsed);
        elapsed
    }

    /// Elapsed milliseconds for a stage, zero if it did not complete
    #[inline]
    pub fn split_ms(&self, stage: Stage) -> f64 {
        self.splits.get(&stage).copied().unwrap_or(0.0)
    }

    #[inline]
    pub fn total_ms(&self) -> f64 {
        self.clock.millis_since(self.start)
    }
}
