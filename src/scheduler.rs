use log::trace;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Processing rate, independent of the display refresh rate
    pub target_hz: f64,
    /// Catch-up bound per display callback
    pub max_steps_per_callback: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            target_hz: 30.0,
            max_steps_per_callback: 2,
        }
    }
}

/// Fixed-period accumulator that turns display callbacks into processing steps.
#[derive(Debug, Clone)]
pub struct FixedRateScheduler {
    period_ms: f64,
    max_steps: usize,
    accumulator_ms: f64,
    last_callback_ms: Option<f64>,
}

impl FixedRateScheduler {
    pub fn new(config: &SchedulerConfig) -> Self {
        Self {
            period_ms: 1000.0 / config.target_hz,
            max_steps: config.max_steps_per_callback.max(1),
            accumulator_ms: 0.0,
            last_callback_ms: None,
        }
    }

    pub fn period_ms(&self) -> f64 {
        self.period_ms
    }

    /// Account for the time since the previous callback and return how many
    /// processing steps to run now.
    ///
    /// A stall longer than `max_steps` periods drops the excess backlog
    /// instead of bursting through it on later callbacks.
    pub fn advance(&mut self, now_ms: f64) -> usize {
        let elapsed = match self.last_callback_ms {
            Some(last) => (now_ms - last).max(0.0),
            None => 0.0,
        };
        self.last_callback_ms = Some(now_ms);
        self.accumulator_ms += elapsed;

        let mut steps = 0;
        while self.accumulator_ms >= self.period_ms && steps < self.max_steps {
            self.accumulator_ms -= self.period_ms;
            steps += 1;
        }
        if self.accumulator_ms >= self.period_ms {
            trace!(
                "Dropping {:.1} ms of processing backlog",
                self.accumulator_ms - self.accumulator_ms % self.period_ms
            );
            self.accumulator_ms %= self.period_ms;
        }
        steps
    }
}
