//! Real-time AC/DC separation and the single-pole filter stages it is built from.
//!
//! The same filter primitives are reused by the post-session batch pass in
//! [`crate::preprocessing`], either with fixed smoothing factors (here) or
//! with factors derived from a cutoff frequency and the estimated sample rate.

use serde::Deserialize;
use std::f64::consts::PI;

/// First-order high-pass: `y <- a * (y + x - x_prev)`.
#[derive(Debug, Clone)]
pub struct SinglePoleHighPass {
    alpha: f64,
    prev_input: Option<f64>,
    state: f64,
}

impl SinglePoleHighPass {
    pub fn with_alpha(alpha: f64) -> Self {
        Self {
            alpha,
            prev_input: None,
            state: 0.0,
        }
    }

    /// RC high-pass with the given -3 dB cutoff at sample rate `fs`.
    pub fn from_cutoff(cutoff_hz: f64, fs: f64) -> Self {
        let rc = 1.0 / (2.0 * PI * cutoff_hz);
        let dt = 1.0 / fs;
        Self::with_alpha(rc / (rc + dt))
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn process(&mut self, x: f64) -> f64 {
        // First input only primes the previous tap
        let prev = self.prev_input.unwrap_or(x);
        self.state = self.alpha * (self.state + x - prev);
        self.prev_input = Some(x);
        self.state
    }
}

/// First-order low-pass: `y <- y + a * (x - y)`.
#[derive(Debug, Clone)]
pub struct SinglePoleLowPass {
    alpha: f64,
    state: f64,
}

impl SinglePoleLowPass {
    pub fn with_alpha(alpha: f64) -> Self {
        Self { alpha, state: 0.0 }
    }

    /// RC low-pass with the given -3 dB cutoff at sample rate `fs`.
    pub fn from_cutoff(cutoff_hz: f64, fs: f64) -> Self {
        let rc = 1.0 / (2.0 * PI * cutoff_hz);
        let dt = 1.0 / fs;
        Self::with_alpha(dt / (rc + dt))
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn process(&mut self, x: f64) -> f64 {
        self.state += self.alpha * (x - self.state);
        self.state
    }
}

/// Exponentially weighted baseline of the raw intensity (the DC component).
#[derive(Debug, Clone)]
pub struct BaselineTracker {
    alpha: f64,
    dc: Option<f64>,
}

impl BaselineTracker {
    pub fn new(alpha: f64) -> Self {
        Self { alpha, dc: None }
    }

    /// Starts at the first observed value, then `dc <- (1-a)*dc + a*x`.
    pub fn update(&mut self, x: f64) -> f64 {
        let dc = match self.dc {
            None => x,
            Some(dc) => (1.0 - self.alpha) * dc + self.alpha * x,
        };
        self.dc = Some(dc);
        dc
    }

    pub fn dc(&self) -> Option<f64> {
        self.dc
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConditioningConfig {
    /// Baseline smoothing factor; small so the pulse itself is not tracked
    pub dc_alpha: f64,
    /// Baseline at or below which normalisation yields exactly zero
    pub dc_floor: f64,
    pub hp_alpha: f64,
    pub lp_alpha: f64,
    /// Symmetric bound applied to the low-pass output
    pub clamp: f64,
}

impl Default for ConditioningConfig {
    fn default() -> Self {
        Self {
            dc_alpha: 0.02,
            dc_floor: 1.0,
            hp_alpha: 0.96,
            lp_alpha: 0.18,
            clamp: 0.06,
        }
    }
}

/// Intermediate values of one pass through the chain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Conditioned {
    pub dc: f64,
    pub ac: f64,
    pub norm: f64,
    /// Clamped low-pass output, the archived sample
    pub value: f64,
}

/// Per-tick conditioning of the red mean into a normalised pulse sample.
#[derive(Debug, Clone)]
pub struct OnlineConditioner {
    config: ConditioningConfig,
    baseline: BaselineTracker,
    high_pass: SinglePoleHighPass,
    low_pass: SinglePoleLowPass,
}

impl OnlineConditioner {
    pub fn new(config: ConditioningConfig) -> Self {
        Self {
            baseline: BaselineTracker::new(config.dc_alpha),
            high_pass: SinglePoleHighPass::with_alpha(config.hp_alpha),
            low_pass: SinglePoleLowPass::with_alpha(config.lp_alpha),
            config,
        }
    }

    /// Run one red-mean sample through baseline, normalise, HP, LP and clamp.
    ///
    /// Non-finite input leaves every filter tap untouched and comes back as a
    /// NaN sample, to be repaired by batch cleaning.
    pub fn push(&mut self, red_mean: f64) -> Conditioned {
        if !red_mean.is_finite() {
            return Conditioned {
                dc: self.baseline.dc().unwrap_or(f64::NAN),
                ac: f64::NAN,
                norm: f64::NAN,
                value: f64::NAN,
            };
        }

        let dc = self.baseline.update(red_mean);
        let ac = red_mean - dc;
        let norm = normalise(ac, dc, self.config.dc_floor);
        let hp = self.high_pass.process(norm);
        let lp = self.low_pass.process(hp);
        let value = lp.clamp(-self.config.clamp, self.config.clamp);

        Conditioned { dc, ac, norm, value }
    }

    pub fn dc(&self) -> Option<f64> {
        self.baseline.dc()
    }
}

/// `ac / dc`, or exactly zero when the baseline is at or below `floor`.
pub fn normalise(ac: f64, dc: f64, floor: f64) -> f64 {
    if dc > floor {
        ac / dc
    } else {
        0.0
    }
}
