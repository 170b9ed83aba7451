use crate::peak_tracker::PeakTracker;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Length of the quality window in seconds
    pub window_s: f64,
    /// Minimum time between score updates
    pub update_interval_ms: f64,
    /// Window peak-to-peak at or below which amplitude scores 0
    pub amplitude_floor: f64,
    /// Window peak-to-peak at or above which amplitude scores 1
    pub amplitude_ceiling: f64,
    /// Inter-peak CV at or above which stability scores 0
    pub cv_ceiling: f64,
    /// Peaks needed before stability is measured
    pub min_peaks: usize,
    /// Stability assigned until enough peaks exist
    pub unproven_stability: f64,
    pub clipped_penalty: f64,
    pub dark_penalty: f64,
    pub amplitude_weight: f64,
    pub stability_weight: f64,
    pub ok_threshold: f64,
    pub warn_threshold: f64,
    /// Amplitude score below which the user is told the pulse is weak
    pub weak_amplitude: f64,
    /// Stability score below which the user is told to hold still
    pub unstable: f64,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            window_s: 2.0,
            update_interval_ms: 300.0,
            amplitude_floor: 0.0035,
            amplitude_ceiling: 0.02,
            cv_ceiling: 0.25,
            min_peaks: 5,
            unproven_stability: 0.1,
            clipped_penalty: 0.65,
            dark_penalty: 0.75,
            amplitude_weight: 0.55,
            stability_weight: 0.45,
            ok_threshold: 70.0,
            warn_threshold: 40.0,
            weak_amplitude: 0.35,
            unstable: 0.5,
        }
    }
}

/// FIFO of the most recent conditioned samples.
#[derive(Debug, Clone)]
pub struct QualityWindow {
    capacity: usize,
    values: VecDeque<f64>,
}

impl QualityWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            values: VecDeque::with_capacity(capacity + 1),
        }
    }

    /// Sized to hold `window_s` seconds at `rate_hz`.
    pub fn for_duration(window_s: f64, rate_hz: f64) -> Self {
        Self::new((window_s * rate_hz).round() as usize)
    }

    pub fn push(&mut self, value: f64) {
        self.values.push_back(value);
        while self.values.len() > self.capacity {
            self.values.pop_front();
        }
    }

    pub fn peak_to_peak(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        let (min, max) = self
            .values
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        max - min
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityLevel {
    #[default]
    Idle,
    Ok,
    Warn,
    Bad,
}

/// Most pressing reason the signal is not good, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityIssue {
    Saturated,
    TooDark,
    LowAmplitude,
    Unstable,
}

impl QualityIssue {
    pub fn message(&self) -> &'static str {
        match self {
            QualityIssue::Saturated => {
                "Too much light: cover the whole lens and ease finger pressure"
            }
            QualityIssue::TooDark => "Too dark: cover both lens and flash with your fingertip",
            QualityIssue::LowAmplitude => "Weak pulse: press gently and steadily on the lens",
            QualityIssue::Unstable => "Irregular signal: hold your hand still",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct QualityScore {
    /// Composite score, 0-100
    pub score: f64,
    pub level: QualityLevel,
    pub amplitude: f64,
    pub stability: f64,
    pub penalty: f64,
    pub issue: Option<QualityIssue>,
}

impl QualityScore {
    /// User-facing status line.
    pub fn message(&self) -> &'static str {
        if let Some(issue) = self.issue {
            return issue.message();
        }
        match self.level {
            QualityLevel::Idle => "Waiting for signal",
            QualityLevel::Ok => "Good signal, keep still",
            QualityLevel::Warn => "Fair signal, keep still",
            QualityLevel::Bad => "Poor signal",
        }
    }
}

/// Linear map of window peak-to-peak into [0, 1].
pub fn amplitude_score(p2p: f64, floor: f64, ceiling: f64) -> f64 {
    if ceiling <= floor {
        return if p2p > floor { 1.0 } else { 0.0 };
    }
    ((p2p - floor) / (ceiling - floor)).clamp(0.0, 1.0)
}

/// Coefficient of variation (population std / mean).
pub fn coefficient_of_variation(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    if mean <= 0.0 {
        return None;
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    Some(variance.sqrt() / mean)
}

/// Throttled composite quality score.
#[derive(Debug, Clone)]
pub struct QualityEstimator {
    config: QualityConfig,
    last_update_ms: Option<f64>,
    current: QualityScore,
}

impl QualityEstimator {
    pub fn new(config: QualityConfig) -> Self {
        Self {
            config,
            last_update_ms: None,
            current: QualityScore::default(),
        }
    }

    pub fn config(&self) -> &QualityConfig {
        &self.config
    }

    pub fn current(&self) -> QualityScore {
        self.current
    }

    /// Recompute if the update interval has elapsed and the window is at
    /// least half full. Returns the new score when one was computed.
    pub fn maybe_update(
        &mut self,
        now_ms: f64,
        window: &QualityWindow,
        peaks: &PeakTracker,
        clipped: bool,
        too_dark: bool,
    ) -> Option<QualityScore> {
        if window.len() * 2 < window.capacity() {
            return None;
        }
        if let Some(last) = self.last_update_ms {
            if now_ms - last < self.config.update_interval_ms {
                return None;
            }
        }
        self.last_update_ms = Some(now_ms);
        self.current = self.evaluate(window, peaks, clipped, too_dark);
        debug!(
            "Quality {:.1} ({:?}) amp {:.2} stab {:.2} penalty {:.2}",
            self.current.score,
            self.current.level,
            self.current.amplitude,
            self.current.stability,
            self.current.penalty
        );
        Some(self.current)
    }

    /// Score the current state without touching the throttle.
    pub fn evaluate(
        &self,
        window: &QualityWindow,
        peaks: &PeakTracker,
        clipped: bool,
        too_dark: bool,
    ) -> QualityScore {
        let c = &self.config;
        let amplitude =
            amplitude_score(window.peak_to_peak(), c.amplitude_floor, c.amplitude_ceiling);
        let stability = self.stability_score(peaks);

        let mut penalty = 1.0;
        if clipped {
            penalty *= c.clipped_penalty;
        }
        if too_dark {
            penalty *= c.dark_penalty;
        }

        let blend = c.amplitude_weight * amplitude + c.stability_weight * stability;
        let score = (100.0 * penalty * blend).clamp(0.0, 100.0);

        let level = if score >= c.ok_threshold {
            QualityLevel::Ok
        } else if score >= c.warn_threshold {
            QualityLevel::Warn
        } else {
            QualityLevel::Bad
        };

        let issue = if clipped {
            Some(QualityIssue::Saturated)
        } else if too_dark {
            Some(QualityIssue::TooDark)
        } else if amplitude < c.weak_amplitude {
            Some(QualityIssue::LowAmplitude)
        } else if stability < c.unstable {
            Some(QualityIssue::Unstable)
        } else {
            None
        };

        QualityScore {
            score,
            level,
            amplitude,
            stability,
            penalty,
            issue,
        }
    }

    fn stability_score(&self, peaks: &PeakTracker) -> f64 {
        if peaks.len() < self.config.min_peaks {
            return self.config.unproven_stability;
        }
        match coefficient_of_variation(&peaks.intervals_ms()) {
            Some(cv) => (1.0 - cv / self.config.cv_ceiling).clamp(0.0, 1.0),
            None => self.config.unproven_stability,
        }
    }
}
