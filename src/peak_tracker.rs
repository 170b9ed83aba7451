use log::trace;
use serde::Deserialize;
use std::collections::VecDeque;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PeakConfig {
    /// Minimum spacing between peaks (320 ms caps the rate near 187 bpm)
    pub refractory_ms: f64,
    /// Quality-window peak-to-peak range a peak needs to count
    pub min_amplitude: f64,
    /// Number of recent peaks retained
    pub history: usize,
}

impl Default for PeakConfig {
    fn default() -> Self {
        Self {
            refractory_ms: 320.0,
            min_amplitude: 0.004,
            history: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeakEvent {
    pub timestamp_ms: f64,
}

/// Local-maximum detector over the conditioned stream.
///
/// Only feeds periodicity statistics to the quality score; beat detection
/// for HRV happens on the backend.
#[derive(Debug, Clone)]
pub struct PeakTracker {
    config: PeakConfig,
    prev2: Option<f64>,
    prev1: Option<(f64, f64)>,
    history: VecDeque<PeakEvent>,
}

impl PeakTracker {
    pub fn new(config: PeakConfig) -> Self {
        Self {
            history: VecDeque::with_capacity(config.history + 1),
            config,
            prev2: None,
            prev1: None,
        }
    }

    /// Push one conditioned sample. `window_p2p` is the current quality
    /// window's peak-to-peak range. Returns the peak declared at the
    /// previous sample, if any.
    pub fn push(&mut self, value: f64, timestamp_ms: f64, window_p2p: f64) -> Option<PeakEvent> {
        let candidate = match (self.prev2, self.prev1) {
            (Some(v2), Some((v1, t1))) if v1 > v2 && v1 > value => Some(t1),
            _ => None,
        };
        self.prev2 = self.prev1.map(|(v, _)| v);
        self.prev1 = Some((value, timestamp_ms));

        let timestamp_ms = candidate?;
        if window_p2p <= self.config.min_amplitude {
            trace!("Peak at {:.0} ms below amplitude gate", timestamp_ms);
            return None;
        }
        if let Some(last) = self.history.back() {
            if timestamp_ms - last.timestamp_ms <= self.config.refractory_ms {
                trace!("Peak at {:.0} ms inside refractory period", timestamp_ms);
                return None;
            }
        }

        let event = PeakEvent { timestamp_ms };
        self.history.push_back(event);
        while self.history.len() > self.config.history {
            self.history.pop_front();
        }
        Some(event)
    }

    pub fn events(&self) -> impl Iterator<Item = &PeakEvent> {
        self.history.iter()
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Spacing between consecutive retained peaks, in milliseconds.
    pub fn intervals_ms(&self) -> Vec<f64> {
        self.history
            .iter()
            .zip(self.history.iter().skip(1))
            .map(|(a, b)| b.timestamp_ms - a.timestamp_ms)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(tracker: &mut PeakTracker, samples: &[(f64, f64)]) -> Vec<f64> {
        samples
            .iter()
            .filter_map(|&(t, v)| tracker.push(v, t, 0.05))
            .map(|e| e.timestamp_ms)
            .collect()
    }

    #[test]
    fn detects_a_local_maximum() {
        let mut tracker = PeakTracker::new(PeakConfig::default());
        let peaks = feed(&mut tracker, &[(0.0, 0.0), (33.0, 0.02), (66.0, 0.01)]);
        assert_eq!(peaks, vec![33.0]);
    }

    #[test]
    fn plateaus_are_not_peaks() {
        let mut tracker = PeakTracker::new(PeakConfig::default());
        let peaks = feed(
            &mut tracker,
            &[(0.0, 0.0), (33.0, 0.02), (66.0, 0.02), (100.0, 0.0)],
        );
        assert!(peaks.is_empty());
    }

    #[test]
    fn close_maxima_register_once() {
        let mut tracker = PeakTracker::new(PeakConfig::default());
        let peaks = feed(
            &mut tracker,
            &[
                (0.0, 0.0),
                (100.0, 0.03),
                (133.0, 0.0),
                (266.0, 0.03),
                (300.0, 0.0),
            ],
        );
        assert_eq!(peaks, vec![100.0]);
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn amplitude_gate_rejects_wiggles() {
        let mut tracker = PeakTracker::new(PeakConfig::default());
        tracker.push(0.0, 0.0, 0.001);
        tracker.push(0.001, 33.0, 0.001);
        assert_eq!(tracker.push(0.0, 66.0, 0.001), None);
        assert!(tracker.is_empty());
    }

    #[test]
    fn history_is_bounded_and_ordered() {
        let mut tracker = PeakTracker::new(PeakConfig::default());
        for beat in 0..25 {
            let t = beat as f64 * 800.0;
            tracker.push(0.0, t, 0.05);
            tracker.push(0.03, t + 33.0, 0.05);
            tracker.push(0.0, t + 66.0, 0.05);
        }
        assert_eq!(tracker.len(), 10);
        let intervals = tracker.intervals_ms();
        assert_eq!(intervals.len(), 9);
        assert!(intervals.iter().all(|&i| (i - 800.0).abs() < 1e-9));
        let times: Vec<f64> = tracker.events().map(|e| e.timestamp_ms).collect();
        assert!(times.windows(2).all(|w| w[1] > w[0]));
    }
}
