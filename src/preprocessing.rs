use crate::conditioning::{SinglePoleHighPass, SinglePoleLowPass};
use log::debug;
use serde::Deserialize;

/// Parameters of the post-session refinement pass.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Clip to median +/- k * MAD
    pub mad_k: f64,
    /// Moving-average detrend window in seconds
    pub detrend_window_s: f64,
    pub high_pass_hz: f64,
    pub low_pass_hz: f64,
    /// Winsorization limit in standard deviations
    pub winsor_z: f64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            mad_k: 8.0,
            detrend_window_s: 1.75,
            high_pass_hz: 0.6,
            low_pass_hz: 4.2,
            winsor_z: 5.0,
        }
    }
}

/// Timestamps needed before the measured rate is trusted over the nominal one.
const MIN_TIMESTAMPS_FOR_RATE: usize = 10;

/// Estimate the true sample rate (Hz) from capture timestamps in milliseconds.
///
/// Falls back to `nominal_hz` for short captures or degenerate timing.
pub fn estimate_sampling_rate(timestamps_ms: &[f64], nominal_hz: f64) -> f64 {
    if timestamps_ms.len() <= MIN_TIMESTAMPS_FOR_RATE {
        return nominal_hz;
    }
    let deltas: Vec<f64> = timestamps_ms
        .windows(2)
        .map(|w| (w[1] - w[0]) / 1000.0)
        .collect();
    let mean_dt = deltas.iter().sum::<f64>() / deltas.len() as f64;

    if mean_dt > 0.0 && mean_dt.is_finite() {
        1.0 / mean_dt
    } else {
        nominal_hz
    }
}

/// Replace non-finite values with the last finite value before them.
///
/// Leading non-finite values take the first finite value of the series;
/// a series with no finite value at all becomes zeros. Returns how many
/// values were replaced.
pub fn carry_forward_non_finite(data: &mut [f64]) -> usize {
    let mut last = data.iter().copied().find(|x| x.is_finite()).unwrap_or(0.0);
    let mut replaced = 0;
    for value in data.iter_mut() {
        if value.is_finite() {
            last = *value;
        } else {
            *value = last;
            replaced += 1;
        }
    }
    replaced
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Clip values further than `k` median absolute deviations from the median.
pub fn mad_clamp(data: &mut [f64], k: f64) {
    if data.is_empty() {
        return;
    }
    let center = median(data);
    let deviations: Vec<f64> = data.iter().map(|x| (x - center).abs()).collect();
    let mad = median(&deviations);
    if mad <= 0.0 {
        return;
    }
    let (lower, upper) = (center - k * mad, center + k * mad);
    for value in data.iter_mut() {
        *value = value.clamp(lower, upper);
    }
}

/// Subtract a centred moving average of `window` samples.
pub fn moving_average_detrend(data: &[f64], window: usize) -> Vec<f64> {
    let half = window.max(1) / 2;
    let mut prefix = Vec::with_capacity(data.len() + 1);
    prefix.push(0.0);
    for x in data {
        prefix.push(prefix[prefix.len() - 1] + x);
    }

    (0..data.len())
        .map(|i| {
            let start = i.saturating_sub(half);
            let end = (i + half + 1).min(data.len());
            let mean = (prefix[end] - prefix[start]) / (end - start) as f64;
            data[i] - mean
        })
        .collect()
}

fn mean_std(data: &[f64]) -> (f64, f64) {
    let n = data.len() as f64;
    if n == 0.0 {
        return (0.0, 0.0);
    }
    let mean = data.iter().sum::<f64>() / n;
    let variance = data.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

/// Clamp to `mean +/- z_limit * std`.
pub fn winsorize(data: &mut [f64], z_limit: f64) {
    let (mean, std) = mean_std(data);
    if std <= 0.0 {
        return;
    }
    let (lower, upper) = (mean - z_limit * std, mean + z_limit * std);
    for value in data.iter_mut() {
        *value = value.clamp(lower, upper);
    }
}

/// Normalise to zero mean and unit variance; a flat series becomes all zeros.
pub fn z_score(data: &mut [f64]) {
    let (mean, std) = mean_std(data);
    for value in data.iter_mut() {
        *value = if std > 0.0 { (*value - mean) / std } else { 0.0 };
    }
}

/// Full post-session refinement of the archived conditioned samples.
///
/// The output has the same length as the input and contains only finite values.
pub fn refine(samples: &[f64], sampling_rate: f64, config: &BatchConfig) -> Vec<f64> {
    let mut data = samples.to_vec();
    if data.is_empty() {
        return data;
    }

    let replaced = carry_forward_non_finite(&mut data);
    if replaced > 0 {
        debug!("Carried forward {} non-finite samples", replaced);
    }

    mad_clamp(&mut data, config.mad_k);

    let window = (config.detrend_window_s * sampling_rate).round().max(1.0) as usize;
    debug!("Detrend window: {} samples at {:.2} Hz", window, sampling_rate);
    let detrended = moving_average_detrend(&data, window);

    let mut high_pass = SinglePoleHighPass::from_cutoff(config.high_pass_hz, sampling_rate);
    let mut low_pass = SinglePoleLowPass::from_cutoff(config.low_pass_hz, sampling_rate);
    debug!(
        "Batch filter alphas: hp {:.4}, lp {:.4}",
        high_pass.alpha(),
        low_pass.alpha()
    );
    let mut filtered: Vec<f64> = detrended
        .iter()
        .map(|&x| low_pass.process(high_pass.process(x)))
        .collect();

    winsorize(&mut filtered, config.winsor_z);
    z_score(&mut filtered);
    filtered
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    #[test]
    fn sampling_rate_from_timestamps() {
        let ts: Vec<f64> = (0..100).map(|i| i as f64 * 40.0).collect();
        assert_relative_eq!(estimate_sampling_rate(&ts, 30.0), 25.0, epsilon = 1e-9);
    }

    #[test]
    fn sampling_rate_falls_back_to_nominal() {
        let short: Vec<f64> = (0..10).map(|i| i as f64 * 40.0).collect();
        assert_eq!(estimate_sampling_rate(&short, 30.0), 30.0);
        assert_eq!(estimate_sampling_rate(&[5.0; 20], 30.0), 30.0);
    }

    #[test]
    fn nan_takes_previous_value() {
        let mut data = vec![0.1, 0.2, f64::NAN, 0.4];
        assert_eq!(carry_forward_non_finite(&mut data), 1);
        assert_eq!(data, vec![0.1, 0.2, 0.2, 0.4]);
    }

    #[test]
    fn leading_and_all_non_finite_series() {
        let mut leading = vec![f64::NAN, f64::INFINITY, 0.3, f64::NEG_INFINITY];
        assert_eq!(carry_forward_non_finite(&mut leading), 3);
        assert_eq!(leading, vec![0.3, 0.3, 0.3, 0.3]);

        let mut none = vec![f64::NAN; 3];
        carry_forward_non_finite(&mut none);
        assert_eq!(none, vec![0.0; 3]);
    }

    #[test]
    fn mad_clamp_limits_spikes() {
        let mut data = vec![1.0, 2.0, 3.0, 2.0, 1.0, 2.0, 100.0];
        mad_clamp(&mut data, 8.0);
        // median 2, MAD 1
        assert_eq!(data[6], 10.0);
        assert_eq!(&data[..6], &[1.0, 2.0, 3.0, 2.0, 1.0, 2.0]);
    }

    #[test]
    fn detrend_removes_a_ramp() {
        let ramp: Vec<f64> = (0..100).map(|i| i as f64 * 0.5).collect();
        let out = moving_average_detrend(&ramp, 9);
        for value in &out[5..95] {
            assert!(value.abs() < 1e-9);
        }
    }

    #[test]
    fn winsorize_and_z_score() {
        let mut data: Vec<f64> = (0..200).map(|i| (i % 7) as f64).collect();
        data[50] = 1000.0;
        winsorize(&mut data, 5.0);
        assert!(data[50] < 1000.0);

        z_score(&mut data);
        let (mean, std) = mean_std(&data);
        assert_relative_eq!(mean, 0.0, epsilon = 1e-9);
        assert_relative_eq!(std, 1.0, epsilon = 1e-9);

        let mut flat = vec![3.0; 10];
        z_score(&mut flat);
        assert_eq!(flat, vec![0.0; 10]);
    }

    #[test]
    fn refine_keeps_length_and_finiteness() {
        let fs = 30.0;
        let mut samples: Vec<f64> = (0..900)
            .map(|i| 0.02 * (2.0 * PI * 1.2 * i as f64 / fs).sin() + 0.001 * i as f64)
            .collect();
        samples[400] = f64::NAN;
        samples[401] = f64::INFINITY;

        let refined = refine(&samples, fs, &BatchConfig::default());
        assert_eq!(refined.len(), samples.len());
        assert!(refined.iter().all(|x| x.is_finite()));
        let (mean, std) = mean_std(&refined);
        assert_relative_eq!(mean, 0.0, epsilon = 1e-9);
        assert_relative_eq!(std, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn refine_of_empty_series() {
        assert!(refine(&[], 30.0, &BatchConfig::default()).is_empty());
    }
}
