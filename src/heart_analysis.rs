use log::{debug, trace};
use rustfft::{num_complex::Complex, FftPlanner};
use std::f64::consts::PI;

/// Lowest pulse rate reported by the preview
pub const MIN_BPM: f64 = 40.0;
/// Highest pulse rate reported by the preview
pub const MAX_BPM: f64 = 180.0;

/// Create a Hann window of the specified size
fn create_hann_window(size: usize) -> Vec<f64> {
    (0..size)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f64 / size as f64).cos()))
        .collect()
}

/// Magnitude spectrum of the Hann-windowed signal, first half only.
fn magnitude_spectrum(signal: &[f64]) -> Vec<f64> {
    let window = create_hann_window(signal.len());

    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(signal.len());

    let mut buffer: Vec<Complex<f64>> = signal
        .iter()
        .zip(window.iter())
        .map(|(&s, &w)| Complex::new(s * w, 0.0))
        .collect();
    fft.process(&mut buffer);

    buffer
        .iter()
        .take(signal.len() / 2)
        .map(|c| c.norm())
        .collect()
}

/// Dominant pulse rate of a refined camera series, in beats per minute.
///
/// Strongest local maximum of the spectrum between `MIN_BPM` and `MAX_BPM`.
/// This is a preview for the user; HRV metrics come from the backend.
pub fn estimate_pulse_rate(signal: &[f64], sample_rate: f64) -> Option<f64> {
    if signal.len() < 4 || !sample_rate.is_finite() || sample_rate <= 0.0 {
        return None;
    }
    if signal.iter().any(|v| !v.is_finite()) {
        debug!("Skipping pulse preview, series has non-finite samples");
        return None;
    }

    let spectrum = magnitude_spectrum(signal);
    let freq_resolution = sample_rate / signal.len() as f64;

    let min_bin = ((MIN_BPM / 60.0) / freq_resolution).ceil().max(1.0) as usize;
    let max_bin = ((MAX_BPM / 60.0) / freq_resolution).floor() as usize;
    let max_bin = max_bin.min(spectrum.len().saturating_sub(2));
    if min_bin > max_bin {
        trace!(
            "Series too short for a pulse preview ({} samples at {:.1} Hz)",
            signal.len(),
            sample_rate
        );
        return None;
    }

    // Find the strongest local maximum in the pulse band
    let mut best: Option<(usize, f64)> = None;
    for bin in min_bin..=max_bin {
        let magnitude = spectrum[bin];
        if magnitude > spectrum[bin - 1] && magnitude > spectrum[bin + 1] {
            match best {
                Some((_, m)) if m >= magnitude => {}
                _ => best = Some((bin, magnitude)),
            }
        }
    }

    let (bin, magnitude) = best?;

    // Must be at least 20% of the strongest non-DC component
    let strongest = spectrum.iter().skip(1).fold(0.0_f64, |acc, &m| acc.max(m));
    if magnitude < strongest * 0.2 {
        debug!(
            "No dominant pulse component ({:.3} vs strongest {:.3})",
            magnitude, strongest
        );
        return None;
    }

    let bpm = bin as f64 * freq_resolution * 60.0;
    debug!("Pulse preview {:.1} bpm (bin {}, magnitude {:.3})", bpm, bin, magnitude);
    Some(bpm)
}

/// Mean heart rate implied by a series of RR intervals.
pub fn mean_heart_rate(rr_intervals_ms: &[f64]) -> Option<f64> {
    let valid: Vec<f64> = rr_intervals_ms
        .iter()
        .copied()
        .filter(|rr| rr.is_finite() && *rr > 0.0)
        .collect();
    if valid.is_empty() {
        return None;
    }
    let mean_rr = valid.iter().sum::<f64>() / valid.len() as f64;
    Some(60_000.0 / mean_rr)
}
