//! Deterministic camera for replay, simulation and tests.

use crate::frame_sampler::Frame;
use crate::illumination::TorchOutcome;
use crate::session::CameraDevice;
use log::debug;
use std::f64::consts::PI;

/// Camera whose frames are uniform red patches of a scripted intensity.
///
/// `signal(t_ms, torch_on)` gives the red mean (0-255) at time `t_ms`. Each
/// frame is dithered so its mean red matches the scripted value to within
/// one part in the pixel count.
pub struct SignalCamera<F> {
    signal: F,
    width: u32,
    height: u32,
    buffer: Vec<u8>,
    now_ms: f64,
    torch_supported: bool,
    torch_on: bool,
    pending: Option<bool>,
    requests: Vec<bool>,
    released: bool,
}

impl<F: FnMut(f64, bool) -> f64> SignalCamera<F> {
    pub fn new(signal: F) -> Self {
        Self {
            signal,
            width: 50,
            height: 50,
            buffer: Vec::new(),
            now_ms: 0.0,
            torch_supported: true,
            torch_on: false,
            pending: None,
            requests: Vec::new(),
            released: false,
        }
    }

    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_torch(mut self, supported: bool, initially_on: bool) -> Self {
        self.torch_supported = supported;
        self.torch_on = supported && initially_on;
        self
    }

    /// Advance the camera clock; the next frame renders the signal at `now_ms`.
    pub fn set_time(&mut self, now_ms: f64) {
        self.now_ms = now_ms;
    }

    /// Every torch state requested so far, in order.
    pub fn torch_requests(&self) -> &[bool] {
        &self.requests
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl<F: FnMut(f64, bool) -> f64> CameraDevice for SignalCamera<F> {
    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn latest_frame(&mut self) -> Option<Frame<'_>> {
        if self.released || self.width == 0 || self.height == 0 {
            return None;
        }
        let value = (self.signal)(self.now_ms, self.torch_on);
        let value = if value.is_finite() { value.clamp(0.0, 255.0) } else { 0.0 };

        let pixels = self.width as usize * self.height as usize;
        self.buffer.resize(pixels * 4, 0);
        let base = value.floor();
        let frac = value - base;
        let mut carry = 0.0;
        for pixel in self.buffer.chunks_exact_mut(4) {
            carry += frac;
            let red = if carry >= 1.0 {
                carry -= 1.0;
                base + 1.0
            } else {
                base
            };
            pixel.copy_from_slice(&[red.min(255.0) as u8, 0, 0, 255]);
        }

        Some(Frame::new(self.width, self.height, &self.buffer))
    }

    fn torch_supported(&self) -> bool {
        self.torch_supported
    }

    fn torch_enabled(&self) -> bool {
        self.torch_on
    }

    fn request_torch(&mut self, enabled: bool) {
        debug!("Torch {} requested at {:.0} ms", enabled, self.now_ms);
        self.requests.push(enabled);
        self.pending = Some(enabled);
    }

    fn poll_torch_outcome(&mut self) -> Option<TorchOutcome> {
        let enabled = self.pending.take()?;
        if self.torch_supported {
            self.torch_on = enabled;
            Some(TorchOutcome::Applied)
        } else {
            Some(TorchOutcome::Failed("torch not supported".to_string()))
        }
    }

    fn release(&mut self) {
        self.released = true;
    }
}

/// Sinusoidal pulse on a constant baseline.
#[derive(Debug, Clone, Copy)]
pub struct SinePulse {
    pub baseline: f64,
    pub amplitude: f64,
    pub bpm: f64,
}

impl SinePulse {
    pub fn at(&self, t_ms: f64) -> f64 {
        let freq_hz = self.bpm / 60.0;
        self.baseline + self.amplitude * (2.0 * PI * freq_hz * t_ms / 1000.0).sin()
    }
}

/// Step-hold lookup into a time-sorted `(t_ms, value)` series: the last
/// value at or before `t_ms`, or the first value before the series starts.
pub fn step_hold(series: &[(f64, f64)], t_ms: f64) -> f64 {
    let idx = series.partition_point(|(t, _)| *t <= t_ms);
    match idx.checked_sub(1).and_then(|i| series.get(i)).or(series.first()) {
        Some((_, value)) => *value,
        None => f64::NAN,
    }
}
