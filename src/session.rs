//! Camera capture session: owns every piece of per-session pipeline state
//! and drives it from display callbacks.
//!
//! A session is created ready to run (device producing frames, all filters
//! reset) and torn down by `stop`. Nothing in a tick blocks: torch changes are
//! handed to the device and their outcome is collected on a later callback.

use crate::backend::ComputeRequest;
use crate::config::PipelineConfig;
use crate::conditioning::{Conditioned, OnlineConditioner};
use crate::error::CaptureError;
use crate::frame_sampler::{Frame, FrameSampler};
use crate::illumination::{IlluminationController, TorchOutcome};
use crate::peak_tracker::PeakTracker;
use crate::preprocessing::{estimate_sampling_rate, refine, BatchConfig};
use crate::quality::{QualityEstimator, QualityScore, QualityWindow};
use crate::scheduler::FixedRateScheduler;
use chrono::{DateTime, Utc};
use log::{debug, info, trace};
use serde::Deserialize;
use std::time::Duration;

/// Host camera with an optional torch.
///
/// Torch requests are fire-and-forget: `request_torch` must return
/// immediately and the result is reported through `poll_torch_outcome`.
pub trait CameraDevice {
    /// Current video dimensions; zero while the stream is not producing video.
    fn dimensions(&self) -> (u32, u32);

    /// Most recent RGBA frame, if one is available.
    fn latest_frame(&mut self) -> Option<Frame<'_>>;

    /// Whether the device exposes a torch at all. Queried once per session.
    fn torch_supported(&self) -> bool;

    fn torch_enabled(&self) -> bool;

    fn request_torch(&mut self, enabled: bool);

    /// Outcome of the last torch request, once the device has one.
    fn poll_torch_outcome(&mut self) -> Option<TorchOutcome>;

    /// Stop the stream and give up the device handle.
    fn release(&mut self);
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Selected measurement length; non-positive disables auto-stop
    pub duration_minutes: f64,
    /// How long to wait for the first non-empty frame
    pub ready_timeout_ms: u64,
    pub ready_poll_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            duration_minutes: 3.0,
            ready_timeout_ms: 4000,
            ready_poll_ms: 50,
        }
    }
}

/// One non-blocking readiness check, for hosts that drive their own timer.
///
/// Returns the dimensions once the device reports non-zero video, `None` while
/// it is still starting. Once `elapsed_ms` reaches the timeout the device is
/// released and `NoFrames` is returned.
pub fn poll_ready<D: CameraDevice>(
    device: &mut D,
    config: &SessionConfig,
    elapsed_ms: u64,
) -> Result<Option<(u32, u32)>, CaptureError> {
    let (width, height) = device.dimensions();
    if width > 0 && height > 0 {
        debug!("Camera ready at {}x{} after {} ms", width, height, elapsed_ms);
        return Ok(Some((width, height)));
    }
    if elapsed_ms >= config.ready_timeout_ms {
        device.release();
        return Err(CaptureError::NoFrames {
            timeout_ms: config.ready_timeout_ms,
        });
    }
    Ok(None)
}

/// Poll the device until it reports non-zero dimensions.
///
/// Sleeps the calling thread between polls, so this is for native hosts only.
/// Single-threaded hosts such as wasm32 call `poll_ready` from their own
/// timer and then `CaptureSession::from_ready`.
pub fn wait_until_ready<D: CameraDevice>(
    device: &mut D,
    config: &SessionConfig,
) -> Result<(u32, u32), CaptureError> {
    let poll_ms = config.ready_poll_ms.max(1);
    let mut waited_ms = 0;
    loop {
        if let Some(dimensions) = poll_ready(device, config, waited_ms)? {
            return Ok(dimensions);
        }
        std::thread::sleep(Duration::from_millis(poll_ms));
        waited_ms += poll_ms;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickStatus {
    Continue,
    /// The session is no longer measuring; call `stop` to collect the series.
    Finished,
}

/// Archived signal of a finished camera session.
#[derive(Debug, Clone)]
pub struct CapturedSeries {
    /// Conditioned samples, NaN where a frame could not be read
    pub samples: Vec<f64>,
    pub timestamps_ms: Vec<f64>,
    pub started_at: DateTime<Utc>,
    pub duration_minutes: f64,
    pub nominal_rate_hz: f64,
}

impl CapturedSeries {
    pub fn sampling_rate(&self) -> f64 {
        estimate_sampling_rate(&self.timestamps_ms, self.nominal_rate_hz)
    }

    pub fn refined(&self, config: &BatchConfig) -> Vec<f64> {
        refine(&self.samples, self.sampling_rate(), config)
    }

    pub fn to_compute_request(&self, config: &BatchConfig) -> ComputeRequest {
        ComputeRequest::camera(self.duration_minutes, self.refined(config), self.sampling_rate())
    }
}

pub struct CaptureSession<D: CameraDevice> {
    device: D,
    sampler: FrameSampler,
    illumination: IlluminationController,
    conditioner: OnlineConditioner,
    window: QualityWindow,
    peaks: PeakTracker,
    quality: QualityEstimator,
    scheduler: FixedRateScheduler,
    samples: Vec<f64>,
    timestamps_ms: Vec<f64>,
    started_at: DateTime<Utc>,
    first_callback_ms: Option<f64>,
    duration_minutes: f64,
    nominal_rate_hz: f64,
    measuring: bool,
    stopped: bool,
}

impl<D: CameraDevice> CaptureSession<D> {
    /// Wait for the device to produce video and set up fresh pipeline state.
    pub fn start(mut device: D, config: &PipelineConfig) -> Result<Self, CaptureError> {
        let dimensions = wait_until_ready(&mut device, &config.session)?;
        Ok(Self::from_ready(device, dimensions, config))
    }

    /// Set up fresh pipeline state around a device already known to be
    /// producing video at `(width, height)`.
    pub fn from_ready(device: D, (width, height): (u32, u32), config: &PipelineConfig) -> Self {
        let torch_available = device.torch_supported();
        let torch_enabled = device.torch_enabled();
        info!(
            "Capture started: {}x{}, torch {}, {} min",
            width,
            height,
            if torch_available { "available" } else { "unavailable" },
            config.session.duration_minutes
        );

        Self {
            device,
            sampler: FrameSampler::new(config.sampler.clone()),
            illumination: IlluminationController::new(
                config.illumination.clone(),
                torch_available,
                torch_enabled,
            ),
            conditioner: OnlineConditioner::new(config.conditioning.clone()),
            window: QualityWindow::for_duration(
                config.quality.window_s,
                config.scheduler.target_hz,
            ),
            peaks: PeakTracker::new(config.peaks.clone()),
            quality: QualityEstimator::new(config.quality.clone()),
            scheduler: FixedRateScheduler::new(&config.scheduler),
            samples: Vec::new(),
            timestamps_ms: Vec::new(),
            started_at: Utc::now(),
            first_callback_ms: None,
            duration_minutes: config.session.duration_minutes,
            nominal_rate_hz: config.scheduler.target_hz,
            measuring: true,
            stopped: false,
        }
    }

    /// Display-callback entry point. Runs as many processing steps as the
    /// scheduler allows and never waits on the device.
    pub fn on_display_callback(&mut self, now_ms: f64) -> TickStatus {
        if !self.measuring {
            return TickStatus::Finished;
        }

        if let Some(outcome) = self.device.poll_torch_outcome() {
            self.illumination.complete_request(now_ms, outcome);
        }

        let first = *self.first_callback_ms.get_or_insert(now_ms);
        if self.duration_minutes > 0.0 && now_ms - first >= self.duration_minutes * 60_000.0 {
            info!("Measurement duration reached after {} samples", self.samples.len());
            self.measuring = false;
            return TickStatus::Finished;
        }

        let steps = self.scheduler.advance(now_ms);
        for _ in 0..steps {
            self.step(now_ms);
        }
        TickStatus::Continue
    }

    fn step(&mut self, now_ms: f64) {
        let red_mean = match self.device.latest_frame() {
            Some(frame) => self.sampler.sample(&frame).unwrap_or(f64::NAN),
            None => f64::NAN,
        };
        self.process_sample(red_mean, now_ms);
    }

    /// Run one red-mean sample through illumination control, conditioning,
    /// archiving, peak tracking and quality scoring.
    ///
    /// Non-finite samples are archived as NaN so both arrays stay the same
    /// length, but they reach neither the window nor the peak tracker.
    pub fn process_sample(&mut self, red_mean: f64, now_ms: f64) -> Conditioned {
        let timestamp_ms = match self.timestamps_ms.last() {
            Some(&last) if now_ms < last => last,
            _ => now_ms,
        };

        if red_mean.is_finite() {
            if let Some(enabled) = self.illumination.observe(red_mean, timestamp_ms) {
                self.device.request_torch(enabled);
            }
        }

        let conditioned = self.conditioner.push(red_mean);
        self.samples.push(conditioned.value);
        self.timestamps_ms.push(timestamp_ms);
        trace!(
            "t={:.1} red={:.2} dc={:.2} value={:.5}",
            timestamp_ms,
            red_mean,
            conditioned.dc,
            conditioned.value
        );

        if conditioned.value.is_finite() {
            self.window.push(conditioned.value);
            if let Some(peak) =
                self.peaks
                    .push(conditioned.value, timestamp_ms, self.window.peak_to_peak())
            {
                trace!("Peak at {:.1} ms", peak.timestamp_ms);
            }
        }

        self.quality.maybe_update(
            timestamp_ms,
            &self.window,
            &self.peaks,
            self.illumination.is_clipped(),
            self.illumination.is_too_dark(),
        );

        conditioned
    }

    /// End the session and release the camera. Only the first call returns
    /// the captured series; later calls do nothing.
    pub fn stop(&mut self) -> Option<CapturedSeries> {
        if self.stopped {
            return None;
        }
        self.stopped = true;
        self.measuring = false;
        self.device.release();
        info!("Capture stopped with {} samples", self.samples.len());

        Some(CapturedSeries {
            samples: std::mem::take(&mut self.samples),
            timestamps_ms: std::mem::take(&mut self.timestamps_ms),
            started_at: self.started_at,
            duration_minutes: self.duration_minutes,
            nominal_rate_hz: self.nominal_rate_hz,
        })
    }

    pub fn is_measuring(&self) -> bool {
        self.measuring
    }

    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    pub fn timestamps_ms(&self) -> &[f64] {
        &self.timestamps_ms
    }

    pub fn quality(&self) -> QualityScore {
        self.quality.current()
    }

    pub fn peaks(&self) -> &PeakTracker {
        &self.peaks
    }

    pub fn illumination(&self) -> &IlluminationController {
        &self.illumination
    }

    pub fn baseline(&self) -> Option<f64> {
        self.conditioner.dc()
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }
}

impl<D: CameraDevice> Drop for CaptureSession<D> {
    fn drop(&mut self) {
        if !self.stopped {
            self.device.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::SignalCamera;

    fn constant_camera(value: f64) -> SignalCamera<impl FnMut(f64, bool) -> f64> {
        SignalCamera::new(move |_, _| value)
    }

    #[test]
    fn arrays_stay_parallel_and_monotonic() {
        let mut session =
            CaptureSession::start(constant_camera(128.0), &PipelineConfig::default()).unwrap();
        for (i, t) in [0.0, 40.0, 30.0, 90.0].iter().enumerate() {
            session.process_sample(if i == 1 { f64::NAN } else { 128.0 }, *t);
        }
        assert_eq!(session.samples().len(), session.timestamps_ms().len());
        assert_eq!(session.timestamps_ms(), &[0.0, 40.0, 40.0, 90.0]);
        assert!(session.samples()[1].is_nan());
    }

    #[test]
    fn stop_is_idempotent_and_releases() {
        let mut session =
            CaptureSession::start(constant_camera(128.0), &PipelineConfig::default()).unwrap();
        session.on_display_callback(0.0);
        session.on_display_callback(100.0);
        let series = session.stop().unwrap();
        assert_eq!(series.samples.len(), series.timestamps_ms.len());
        assert!(session.device().is_released());
        assert!(session.stop().is_none());
        assert_eq!(session.on_display_callback(200.0), TickStatus::Finished);
    }

    #[test]
    fn no_frames_times_out_and_releases() {
        let mut config = PipelineConfig::default();
        config.session.ready_timeout_ms = 20;
        config.session.ready_poll_ms = 5;
        let mut camera = constant_camera(128.0).with_dimensions(0, 0);
        let err = wait_until_ready(&mut camera, &config.session).unwrap_err();
        assert!(matches!(err, CaptureError::NoFrames { timeout_ms: 20 }));
        assert!(camera.is_released());
    }

    #[test]
    fn host_driven_readiness_never_blocks() {
        let config = SessionConfig::default();
        let mut camera = constant_camera(128.0).with_dimensions(0, 0);
        assert_eq!(poll_ready(&mut camera, &config, 0).unwrap(), None);
        assert_eq!(poll_ready(&mut camera, &config, 3950).unwrap(), None);
        assert!(!camera.is_released());
        assert!(matches!(
            poll_ready(&mut camera, &config, 4000),
            Err(CaptureError::NoFrames { timeout_ms: 4000 })
        ));
        assert!(camera.is_released());

        let mut camera = constant_camera(128.0);
        let dimensions = poll_ready(&mut camera, &config, 0).unwrap().unwrap();
        let mut session =
            CaptureSession::from_ready(camera, dimensions, &PipelineConfig::default());
        session.on_display_callback(0.0);
        assert_eq!(session.on_display_callback(40.0), TickStatus::Continue);
        assert_eq!(session.samples().len(), 1);
    }

    #[test]
    fn duration_auto_stop() {
        let mut config = PipelineConfig::default();
        config.session.duration_minutes = 0.01; // 600 ms
        let mut session = CaptureSession::start(constant_camera(128.0), &config).unwrap();
        let mut t = 0.0;
        while session.on_display_callback(t) == TickStatus::Continue {
            t += 1000.0 / 60.0;
            assert!(t < 1000.0);
        }
        assert!(t >= 600.0);
        assert!(!session.is_measuring());
        let series = session.stop().unwrap();
        assert!((17..=19).contains(&series.samples.len()), "{}", series.samples.len());
    }

    #[test]
    fn few_timestamps_fall_back_to_nominal_rate() {
        let series = CapturedSeries {
            samples: vec![0.0; 5],
            timestamps_ms: vec![0.0, 50.0, 100.0, 150.0, 200.0],
            started_at: Utc::now(),
            duration_minutes: 3.0,
            nominal_rate_hz: 30.0,
        };
        assert_eq!(series.sampling_rate(), 30.0);
    }
}
