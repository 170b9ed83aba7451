use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{debug, info};
use pulse_capture::backend::{
    ComputeRequest, ComputeResponse, ComputeResult, HrvBackend, HttpBackend, SaveRequest,
    SubjectInfo,
};
use pulse_capture::ble::{BleSensor, RrRecorder};
use pulse_capture::config::{Args, CaptureOptions, Command, PipelineConfig};
use pulse_capture::data_loading::{read_frame_csv, read_notification_log};
use pulse_capture::heart_analysis::{estimate_pulse_rate, mean_heart_rate};
use pulse_capture::output::{write_metrics_json, write_session_csv};
use pulse_capture::session::{CaptureSession, TickStatus};
use pulse_capture::synthetic::{step_hold, SignalCamera, SinePulse};
use pulse_capture::SensorType;
use std::path::Path;
use std::time::Duration;

/// Rate at which the drivers fire display callbacks
const DISPLAY_HZ: f64 = 60.0;

fn main() -> Result<()> {
    // Initialize logger
    env_logger::init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };
    let timeout = Duration::from_secs(args.timeout_secs);

    match args.command {
        Command::Replay { csv, capture } => {
            let records = read_frame_csv(&csv)?;
            let (first, last) = match (records.first(), records.last()) {
                (Some(first), Some(last)) => (first.timestamp_ms, last.timestamp_ms),
                _ => bail!("{} contains no frame records", csv.display()),
            };
            println!("Replaying {} frames from {}", records.len(), csv.display());

            // Recorded intensities do not react to the torch
            let series: Vec<(f64, f64)> = records
                .iter()
                .map(|r| (r.timestamp_ms - first, r.red_mean))
                .collect();
            let camera =
                SignalCamera::new(move |t, _| step_hold(&series, t)).with_torch(false, false);

            apply_capture_options(&mut config, &capture);
            run_camera(camera, &config, &capture, last - first, &args.backend_url, timeout)
        }
        Command::Simulate {
            bpm,
            amplitude,
            baseline,
            torch_boost,
            torch_on,
            seconds,
            capture,
        } => {
            let pulse = SinePulse {
                baseline,
                amplitude,
                bpm,
            };
            println!(
                "Simulating {:.0} bpm pulse (baseline {:.0}, amplitude {:.1}) for {:.0} s",
                bpm, baseline, amplitude, seconds
            );
            let camera = SignalCamera::new(move |t, torch| {
                pulse.at(t) + if torch { torch_boost } else { 0.0 }
            })
            .with_torch(true, torch_on);

            apply_capture_options(&mut config, &capture);
            run_camera(
                camera,
                &config,
                &capture,
                seconds * 1000.0,
                &args.backend_url,
                timeout,
            )
        }
        Command::Rr {
            log,
            sensor,
            duration,
            disconnect_after,
            submit,
            metrics_output,
        } => {
            let payloads = read_notification_log(&log)?;
            let intervals = record_rr(sensor, &payloads, disconnect_after);

            println!("Captured {} RR intervals from {:?}", intervals.len(), sensor);
            if let Some(hr) = mean_heart_rate(&intervals) {
                println!("Mean heart rate: {:.1} bpm", hr);
            }

            if submit {
                if intervals.is_empty() {
                    bail!("No RR intervals captured, nothing to submit");
                }
                let backend = HttpBackend::new(args.backend_url.as_str(), timeout)?;
                let result = backend.compute(&ComputeRequest::rr(sensor, duration, intervals));
                report_result(&result);
                if let Some(path) = metrics_output {
                    write_metrics_json(&path, result.body())?;
                }
            }
            Ok(())
        }
        Command::Save {
            metrics,
            student_id,
            age,
            comorbidities,
            notes,
        } => {
            let text = std::fs::read_to_string(&metrics)
                .with_context(|| format!("Failed to read {}", metrics.display()))?;
            let body: serde_json::Value = serde_json::from_str(&text)
                .with_context(|| format!("{} is not valid JSON", metrics.display()))?;
            let result = ComputeResult::from_body(body);

            let subject = SubjectInfo {
                student_id,
                age,
                comorbidities,
                notes,
            };
            let request = SaveRequest::new(subject, &result)?;
            let backend = HttpBackend::new(args.backend_url.as_str(), timeout)?;
            let response = backend.save(&request)?;
            if response.ok {
                println!("Saved");
            } else {
                bail!("Backend did not confirm the save");
            }
            Ok(())
        }
    }
}

fn apply_capture_options(config: &mut PipelineConfig, capture: &CaptureOptions) {
    if let Some(duration) = capture.duration {
        config.session.duration_minutes = duration;
    }
    if let Some(torch) = capture.torch {
        config.illumination.mode = torch.into();
    }
    debug!("Pipeline config: {:?}", config);
}

fn record_rr(sensor: BleSensor, payloads: &[Vec<u8>], disconnect_after: Option<usize>) -> Vec<f64> {
    let mut recorder = RrRecorder::start(sensor);
    for (i, payload) in payloads.iter().enumerate() {
        if disconnect_after == Some(i) {
            recorder.on_disconnect();
        }
        recorder.on_notification(payload);
    }
    if let Some(status) = recorder.status() {
        println!("{}", status);
    }
    recorder.stop().unwrap_or_default()
}

fn run_camera<F: FnMut(f64, bool) -> f64>(
    camera: SignalCamera<F>,
    config: &PipelineConfig,
    capture: &CaptureOptions,
    end_ms: f64,
    backend_url: &str,
    timeout: Duration,
) -> Result<()> {
    let mut session = CaptureSession::start(camera, config)?;

    let period_ms = 1000.0 / DISPLAY_HZ;
    let mut last_message = "";
    let mut callback = 0u64;
    loop {
        let now_ms = callback as f64 * period_ms;
        if now_ms > end_ms {
            break;
        }
        session.device_mut().set_time(now_ms);
        if session.on_display_callback(now_ms) == TickStatus::Finished {
            break;
        }

        let quality = session.quality();
        if quality.message() != last_message {
            println!(
                "{:>7.1}s  quality {:>5.1} ({:?})  {}",
                now_ms / 1000.0,
                quality.score,
                quality.level,
                quality.message()
            );
            last_message = quality.message();
        }
        callback += 1;
    }

    let peaks = session.peaks().len();
    let quality = session.quality();
    let series = session.stop().context("Capture session was already stopped")?;

    let rate = series.sampling_rate();
    let refined = series.refined(&config.batch);
    println!("Samples: {} at {:.2} Hz", series.samples.len(), rate);
    println!("Recent peaks: {}", peaks);
    println!("Final quality: {:.1} ({:?})", quality.score, quality.level);
    match estimate_pulse_rate(&refined, rate) {
        Some(bpm) => println!("Pulse preview: {:.0} bpm", bpm),
        None => println!("Pulse preview: unavailable"),
    }

    if let Some(base) = &capture.csv_output {
        write_session_csv(base, SensorType::CameraPpg.as_str(), &series, &refined)?;
    }

    if capture.submit {
        info!("Submitting {} samples", refined.len());
        let backend = HttpBackend::new(backend_url, timeout)?;
        let request = ComputeRequest::camera(series.duration_minutes, refined, rate);
        let result = backend.compute(&request);
        report_result(&result);
        if let Some(path) = &capture.metrics_output {
            write_metrics(path, &result)?;
        }
    }
    Ok(())
}

fn write_metrics(path: &Path, result: &ComputeResult) -> Result<()> {
    write_metrics_json(path, result.body())?;
    println!("Compute response written to {}", path.display());
    Ok(())
}

fn report_result(result: &ComputeResult) {
    match result.response() {
        ComputeResponse::Failed(failure) => {
            println!("Backend error: {}", failure.error);
        }
        ComputeResponse::Metrics(m) => {
            let fmt = |v: Option<f64>| v.map(|v| format!("{:.2}", v)).unwrap_or_else(|| "-".into());
            println!("HR mean/min/max: {} / {} / {}", fmt(m.hr_mean), fmt(m.hr_min), fmt(m.hr_max));
            println!("RMSSD: {}  SDNN: {}  lnRMSSD: {}", fmt(m.rmssd), fmt(m.sdnn), fmt(m.lnrmssd));
            println!("pNN50: {}  mean RR: {}", fmt(m.pnn50), fmt(m.mean_rr));
            println!(
                "LF: {}  HF: {}  LF/HF: {}  total: {}",
                fmt(m.lf_power),
                fmt(m.hf_power),
                fmt(m.lf_hf),
                fmt(m.total_power)
            );
            match m.artifact_grade() {
                Some(grade) => println!(
                    "Artifacts: {}% - {}",
                    fmt(m.artifact_percent),
                    grade.message()
                ),
                None => println!("Computed"),
            }
        }
    }
    if let Some(warning) = result.freq_warning() {
        println!("Note: {}", warning);
    }
}
