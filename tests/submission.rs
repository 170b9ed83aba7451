use chrono::Utc;
use pulse_capture::backend::{
    ArtifactGrade, ComputeRequest, ComputeResult, HrvBackend, SaveRequest, SaveResponse,
    SignalPayload, SubjectInfo,
};
use pulse_capture::ble::{parse_rr_intervals, BleSensor, RrRecorder};
use pulse_capture::error::{BackendError, CaptureError};
use pulse_capture::preprocessing::{carry_forward_non_finite, BatchConfig};
use pulse_capture::session::CapturedSeries;
use pulse_capture::SensorType;
use serde_json::{json, Value};
use std::cell::RefCell;
use std::f64::consts::PI;

/// Backend double answering every compute with a canned body.
struct CannedBackend {
    compute_body: Option<Value>,
    computed: RefCell<Vec<Value>>,
    saved: RefCell<Vec<Value>>,
}

impl CannedBackend {
    fn answering(body: Value) -> Self {
        Self {
            compute_body: Some(body),
            computed: RefCell::new(Vec::new()),
            saved: RefCell::new(Vec::new()),
        }
    }

    fn unreachable() -> Self {
        Self {
            compute_body: None,
            computed: RefCell::new(Vec::new()),
            saved: RefCell::new(Vec::new()),
        }
    }
}

impl HrvBackend for CannedBackend {
    fn compute(&self, request: &ComputeRequest) -> ComputeResult {
        self.computed
            .borrow_mut()
            .push(serde_json::to_value(request).unwrap());
        match &self.compute_body {
            Some(body) => ComputeResult::from_body(body.clone()),
            None => ComputeResult::failed("connection refused"),
        }
    }

    fn save(&self, request: &SaveRequest) -> Result<SaveResponse, BackendError> {
        self.saved
            .borrow_mut()
            .push(serde_json::to_value(request).unwrap());
        Ok(SaveResponse { ok: true })
    }
}

fn camera_series(samples: Vec<f64>) -> CapturedSeries {
    let timestamps_ms = (0..samples.len()).map(|i| i as f64 * 1000.0 / 30.0).collect();
    CapturedSeries {
        samples,
        timestamps_ms,
        started_at: Utc::now(),
        duration_minutes: 3.0,
        nominal_rate_hz: 30.0,
    }
}

#[test]
fn nan_in_the_middle_is_carried_forward_before_submission() {
    let mut ppg = vec![0.01, 0.02, 0.03, f64::NAN, 0.05, 0.04];
    carry_forward_non_finite(&mut ppg);
    assert_eq!(ppg, vec![0.01, 0.02, 0.03, 0.03, 0.05, 0.04]);

    let mut samples: Vec<f64> = (0..600)
        .map(|i| 0.02 * (2.0 * PI * 1.2 * i as f64 / 30.0).sin())
        .collect();
    samples[300] = f64::NAN;
    let series = camera_series(samples);

    let request = series.to_compute_request(&BatchConfig::default());
    assert_eq!(request.sensor_type, SensorType::CameraPpg);
    match &request.signal {
        SignalPayload::Ppg { ppg, sampling_rate } => {
            assert_eq!(ppg.len(), 600);
            assert!(ppg.iter().all(|v| v.is_finite()));
            assert!((sampling_rate - 30.0).abs() < 1e-6);
        }
        other => panic!("unexpected payload {:?}", other),
    }

    // NaN cannot be encoded as JSON, so this also proves the body is well formed
    let body = serde_json::to_string(&request).unwrap();
    assert!(!body.contains("null"));
}

#[test]
fn compute_then_save_passes_metrics_through() {
    let metrics = json!({
        "hr_mean": 68.0, "hr_max": 80.0, "hr_min": 59.0,
        "rmssd": 45.1, "sdnn": 51.0, "lnrmssd": 3.81, "pnn50": 22.0,
        "mean_rr": 882.0, "lf_power": 610.0, "hf_power": 540.0,
        "lf_hf": 1.13, "total_power": 1500.0, "artifact_percent": 4.0,
        "n_rr": 201,
        "biomarkers": { "stress_index": 0.4 }
    });
    let backend = CannedBackend::answering(metrics.clone());
    let series = camera_series(vec![0.0; 900]);

    let result = backend.compute(&series.to_compute_request(&BatchConfig::default()));
    assert!(!result.is_error());
    assert_eq!(
        result.metrics().and_then(|m| m.artifact_grade()),
        Some(ArtifactGrade::Good)
    );

    let subject = SubjectInfo {
        student_id: "S-001".into(),
        ..SubjectInfo::default()
    };
    let response = backend.save(&SaveRequest::new(subject, &result).unwrap()).unwrap();
    assert!(response.ok);
    assert_eq!(backend.saved.borrow()[0]["metrics"], metrics);
    assert_eq!(backend.saved.borrow()[0]["student_id"], "S-001");
}

#[test]
fn failed_compute_cannot_be_saved() {
    let backend = CannedBackend::unreachable();
    let result = backend.compute(&ComputeRequest::rr(BleSensor::PolarH10, 5.0, vec![800.0; 10]));
    assert!(result.is_error());
    assert!(matches!(
        SaveRequest::new(SubjectInfo::default(), &result),
        Err(CaptureError::NoValidMetrics)
    ));
    assert!(backend.saved.borrow().is_empty());

    let backend_error = CannedBackend::answering(json!({ "error": "Not enough RR intervals" }));
    let result = backend_error.compute(&ComputeRequest::rr(BleSensor::GarminHrm, 3.0, vec![]));
    assert!(result.is_error());
    assert_eq!(backend_error.computed.borrow()[0]["sensor_type"], "garmin_hrm");
}

#[test]
fn rr_payload_decodes_little_endian_units() {
    // 300 / 1024 s
    let rrs = parse_rr_intervals(&[0x10, 0x3C, 0x2C, 0x01]);
    assert_eq!(rrs.len(), 1);
    assert_eq!(rrs[0].round(), 293.0);
}

#[test]
fn strap_disconnect_keeps_captured_intervals_for_submission() {
    let backend = CannedBackend::answering(json!({ "rmssd": 30.0 }));
    let mut recorder = RrRecorder::start(BleSensor::PolarH10);
    recorder.on_notification(&[0x10, 0x48, 0x00, 0x04]);
    recorder.on_notification(&[0x10, 0x48, 0x33, 0x03, 0x66, 0x03]);
    recorder.on_disconnect();
    recorder.on_notification(&[0x10, 0x48, 0x00, 0x04]);

    let intervals = recorder.stop().unwrap();
    assert_eq!(intervals.len(), 3);
    assert_eq!(recorder.stop(), None);

    let result = backend.compute(&ComputeRequest::rr(recorder.sensor(), 5.0, intervals));
    assert!(!result.is_error());
    let sent = &backend.computed.borrow()[0];
    assert_eq!(sent["sensor_type"], "polar_h10");
    assert_eq!(sent["rri_ms"].as_array().map(|a| a.len()), Some(3));
    assert!(sent.get("ppg").is_none());
}
