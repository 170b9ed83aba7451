//! Wire contract of the HRV backend (`/api/compute`, `/api/save`) and a
//! blocking HTTP client for it.
//!
//! The backend is opaque: responses are kept verbatim so that whatever it
//! returns can be handed back to `/api/save` unchanged, and every transport
//! or decoding failure of `/api/compute` is folded into an error-shaped
//! result instead of escaping to the caller.

use crate::ble::BleSensor;
use crate::error::{BackendError, CaptureError};
use crate::SensorType;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::time::Duration;

pub const COMPUTE_ENDPOINT: &str = "/api/compute";
pub const SAVE_ENDPOINT: &str = "/api/save";

/// Signal part of a compute request; which one depends on the sensor.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SignalPayload {
    Ppg { ppg: Vec<f64>, sampling_rate: f64 },
    Rri { rri_ms: Vec<f64> },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComputeRequest {
    pub sensor_type: SensorType,
    pub duration_minutes: f64,
    #[serde(flatten)]
    pub signal: SignalPayload,
}

impl ComputeRequest {
    /// Camera capture: refined samples plus the estimated sample rate.
    pub fn camera(duration_minutes: f64, ppg: Vec<f64>, sampling_rate: f64) -> Self {
        Self {
            sensor_type: SensorType::CameraPpg,
            duration_minutes,
            signal: SignalPayload::Ppg { ppg, sampling_rate },
        }
    }

    /// Strap capture: RR intervals in milliseconds.
    pub fn rr(sensor: BleSensor, duration_minutes: f64, rri_ms: Vec<f64>) -> Self {
        Self {
            sensor_type: sensor.into(),
            duration_minutes,
            signal: SignalPayload::Rri { rri_ms },
        }
    }
}

/// Error-shaped compute response.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ComputeFailure {
    pub error: String,
    #[serde(default)]
    pub freq_warning: Option<String>,
}

/// Metrics-shaped compute response. Any field may be missing or null.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct HrvMetrics {
    pub hr_mean: Option<f64>,
    pub hr_max: Option<f64>,
    pub hr_min: Option<f64>,
    pub rmssd: Option<f64>,
    pub sdnn: Option<f64>,
    pub lnrmssd: Option<f64>,
    pub pnn50: Option<f64>,
    pub mean_rr: Option<f64>,
    pub lf_power: Option<f64>,
    pub hf_power: Option<f64>,
    pub lf_hf: Option<f64>,
    pub total_power: Option<f64>,
    pub artifact_percent: Option<f64>,
    #[serde(default)]
    pub freq_warning: Option<String>,
    /// Everything else the backend sent (scores, counts, dashboards)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Artifact share of the RR series, as graded for the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactGrade {
    Good,
    Moderate,
    Poor,
}

impl ArtifactGrade {
    pub fn from_percent(percent: f64) -> Self {
        if percent <= 8.0 {
            ArtifactGrade::Good
        } else if percent <= 18.0 {
            ArtifactGrade::Moderate
        } else {
            ArtifactGrade::Poor
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            ArtifactGrade::Good => "Computed, good quality",
            ArtifactGrade::Moderate => "Computed, moderate quality",
            ArtifactGrade::Poor => "Computed, low quality (many artifacts)",
        }
    }
}

impl HrvMetrics {
    pub fn artifact_grade(&self) -> Option<ArtifactGrade> {
        self.artifact_percent
            .filter(|p| p.is_finite())
            .map(ArtifactGrade::from_percent)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ComputeResponse {
    Failed(ComputeFailure),
    Metrics(HrvMetrics),
}

/// A compute response together with the exact body it was parsed from.
#[derive(Debug, Clone, PartialEq)]
pub struct ComputeResult {
    body: Value,
    response: ComputeResponse,
}

impl ComputeResult {
    pub fn from_body(body: Value) -> Self {
        match serde_json::from_value::<ComputeResponse>(body.clone()) {
            Ok(response) => Self { body, response },
            Err(e) => Self::failed(format!("unexpected response from backend: {}", e)),
        }
    }

    /// Synthetic error result, shaped like a backend error.
    pub fn failed(message: impl Into<String>) -> Self {
        let error = message.into();
        Self {
            body: json!({ "error": error }),
            response: ComputeResponse::Failed(ComputeFailure {
                error,
                freq_warning: None,
            }),
        }
    }

    pub fn response(&self) -> &ComputeResponse {
        &self.response
    }

    pub fn body(&self) -> &Value {
        &self.body
    }

    pub fn metrics(&self) -> Option<&HrvMetrics> {
        match &self.response {
            ComputeResponse::Metrics(m) => Some(m),
            ComputeResponse::Failed(_) => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.response, ComputeResponse::Failed(_))
    }

    pub fn freq_warning(&self) -> Option<&str> {
        match &self.response {
            ComputeResponse::Failed(f) => f.freq_warning.as_deref(),
            ComputeResponse::Metrics(m) => m.freq_warning.as_deref(),
        }
    }
}

/// Subject metadata entered alongside a measurement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubjectInfo {
    pub student_id: String,
    pub age: String,
    pub comorbidities: String,
    pub notes: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SaveRequest {
    #[serde(flatten)]
    pub subject: SubjectInfo,
    pub metrics: Value,
}

impl SaveRequest {
    /// Only successful compute results can be saved.
    pub fn new(subject: SubjectInfo, result: &ComputeResult) -> Result<Self, CaptureError> {
        if result.is_error() {
            return Err(CaptureError::NoValidMetrics);
        }
        Ok(Self {
            subject,
            metrics: result.body().clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SaveResponse {
    #[serde(default)]
    pub ok: bool,
}

/// The two backend operations the client depends on.
pub trait HrvBackend {
    /// Never fails: transport and decoding problems come back as an error result.
    fn compute(&self, request: &ComputeRequest) -> ComputeResult;

    fn save(&self, request: &SaveRequest) -> Result<SaveResponse, BackendError>;
}

pub struct HttpBackend {
    base_url: String,
    client: reqwest::blocking::Client,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, BackendError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(BackendError::Client)?;
        Ok(Self {
            base_url: base_url.into(),
            client,
        })
    }

    fn post_json<T: Serialize>(&self, endpoint: &str, body: &T) -> Result<Value, BackendError> {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), endpoint);
        debug!("POST {}", url);

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .map_err(|source| BackendError::Transport {
                endpoint: endpoint.to_string(),
                source,
            })?;
        let status = response.status();
        let text = response.text().map_err(|source| BackendError::Transport {
            endpoint: endpoint.to_string(),
            source,
        })?;

        // Error answers (e.g. 400 for a bad sensor type) still carry a JSON body
        match serde_json::from_str::<Value>(&text) {
            Ok(value) => Ok(value),
            Err(_) if !status.is_success() => Err(BackendError::Status {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
            }),
            Err(source) => Err(BackendError::Decode {
                endpoint: endpoint.to_string(),
                source,
            }),
        }
    }
}

impl HrvBackend for HttpBackend {
    fn compute(&self, request: &ComputeRequest) -> ComputeResult {
        info!(
            "Submitting {:?} capture ({} min) to {}",
            request.sensor_type, request.duration_minutes, COMPUTE_ENDPOINT
        );
        match self.post_json(COMPUTE_ENDPOINT, request) {
            Ok(body) => ComputeResult::from_body(body),
            Err(e) => {
                warn!("Compute request failed: {}", e);
                ComputeResult::failed(e.to_string())
            }
        }
    }

    fn save(&self, request: &SaveRequest) -> Result<SaveResponse, BackendError> {
        let body = self.post_json(SAVE_ENDPOINT, request)?;
        serde_json::from_value(body).map_err(|source| BackendError::Decode {
            endpoint: SAVE_ENDPOINT.to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camera_request_wire_shape() {
        let request = ComputeRequest::camera(3.0, vec![0.5, -0.5], 29.5);
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({
                "sensor_type": "camera_ppg",
                "duration_minutes": 3.0,
                "ppg": [0.5, -0.5],
                "sampling_rate": 29.5
            })
        );
    }

    #[test]
    fn strap_request_wire_shape() {
        let request = ComputeRequest::rr(BleSensor::GarminHrm, 5.0, vec![800.0, 810.0]);
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({
                "sensor_type": "garmin_hrm",
                "duration_minutes": 5.0,
                "rri_ms": [800.0, 810.0]
            })
        );
    }

    #[test]
    fn error_responses_are_recognised() {
        let result = ComputeResult::from_body(json!({
            "error": "PPG too short",
            "freq_warning": "Segment < 5 min",
            "artifact_percent": null
        }));
        assert!(result.is_error());
        assert_eq!(result.freq_warning(), Some("Segment < 5 min"));
        assert_eq!(result.metrics(), None);
    }

    #[test]
    fn metrics_tolerate_nulls_and_unknown_fields() {
        let body = json!({
            "hr_mean": 71.2,
            "rmssd": 42.0,
            "lf_hf": null,
            "artifact_percent": 12.5,
            "hrv_score": 63.0,
            "dashboard": { "stress": "low" }
        });
        let result = ComputeResult::from_body(body.clone());
        let metrics = result.metrics().unwrap();
        assert_eq!(metrics.hr_mean, Some(71.2));
        assert_eq!(metrics.lf_hf, None);
        assert_eq!(metrics.sdnn, None);
        assert_eq!(metrics.extra["hrv_score"], json!(63.0));
        assert_eq!(metrics.artifact_grade(), Some(ArtifactGrade::Moderate));
        assert_eq!(result.body(), &body);
    }

    #[test]
    fn non_object_response_becomes_error_result() {
        let result = ComputeResult::from_body(json!([1, 2, 3]));
        assert!(result.is_error());
        assert_eq!(result.body()["error"].as_str().map(|s| s.is_empty()), Some(false));
    }

    #[test]
    fn artifact_grades() {
        assert_eq!(ArtifactGrade::from_percent(8.0), ArtifactGrade::Good);
        assert_eq!(ArtifactGrade::from_percent(18.0), ArtifactGrade::Moderate);
        assert_eq!(ArtifactGrade::from_percent(18.1), ArtifactGrade::Poor);
        assert_eq!(HrvMetrics::default().artifact_grade(), None);
    }

    #[test]
    fn save_requires_successful_metrics() {
        let subject = SubjectInfo {
            student_id: "A-17".into(),
            age: "21".into(),
            comorbidities: String::new(),
            notes: "morning".into(),
        };
        let failed = ComputeResult::failed("network down");
        assert!(matches!(
            SaveRequest::new(subject.clone(), &failed),
            Err(CaptureError::NoValidMetrics)
        ));

        let ok = ComputeResult::from_body(json!({ "rmssd": 40.0 }));
        let request = SaveRequest::new(subject, &ok).unwrap();
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "student_id": "A-17",
                "age": "21",
                "comorbidities": "",
                "notes": "morning",
                "metrics": { "rmssd": 40.0 }
            })
        );
    }
}
