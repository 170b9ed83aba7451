use thiserror::Error;

/// Failures that prevent a capture session from starting or a result from being used.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("capture device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("camera authorised but no frames arrived within {timeout_ms} ms")]
    NoFrames { timeout_ms: u64 },

    #[error("no valid metrics to save")]
    NoValidMetrics,
}

/// Malformed Heart Rate Measurement notifications.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BleError {
    #[error("empty heart rate measurement payload")]
    Empty,

    #[error("heart rate measurement truncated: need {needed} bytes, got {len}")]
    Truncated { needed: usize, len: usize },
}

/// Failures talking to the HRV backend.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("could not build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("request to {endpoint} failed: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{endpoint} answered HTTP {status}")]
    Status { endpoint: String, status: u16 },

    #[error("{endpoint} returned a body that is not valid JSON: {source}")]
    Decode {
        endpoint: String,
        #[source]
        source: serde_json::Error,
    },
}
