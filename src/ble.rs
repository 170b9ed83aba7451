//! Bluetooth heart-rate straps: Heart Rate Measurement parsing and RR capture.

use crate::error::BleError;
use crate::SensorType;
use log::{info, trace, warn};
use serde::Deserialize;

const FLAG_HR_16BIT: u8 = 0x01;
const FLAG_ENERGY_EXPENDED: u8 = 0x08;
const FLAG_RR_PRESENT: u8 = 0x10;

/// Chest straps that report RR intervals over the standard Heart Rate Service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum BleSensor {
    PolarH10,
    GarminHrm,
}

impl From<BleSensor> for SensorType {
    fn from(sensor: BleSensor) -> Self {
        match sensor {
            BleSensor::PolarH10 => SensorType::PolarH10,
            BleSensor::GarminHrm => SensorType::GarminHrm,
        }
    }
}

/// One decoded Heart Rate Measurement notification.
#[derive(Debug, Clone, PartialEq)]
pub struct HeartRateMeasurement {
    pub heart_rate_bpm: u16,
    pub energy_expended_kj: Option<u16>,
    /// RR intervals in milliseconds, in the order they were sent
    pub rr_intervals_ms: Vec<f64>,
}

impl HeartRateMeasurement {
    pub fn parse(payload: &[u8]) -> Result<Self, BleError> {
        let (&flags, _) = payload.split_first().ok_or(BleError::Empty)?;
        let mut index = 1;

        let heart_rate_bpm = if flags & FLAG_HR_16BIT != 0 {
            let value = read_u16_le(payload, index)?;
            index += 2;
            value
        } else {
            let value = *payload.get(index).ok_or(BleError::Truncated {
                needed: index + 1,
                len: payload.len(),
            })?;
            index += 1;
            value as u16
        };

        let energy_expended_kj = if flags & FLAG_ENERGY_EXPENDED != 0 {
            let value = read_u16_le(payload, index)?;
            index += 2;
            Some(value)
        } else {
            None
        };

        let mut rr_intervals_ms = Vec::new();
        if flags & FLAG_RR_PRESENT != 0 {
            // RR values are in 1/1024 s units
            while index + 1 < payload.len() {
                let raw = u16::from_le_bytes([payload[index], payload[index + 1]]);
                rr_intervals_ms.push(raw as f64 / 1024.0 * 1000.0);
                index += 2;
            }
        }

        Ok(Self {
            heart_rate_bpm,
            energy_expended_kj,
            rr_intervals_ms,
        })
    }
}

fn read_u16_le(payload: &[u8], index: usize) -> Result<u16, BleError> {
    match payload.get(index..index + 2) {
        Some(bytes) => Ok(u16::from_le_bytes([bytes[0], bytes[1]])),
        None => Err(BleError::Truncated {
            needed: index + 2,
            len: payload.len(),
        }),
    }
}

/// RR intervals of a notification; malformed payloads yield none.
pub fn parse_rr_intervals(payload: &[u8]) -> Vec<f64> {
    HeartRateMeasurement::parse(payload)
        .map(|m| m.rr_intervals_ms)
        .unwrap_or_default()
}

/// Collects RR intervals for one strap session.
#[derive(Debug, Clone)]
pub struct RrRecorder {
    sensor: BleSensor,
    measuring: bool,
    stopped: bool,
    intervals_ms: Vec<f64>,
    status: Option<String>,
}

impl RrRecorder {
    pub fn start(sensor: BleSensor) -> Self {
        info!("Collecting RR intervals from {:?}", sensor);
        Self {
            sensor,
            measuring: true,
            stopped: false,
            intervals_ms: Vec::new(),
            status: None,
        }
    }

    pub fn sensor(&self) -> BleSensor {
        self.sensor
    }

    pub fn is_measuring(&self) -> bool {
        self.measuring
    }

    /// Handle a characteristic-value notification. Returns how many
    /// intervals were recorded.
    pub fn on_notification(&mut self, payload: &[u8]) -> usize {
        if !self.measuring {
            trace!("Ignoring notification while not measuring");
            return 0;
        }
        match HeartRateMeasurement::parse(payload) {
            Ok(measurement) => {
                let count = measurement.rr_intervals_ms.len();
                self.intervals_ms.extend(measurement.rr_intervals_ms);
                count
            }
            Err(e) => {
                warn!("Skipping malformed heart rate notification: {}", e);
                0
            }
        }
    }

    /// The strap went away: stop measuring but keep what was captured.
    pub fn on_disconnect(&mut self) {
        if self.measuring {
            warn!(
                "{:?} disconnected after {} intervals",
                self.sensor,
                self.intervals_ms.len()
            );
            self.measuring = false;
            self.status = Some("Sensor disconnected".to_string());
        }
    }

    /// Last lifecycle status worth showing the user, if any.
    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    pub fn intervals_ms(&self) -> &[f64] {
        &self.intervals_ms
    }

    /// Finish the session. The first call hands over the intervals; any
    /// later call is a no-op returning `None`.
    pub fn stop(&mut self) -> Option<Vec<f64>> {
        if self.stopped {
            return None;
        }
        self.stopped = true;
        self.measuring = false;
        info!("RR capture stopped with {} intervals", self.intervals_ms.len());
        Some(std::mem::take(&mut self.intervals_ms))
    }
}
