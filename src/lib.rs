pub mod backend;
pub mod ble;
pub mod conditioning;
pub mod config;
pub mod data_loading;
pub mod error;
pub mod frame_sampler;
pub mod heart_analysis;
pub mod illumination;
pub mod output;
pub mod peak_tracker;
pub mod preprocessing;
pub mod quality;
pub mod scheduler;
pub mod session;
pub mod synthetic;

use serde::{Deserialize, Serialize};

/// Signal source of a measurement, as named on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorType {
    CameraPpg,
    PolarH10,
    GarminHrm,
}

impl SensorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SensorType::CameraPpg => "camera_ppg",
            SensorType::PolarH10 => "polar_h10",
            SensorType::GarminHrm => "garmin_hrm",
        }
    }
}
