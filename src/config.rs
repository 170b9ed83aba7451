use crate::ble::BleSensor;
use crate::conditioning::ConditioningConfig;
use crate::frame_sampler::SamplerConfig;
use crate::illumination::IlluminationConfig;
use crate::peak_tracker::PeakConfig;
use crate::preprocessing::BatchConfig;
use crate::quality::QualityConfig;
use crate::scheduler::SchedulerConfig;
use crate::session::SessionConfig;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Every tunable of the capture pipeline. Any subset can be overridden
/// from a JSON file; missing fields keep their defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub sampler: SamplerConfig,
    pub illumination: IlluminationConfig,
    pub conditioning: ConditioningConfig,
    pub quality: QualityConfig,
    pub peaks: PeakConfig,
    pub scheduler: SchedulerConfig,
    pub batch: BatchConfig,
    pub session: SessionConfig,
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Invalid pipeline config in {}", path.display()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TorchArg {
    Auto,
    Off,
}

impl From<TorchArg> for crate::illumination::TorchMode {
    fn from(arg: TorchArg) -> Self {
        match arg {
            TorchArg::Auto => crate::illumination::TorchMode::Auto,
            TorchArg::Off => crate::illumination::TorchMode::Off,
        }
    }
}

/// Capture PPG and RR signals offline and submit them for HRV analysis
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Base URL of the HRV backend
    #[arg(long, env = "PULSE_BACKEND_URL", default_value = "http://localhost:5000")]
    pub backend_url: String,

    /// JSON file overriding pipeline thresholds
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Backend request timeout in seconds
    #[arg(long, default_value = "30")]
    pub timeout_secs: u64,

    #[command(subcommand)]
    pub command: Command,
}

/// Options shared by the camera drivers
#[derive(clap::Args, Debug, Clone)]
pub struct CaptureOptions {
    /// Measurement length in minutes (overrides the config file)
    #[arg(long)]
    pub duration: Option<f64>,

    /// Torch policy
    #[arg(long, value_enum)]
    pub torch: Option<TorchArg>,

    /// CSV output file prefix (e.g. /path/to/output/prefix)
    #[arg(long)]
    pub csv_output: Option<PathBuf>,

    /// Submit the refined series to /api/compute
    #[arg(long)]
    pub submit: bool,

    /// Where to write the compute response (for a later `save`)
    #[arg(long)]
    pub metrics_output: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Replay a `timestamp_ms,red_mean` CSV through the real-time pipeline
    Replay {
        /// Recorded frame intensities
        csv: PathBuf,

        #[command(flatten)]
        capture: CaptureOptions,
    },

    /// Drive the pipeline with a synthetic finger-on-lens pulse
    Simulate {
        /// Pulse rate of the synthetic signal
        #[arg(long, default_value = "72.0")]
        bpm: f64,

        /// Pulse amplitude in red levels
        #[arg(long, default_value = "5.0")]
        amplitude: f64,

        /// Red level with the torch off
        #[arg(long, default_value = "128.0")]
        baseline: f64,

        /// Red level added while the torch is on
        #[arg(long, default_value = "0.0")]
        torch_boost: f64,

        /// Start with the torch on
        #[arg(long)]
        torch_on: bool,

        /// Seconds to simulate (capped by the measurement duration)
        #[arg(long, default_value = "30.0")]
        seconds: f64,

        #[command(flatten)]
        capture: CaptureOptions,
    },

    /// Replay a log of BLE Heart Rate Measurement notifications (hex, one per line)
    Rr {
        log: PathBuf,

        #[arg(long, value_enum, default_value = "polar-h10")]
        sensor: BleSensor,

        /// Measurement length reported to the backend, in minutes
        #[arg(long, default_value = "3.0")]
        duration: f64,

        /// Stop as if the strap disconnected after this many notifications
        #[arg(long)]
        disconnect_after: Option<usize>,

        #[arg(long)]
        submit: bool,

        #[arg(long)]
        metrics_output: Option<PathBuf>,
    },

    /// Save a stored compute response together with subject details
    Save {
        /// Compute response written by --metrics-output
        metrics: PathBuf,

        #[arg(long)]
        student_id: String,

        #[arg(long, default_value = "")]
        age: String,

        #[arg(long, default_value = "")]
        comorbidities: String,

        #[arg(long, default_value = "")]
        notes: String,
    },
}
