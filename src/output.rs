use crate::session::CapturedSeries;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Export a captured camera session as `<stem>_<sensor>_<UTC start>.<ext>`
/// next to `base_path`, one row per archived sample.
pub fn write_session_csv(
    base_path: &Path,
    sensor_id: &str,
    series: &CapturedSeries,
    refined: &[f64],
) -> Result<PathBuf> {
    let dir = base_path.parent().unwrap_or(Path::new("."));

    // Create directory if it doesn't exist
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output directory {}", dir.display()))?;

    let stem = base_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("session");
    let ext = base_path.extension().and_then(|s| s.to_str()).unwrap_or("csv");

    let filename = format!(
        "{}_{}_{}.{}",
        stem,
        sensor_id,
        series.started_at.format("%Y%m%dT%H%M%SZ"),
        ext
    );
    let full_path = dir.join(filename);

    println!("Writing session to {}", full_path.display());
    let file = std::fs::File::create(&full_path)
        .with_context(|| format!("Failed to create {}", full_path.display()))?;
    let mut writer = csv::Writer::from_writer(file);

    writer.write_record(["timestamp_ms", "conditioned", "refined"])?;

    // Refined series is the same length as the archive; anything else leaves the column blank
    for (i, (timestamp, value)) in series
        .timestamps_ms
        .iter()
        .zip(series.samples.iter())
        .enumerate()
    {
        writer.write_record(&[
            format!("{:.3}", timestamp),
            if value.is_finite() {
                value.to_string()
            } else {
                String::new()
            },
            refined.get(i).map(|v| v.to_string()).unwrap_or_default(),
        ])?;
    }

    writer.flush()?;
    Ok(full_path)
}

/// Write a compute response verbatim so it can later be passed to `save`.
pub fn write_metrics_json(path: &Path, body: &serde_json::Value) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    serde_json::to_writer_pretty(file, body)
        .with_context(|| format!("Failed to write metrics to {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn session_csv_name_and_rows() {
        let dir = std::env::temp_dir().join(format!("pulse_capture_out_{}", std::process::id()));
        let series = CapturedSeries {
            samples: vec![0.01, f64::NAN, -0.02],
            timestamps_ms: vec![0.0, 33.0, 66.0],
            started_at: chrono::Utc.with_ymd_and_hms(2024, 3, 1, 8, 30, 0).unwrap(),
            duration_minutes: 3.0,
            nominal_rate_hz: 30.0,
        };

        let path = write_session_csv(&dir.join("run.csv"), "camera_ppg", &series, &[1.0, 1.0, -2.0])
            .unwrap();
        assert_eq!(
            path.file_name().and_then(|s| s.to_str()),
            Some("run_camera_ppg_20240301T083000Z.csv")
        );

        let contents = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_dir_all(&dir).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines[0], "timestamp_ms,conditioned,refined");
        assert_eq!(lines[2], "33.000,,1");
        assert_eq!(lines.len(), 4);
    }

    #[test]
    fn metrics_json_round_trips() {
        let path = std::env::temp_dir()
            .join(format!("pulse_capture_metrics_{}.json", std::process::id()));
        let body = serde_json::json!({ "rmssd": 41.5, "hrv_score": 60 });
        write_metrics_json(&path, &body).unwrap();
        let read: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(read, body);
    }
}
