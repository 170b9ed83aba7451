use anyhow::{Context, Result};
use log::{debug, warn};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// One recorded frame intensity: the red mean the sampler produced at a
/// given capture time.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct FrameRecord {
    pub timestamp_ms: f64,
    pub red_mean: f64,
}

/// Read a `timestamp_ms,red_mean` CSV, sorted by timestamp.
pub fn read_frame_csv(path: &Path) -> Result<Vec<FrameRecord>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open frame log: {}", path.display()))?;
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(file);

    let mut records = Vec::new();
    for (row, result) in rdr.deserialize::<FrameRecord>().enumerate() {
        let record = result.with_context(|| format!("Invalid frame record at row {}", row + 1))?;
        records.push(record);
    }

    records.sort_by(|a, b| a.timestamp_ms.total_cmp(&b.timestamp_ms));
    debug!("Loaded {} frame records from {}", records.len(), path.display());
    Ok(records)
}

/// Decode one logged notification: hex bytes, optionally `0x`-prefixed and
/// separated by whitespace, colons or dashes.
pub fn parse_hex_payload(line: &str) -> Result<Vec<u8>> {
    let cleaned: String = line
        .split(|c: char| c.is_whitespace() || c == ':' || c == '-')
        .filter(|s| !s.is_empty())
        .map(|s| s.trim_start_matches("0x").trim_start_matches("0X"))
        .collect();
    hex::decode(&cleaned).with_context(|| format!("Invalid hex payload: {:?}", line))
}

/// Read a Heart Rate Measurement notification log, one payload per line.
///
/// Blank lines and `#` comments are skipped. Lines that are not valid hex
/// are logged and skipped so a damaged log still replays.
pub fn read_notification_log(path: &Path) -> Result<Vec<Vec<u8>>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open notification log: {}", path.display()))?;
    let reader = BufReader::new(file);

    let mut payloads = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read {}", path.display()))?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match parse_hex_payload(line) {
            Ok(payload) => payloads.push(payload),
            Err(e) => warn!("Skipping line {}: {:#}", index + 1, e),
        }
    }

    debug!("Loaded {} notifications from {}", payloads.len(), path.display());
    Ok(payloads)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_file(name: &str, contents: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!(
            "pulse_capture_{}_{}",
            std::process::id(),
            name
        ));
        let mut file = File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn hex_payload_formats() {
        assert_eq!(parse_hex_payload("10 3c 2c 01").unwrap(), vec![0x10, 0x3C, 0x2C, 0x01]);
        assert_eq!(parse_hex_payload("0x10 0x3C").unwrap(), vec![0x10, 0x3C]);
        assert_eq!(parse_hex_payload("10:3c-2c").unwrap(), vec![0x10, 0x3C, 0x2C]);
        assert!(parse_hex_payload("10 3").is_err());
        assert!(parse_hex_payload("zz").is_err());
    }

    #[test]
    fn notification_log_skips_comments_and_bad_lines() {
        let path = temp_file(
            "notifications.log",
            "# polar h10\n10 3c 2c 01\n\nnot hex\n10 40 00 04\n",
        );
        let payloads = read_notification_log(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(payloads, vec![vec![0x10, 0x3C, 0x2C, 0x01], vec![0x10, 0x40, 0x00, 0x04]]);
    }

    #[test]
    fn frame_csv_is_sorted() {
        let path = temp_file(
            "frames.csv",
            "timestamp_ms,red_mean\n66.6,130.5\n0,128\n33.3, 129.25\n",
        );
        let records = read_frame_csv(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        let timestamps: Vec<f64> = records.iter().map(|r| r.timestamp_ms).collect();
        assert_eq!(timestamps, vec![0.0, 33.3, 66.6]);
        assert_eq!(records[1].red_mean, 129.25);
    }

    #[test]
    fn missing_file_has_context() {
        let err = read_frame_csv(Path::new("/nonexistent/frames.csv")).unwrap_err();
        assert!(format!("{}", err).contains("Failed to open frame log"));
    }
}
