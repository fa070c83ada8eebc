use anyhow::{Context, Result};
use chrono::Utc;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, Write};

use crate::config::ScreeningConfig;
use crate::pipeline::{Pipeline, TelemetryPayload};

/// One pair of scanner readings as delivered by the telemetry backend
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawSample {
    pub rssi_a: i32,
    pub rssi_b: i32,
    #[serde(default)]
    pub distance_a: Option<f64>,
    #[serde(default)]
    pub distance_b: Option<f64>,
}

impl RawSample {
    pub fn new(rssi_a: i32, rssi_b: i32) -> Self {
        RawSample {
            rssi_a,
            rssi_b,
            distance_a: None,
            distance_b: None,
        }
    }

    /// Whether both scanners actually heard the beacon
    pub fn is_valid(&self, screening: &ScreeningConfig) -> bool {
        let heard = self.rssi_a != screening.no_signal_rssi && self.rssi_b != screening.no_signal_rssi;
        let in_range = [self.distance_a, self.distance_b]
            .iter()
            .all(|d| d.map_or(true, |d| d > screening.min_reported_distance_m));
        heard && in_range
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub processed: usize,
    pub skipped: usize,
    pub outliers: usize,
}

/// Read samples from `input`, estimate each valid one and write payloads to `output`.
///
/// Input is JSON lines, e.g. `{"rssi_a": -60, "rssi_b": -65, "distance_a": 0.12}`;
/// the reported distances are optional.
pub fn run<R: BufRead, W: Write>(
    pipeline: &mut Pipeline,
    screening: &ScreeningConfig,
    input: R,
    mut output: W,
) -> Result<ReplaySummary> {
    let mut summary = ReplaySummary::default();

    for (index, line) in input.lines().enumerate() {
        let line = line.context("Failed to read sample")?;
        if line.trim().is_empty() {
            continue;
        }

        let sample: RawSample = serde_json::from_str(&line)
            .with_context(|| format!("Line {}: invalid sample", index + 1))?;

        if !sample.is_valid(screening) {
            warn!(
                "Line {}: beacon out of range (A={} dBm, B={} dBm), skipping",
                index + 1,
                sample.rssi_a,
                sample.rssi_b
            );
            summary.skipped += 1;
            continue;
        }

        let estimate = pipeline.estimate(sample.rssi_a, sample.rssi_b)?;
        if estimate.outlier {
            summary.outliers += 1;
        }
        info!(
            "Filtered RSSI A={} dBm B={} dBm -> ({:5.1}, {:5.1}) cm",
            estimate.rssi_a_filtered,
            estimate.rssi_b_filtered,
            estimate.x * 100.0,
            estimate.y * 100.0
        );

        let payload = TelemetryPayload::new(&estimate, sample.distance_a, sample.distance_b);
        writeln!(output, "{}", serde_json::to_string(&payload)?)?;
        summary.processed += 1;
    }

    output.flush()?;
    Ok(summary)
}

/// Human-readable summary block
pub fn write_summary<W: Write>(mut writer: W, summary: &ReplaySummary) -> Result<()> {
    writeln!(writer, "========================================")?;
    writeln!(writer, "   RSSITRACK REPLAY SUMMARY")?;
    writeln!(writer, "========================================")?;
    writeln!(
        writer,
        "Generated: {}",
        Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
    )?;
    writeln!(writer, "Estimates:  {}", summary.processed)?;
    writeln!(writer, "Skipped:    {}", summary.skipped)?;
    writeln!(writer, "Outliers:   {}", summary.outliers)?;
    Ok(())
}
