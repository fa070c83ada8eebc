use anyhow::{bail, Context, Result};
use log::{debug, info};
use std::fs;
use std::path::Path;

use crate::distance::PathLossModel;
use crate::error::EstimatorResult;
use crate::features::build_feature_matrix;
use crate::model::RegressionEstimator;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fingerprint {
    pub x_cm: f64,
    pub y_cm: f64,
    pub rssi_a: f64,
    pub rssi_b: f64,
}

const REQUIRED_COLUMNS: [&str; 4] = ["x_cm", "y_cm", "rssi_A", "rssi_B"];

pub fn load<P: AsRef<Path>>(path: P) -> Result<Vec<Fingerprint>> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("Failed to read fingerprint file: {:?}", path.as_ref()))?;

    let fingerprints = parse(&content)?;
    info!("Loaded {} fingerprints from {:?}", fingerprints.len(), path.as_ref());
    Ok(fingerprints)
}

/// Header-addressed CSV; needs `x_cm`, `y_cm`, `rssi_A`, `rssi_B` in any order
pub fn parse(content: &str) -> Result<Vec<Fingerprint>> {
    let mut lines = content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty());

    let header: Vec<&str> = match lines.next() {
        Some((_, line)) => line.split(',').map(str::trim).collect(),
        None => bail!("Fingerprint file is empty"),
    };

    let mut columns = [0usize; 4];
    for (slot, name) in columns.iter_mut().zip(REQUIRED_COLUMNS.iter()) {
        *slot = header
            .iter()
            .position(|h| h == name)
            .with_context(|| format!("Missing column '{}' in fingerprint header", name))?;
    }

    let mut fingerprints = Vec::new();
    for (index, line) in lines {
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        let value = |column: usize| -> Result<f64> {
            let raw = fields
                .get(column)
                .with_context(|| format!("Line {}: missing field {}", index + 1, column + 1))?;
            raw.parse::<f64>()
                .with_context(|| format!("Line {}: invalid number '{}'", index + 1, raw))
        };

        fingerprints.push(Fingerprint {
            x_cm: value(columns[0])?,
            y_cm: value(columns[1])?,
            rssi_a: value(columns[2])?,
            rssi_b: value(columns[3])?,
        });
    }

    debug!("Parsed {} fingerprint rows", fingerprints.len());
    Ok(fingerprints)
}

/// Run the model over every fingerprint without temporal filtering.
/// Returns `(predicted, truth)` positions, both in centimeters.
pub fn predict_all(
    estimator: &RegressionEstimator,
    fingerprints: &[Fingerprint],
    path_loss: &PathLossModel,
) -> EstimatorResult<(Vec<(f64, f64)>, Vec<(f64, f64)>)> {
    let mut predicted = Vec::with_capacity(fingerprints.len());
    let mut truth = Vec::with_capacity(fingerprints.len());

    let pairs: Vec<(f64, f64)> = fingerprints.iter().map(|f| (f.rssi_a, f.rssi_b)).collect();
    let rows = build_feature_matrix(&pairs, path_loss);

    for (fingerprint, features) in fingerprints.iter().zip(rows.iter()) {
        let (x_m, y_m) = estimator.predict(features.as_slice())?;
        predicted.push((x_m * 100.0, y_m * 100.0));
        truth.push((fingerprint.x_cm, fingerprint.y_cm));
    }

    Ok((predicted, truth))
}
