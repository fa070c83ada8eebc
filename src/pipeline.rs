use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::Config;
use crate::correction::BiasCorrection;
use crate::distance::PathLossModel;
use crate::error::{EstimatorError, EstimatorResult};
use crate::features::build_features;
use crate::filter::TemporalFilter;
use crate::model::{ModelArtifact, RegressionEstimator};

/// Default jump, in meters, above which a new estimate is reported as an outlier
pub const DEFAULT_OUTLIER_THRESHOLD_M: f64 = 0.10;

/// Physical bounds of the tracking area, origin at a corner
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Arena {
    pub width_m: f64,
    pub height_m: f64,
}

impl Default for Arena {
    fn default() -> Self {
        // 30 x 30 cm test box
        Arena {
            width_m: 0.30,
            height_m: 0.30,
        }
    }
}

impl Arena {
    /// Pin a position to `[0, width] x [0, height]`; NaN maps to 0
    pub fn clamp(&self, x: f64, y: f64) -> (f64, f64) {
        (clamp_axis(x, self.width_m), clamp_axis(y, self.height_m))
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        (0.0..=self.width_m).contains(&x) && (0.0..=self.height_m).contains(&y)
    }
}

// Same NaN fallback then max/min as the distance clamp; `upper` is config
fn clamp_axis(value: f64, upper: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.max(0.0).min(upper)
}

/// Result of one pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Estimate {
    /// Smoothed position (meters)
    pub x: f64,
    pub y: f64,
    /// Median-filtered RSSI actually used for inference
    pub rssi_a_filtered: i32,
    pub rssi_b_filtered: i32,
    /// Path-loss distances derived from the filtered RSSI (meters)
    pub distance_a: f64,
    pub distance_b: f64,
    /// The clamped estimate jumped further than the outlier threshold.
    /// Advisory only; the sample was still filtered.
    pub outlier: bool,
}

/// Telemetry published per estimate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TelemetryPayload {
    pub beacon_x: f64,
    pub beacon_y: f64,
    #[serde(rename = "rssi_A")]
    pub rssi_a: i32,
    #[serde(rename = "rssi_B")]
    pub rssi_b: i32,
    #[serde(rename = "distance_A")]
    pub distance_a: f64,
    #[serde(rename = "distance_B")]
    pub distance_b: f64,
}

impl TelemetryPayload {
    /// Build a payload, passing through scanner-reported distances when present
    pub fn new(estimate: &Estimate, reported_distance_a: Option<f64>, reported_distance_b: Option<f64>) -> Self {
        TelemetryPayload {
            beacon_x: estimate.x,
            beacon_y: estimate.y,
            rssi_a: estimate.rssi_a_filtered,
            rssi_b: estimate.rssi_b_filtered,
            distance_a: reported_distance_a.unwrap_or(estimate.distance_a),
            distance_b: reported_distance_b.unwrap_or(estimate.distance_b),
        }
    }
}

/// Position estimator for a single tracked beacon.
///
/// Owns its temporal filter; track several beacons by building one pipeline
/// each. The model artifact is shared read-only between pipelines.
#[derive(Debug, Clone)]
pub struct Pipeline {
    path_loss: PathLossModel,
    estimator: RegressionEstimator,
    correction: BiasCorrection,
    arena: Arena,
    filter: TemporalFilter,
    outlier_threshold_m: f64,
}

impl Pipeline {
    pub fn new(
        estimator: RegressionEstimator,
        correction: BiasCorrection,
        arena: Arena,
        filter: TemporalFilter,
    ) -> Self {
        Pipeline {
            path_loss: PathLossModel::default(),
            estimator,
            correction,
            arena,
            filter,
            outlier_threshold_m: DEFAULT_OUTLIER_THRESHOLD_M,
        }
    }

    pub fn from_config(config: &Config, artifact: Arc<ModelArtifact>) -> Self {
        Pipeline::new(
            RegressionEstimator::with_artifact(artifact),
            config.correction,
            config.arena,
            TemporalFilter::new(config.filter.window_size, config.filter.alpha),
        )
        .with_path_loss(config.distance)
        .with_outlier_threshold(config.filter.outlier_threshold_m)
    }

    pub fn with_path_loss(mut self, path_loss: PathLossModel) -> Self {
        self.path_loss = path_loss;
        self
    }

    pub fn with_outlier_threshold(mut self, threshold_m: f64) -> Self {
        self.outlier_threshold_m = threshold_m;
        self
    }

    pub fn filter(&self) -> &TemporalFilter {
        &self.filter
    }

    /// Estimate the beacon position from one raw RSSI pair
    pub fn estimate(&mut self, rssi_a: i32, rssi_b: i32) -> EstimatorResult<Estimate> {
        // Fail before touching filter state
        if !self.estimator.is_loaded() {
            return Err(EstimatorError::ModelNotLoaded);
        }

        let (filtered_a, filtered_b) = self.filter.filter_rssi(rssi_a, rssi_b);
        let features = build_features(filtered_a as f64, filtered_b as f64, &self.path_loss);
        let (distance_a, distance_b) = features.distances();

        let (raw_x, raw_y) = self.estimator.predict(features.as_slice())?;
        let (corrected_x, corrected_y) = self.correction.correct(raw_x, raw_y);
        let (x, y) = self.arena.clamp(corrected_x, corrected_y);
        debug!(
            "RSSI ({}, {}) -> filtered ({}, {}) -> corrected ({:.4}, {:.4}) -> clamped ({:.4}, {:.4})",
            rssi_a, rssi_b, filtered_a, filtered_b, corrected_x, corrected_y, x, y
        );

        let outlier = self.filter.is_outlier(x, y, self.outlier_threshold_m);
        if outlier {
            if let Some(jump) = self.filter.jump_distance(x, y) {
                warn!("Outlier detected: jump of {:.1} cm", jump * 100.0);
            }
        }

        let (x, y) = self.filter.filter_position(x, y);

        Ok(Estimate {
            x,
            y,
            rssi_a_filtered: filtered_a,
            rssi_b_filtered: filtered_b,
            distance_a,
            distance_b,
            outlier,
        })
    }
}
