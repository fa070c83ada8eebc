//! Distance estimation from RSSI signal strength
//!
//! Log-Distance Path Loss Model anchored at a short reference distance:
//! distance = d0 * 10 ^ ((measured_power - rssi) / (10 * n))

use serde::{Deserialize, Serialize};

/// RSSI measured by the scanners at the reference distance (dBm)
pub const MEASURED_POWER_DBM: f64 = -84.0;
/// Path loss exponent fitted for the test box
pub const PATH_LOSS_EXPONENT: f64 = 2.8;
/// Reference distance for `MEASURED_POWER_DBM` (meters)
pub const REFERENCE_DISTANCE_M: f64 = 0.25;
/// Physically plausible range inside the arena (meters)
pub const MIN_DISTANCE_M: f64 = 0.03;
pub const MAX_DISTANCE_M: f64 = 0.45;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathLossModel {
    pub measured_power_dbm: f64,
    pub path_loss_exponent: f64,
    pub reference_distance_m: f64,
    pub min_distance_m: f64,
    pub max_distance_m: f64,
}

impl Default for PathLossModel {
    fn default() -> Self {
        PathLossModel {
            measured_power_dbm: MEASURED_POWER_DBM,
            path_loss_exponent: PATH_LOSS_EXPONENT,
            reference_distance_m: REFERENCE_DISTANCE_M,
            min_distance_m: MIN_DISTANCE_M,
            max_distance_m: MAX_DISTANCE_M,
        }
    }
}

impl PathLossModel {
    /// Estimate distance in meters from RSSI
    ///
    /// Always returns a value inside `[min_distance_m, max_distance_m]`,
    /// including for NaN or extreme input.
    pub fn distance(&self, rssi_dbm: f64) -> f64 {
        let ratio = (self.measured_power_dbm - rssi_dbm) / (10.0 * self.path_loss_exponent);
        let distance = self.reference_distance_m * 10.0_f64.powf(ratio);

        if distance.is_nan() {
            return self.min_distance_m;
        }
        // Bounds come from config; f64::clamp would panic if they were inverted
        distance.max(self.min_distance_m).min(self.max_distance_m)
    }

    /// Batch form of [`PathLossModel::distance`]
    pub fn distances(&self, rssi_dbm: &[f64]) -> Vec<f64> {
        rssi_dbm.iter().map(|&rssi| self.distance(rssi)).collect()
    }
}

/// Estimate distance in meters using the deployed calibration constants
pub fn rssi_to_distance(rssi_dbm: f64) -> f64 {
    PathLossModel::default().distance(rssi_dbm)
}

/// Batch version of [`rssi_to_distance`]
pub fn rssi_to_distances(rssi_dbm: &[f64]) -> Vec<f64> {
    PathLossModel::default().distances(rssi_dbm)
}

/// Format distance for display
pub fn format_distance(distance_m: f64) -> String {
    format!("{:.1}cm", distance_m * 100.0)
}
