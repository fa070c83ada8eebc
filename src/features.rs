use crate::distance::PathLossModel;

/// Number of features produced per sample
pub const FEATURE_COUNT: usize = 7;

/// Column names in artifact order. Artifacts are trained against this order;
/// changing it means retraining.
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "rssi_A",
    "rssi_B",
    "rssi_diff",
    "rssi_sum",
    "rssi_ratio",
    "dist_A",
    "dist_B",
];

/// Offset applied to the ratio denominator
const RATIO_OFFSET: f64 = 0.01;

/// `[rssi_A, rssi_B, rssi_diff, rssi_sum, rssi_ratio, dist_A, dist_B]`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureVector([f64; FEATURE_COUNT]);

impl FeatureVector {
    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn rssi_ratio(&self) -> f64 {
        self.0[4]
    }

    pub fn distances(&self) -> (f64, f64) {
        (self.0[5], self.0[6])
    }
}

/// Build the feature vector for one pair of (filtered) RSSI readings
pub fn build_features(rssi_a: f64, rssi_b: f64, path_loss: &PathLossModel) -> FeatureVector {
    // rssi_B is never 0 dBm in practice; the guard only avoids a trap
    let rssi_ratio = if rssi_b == 0.0 {
        0.0
    } else {
        rssi_a / (rssi_b - RATIO_OFFSET)
    };

    FeatureVector([
        rssi_a,
        rssi_b,
        rssi_a - rssi_b,
        rssi_a + rssi_b,
        rssi_ratio,
        path_loss.distance(rssi_a),
        path_loss.distance(rssi_b),
    ])
}

/// Build one feature row per reading pair, identical to calling
/// [`build_features`] on each pair
pub fn build_feature_matrix(pairs: &[(f64, f64)], path_loss: &PathLossModel) -> Vec<FeatureVector> {
    pairs
        .iter()
        .map(|&(rssi_a, rssi_b)| build_features(rssi_a, rssi_b, path_loss))
        .collect()
}
