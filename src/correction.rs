use log::warn;
use serde::{Deserialize, Serialize};

const CM_PER_M: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BiasCorrection {
    pub a_x: f64,
    pub b_x: f64,
    pub a_y: f64,
    pub b_y: f64,
}

impl Default for BiasCorrection {
    fn default() -> Self {
        // Fit against the current random forest export
        BiasCorrection {
            a_x: 1.0034749150752216,
            b_x: -0.9102480814066709,
            a_y: 1.0940957103426003,
            b_y: -1.2482754876048894,
        }
    }
}

impl BiasCorrection {
    pub fn identity() -> Self {
        BiasCorrection {
            a_x: 1.0,
            b_x: 0.0,
            a_y: 1.0,
            b_y: 0.0,
        }
    }

    /// Correct a raw `(x, y)` in meters; the affine map is applied in centimeters
    pub fn correct(&self, x_m: f64, y_m: f64) -> (f64, f64) {
        let x_cm = self.a_x * (x_m * CM_PER_M) + self.b_x;
        let y_cm = self.a_y * (y_m * CM_PER_M) + self.b_y;
        (x_cm / CM_PER_M, y_cm / CM_PER_M)
    }

    /// Fit both axes by least squares from predicted and true positions in cm
    pub fn fit(predicted_cm: &[(f64, f64)], truth_cm: &[(f64, f64)]) -> Self {
        let pred_x: Vec<f64> = predicted_cm.iter().map(|p| p.0).collect();
        let pred_y: Vec<f64> = predicted_cm.iter().map(|p| p.1).collect();
        let true_x: Vec<f64> = truth_cm.iter().map(|p| p.0).collect();
        let true_y: Vec<f64> = truth_cm.iter().map(|p| p.1).collect();

        let (a_x, b_x) = fit_axis(&pred_x, &true_x).unwrap_or_else(|| {
            warn!("Cannot fit X correction (degenerate data), using identity");
            (1.0, 0.0)
        });
        let (a_y, b_y) = fit_axis(&pred_y, &true_y).unwrap_or_else(|| {
            warn!("Cannot fit Y correction (degenerate data), using identity");
            (1.0, 0.0)
        });

        BiasCorrection { a_x, b_x, a_y, b_y }
    }
}

/// Ordinary least squares `truth = a * predicted + b`
fn fit_axis(predicted: &[f64], truth: &[f64]) -> Option<(f64, f64)> {
    let n = predicted.len().min(truth.len());
    if n < 2 {
        return None;
    }

    let mean_p = predicted[..n].iter().sum::<f64>() / n as f64;
    let mean_t = truth[..n].iter().sum::<f64>() / n as f64;

    let (covariance, variance) = predicted[..n]
        .iter()
        .zip(truth[..n].iter())
        .fold((0.0, 0.0), |(cov, var), (p, t)| {
            (cov + (p - mean_p) * (t - mean_t), var + (p - mean_p) * (p - mean_p))
        });

    if variance.abs() < f64::EPSILON {
        return None;
    }

    let a = covariance / variance;
    Some((a, mean_t - a * mean_p))
}

/// Error statistics (cm) of a calibration run
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ErrorStats {
    pub mean_cm: f64,
    pub median_cm: f64,
    pub max_cm: f64,
}

impl ErrorStats {
    /// Euclidean error between predicted and true positions in cm
    pub fn from_positions(predicted_cm: &[(f64, f64)], truth_cm: &[(f64, f64)]) -> Option<Self> {
        let mut errors: Vec<f64> = predicted_cm
            .iter()
            .zip(truth_cm.iter())
            .map(|(p, t)| ((p.0 - t.0).powi(2) + (p.1 - t.1).powi(2)).sqrt())
            .collect();
        if errors.is_empty() {
            return None;
        }
        errors.sort_by(|a, b| a.total_cmp(b));

        let len = errors.len();
        let median_cm = if len % 2 == 0 {
            (errors[len / 2 - 1] + errors[len / 2]) / 2.0
        } else {
            errors[len / 2]
        };

        Some(ErrorStats {
            mean_cm: errors.iter().sum::<f64>() / len as f64,
            median_cm,
            max_cm: errors[len - 1],
        })
    }
}

/// Outcome of fitting coefficients against a labelled dataset
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CalibrationReport {
    pub coefficients: BiasCorrection,
    pub before: ErrorStats,
    pub after: ErrorStats,
}

impl CalibrationReport {
    pub fn build(predicted_cm: &[(f64, f64)], truth_cm: &[(f64, f64)]) -> Option<Self> {
        let coefficients = BiasCorrection::fit(predicted_cm, truth_cm);
        let corrected: Vec<(f64, f64)> = predicted_cm
            .iter()
            .map(|&(x, y)| {
                (
                    coefficients.a_x * x + coefficients.b_x,
                    coefficients.a_y * y + coefficients.b_y,
                )
            })
            .collect();

        Some(CalibrationReport {
            coefficients,
            before: ErrorStats::from_positions(predicted_cm, truth_cm)?,
            after: ErrorStats::from_positions(&corrected, truth_cm)?,
        })
    }

    /// Relative improvement of the mean error, in percent
    pub fn improvement_percent(&self) -> f64 {
        if self.before.mean_cm == 0.0 {
            return 0.0;
        }
        (self.before.mean_cm - self.after.mean_cm) / self.before.mean_cm * 100.0
    }
}
