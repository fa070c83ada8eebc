use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::error::{EstimatorError, EstimatorResult};
use crate::features::FEATURE_COUNT;

/// Capability shared by every regressor variant: one feature vector in,
/// one scalar out
pub trait Regressor {
    fn predict(&self, features: &[f64]) -> f64;

    /// Short human-readable algorithm name
    fn name(&self) -> &'static str;
}

/// Per-feature affine standardization: `(value - mean) / scale`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

impl StandardScaler {
    /// Pass-through scaler used for artifacts exported without one
    pub fn identity(n_features: usize) -> Self {
        StandardScaler {
            mean: vec![0.0; n_features],
            scale: vec![1.0; n_features],
        }
    }

    pub fn n_features(&self) -> usize {
        self.mean.len()
    }

    pub fn transform(&self, features: &[f64]) -> EstimatorResult<Vec<f64>> {
        if features.len() != self.n_features() {
            return Err(EstimatorError::FeatureShape {
                expected: self.n_features(),
                actual: features.len(),
            });
        }

        Ok(features
            .iter()
            .zip(self.mean.iter().zip(self.scale.iter()))
            .map(|(value, (mean, scale))| {
                // Constant columns are stored with scale 0; treat as unit scale
                let scale = if *scale == 0.0 { 1.0 } else { *scale };
                (value - mean) / scale
            })
            .collect())
    }

    fn validate(&self) -> EstimatorResult<()> {
        if self.mean.len() != self.scale.len() {
            return Err(EstimatorError::Artifact(format!(
                "scaler has {} means but {} scales",
                self.mean.len(),
                self.scale.len()
            )));
        }
        if self.mean.is_empty() {
            return Err(EstimatorError::Artifact("scaler is empty".to_string()));
        }
        Ok(())
    }
}

/// k-nearest-neighbours regressor with inverse-distance weighting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnnRegressor {
    pub k: usize,
    /// Standardized training features, one row per fingerprint
    pub train_x: Vec<Vec<f64>>,
    pub train_y: Vec<f64>,
}

impl Regressor for KnnRegressor {
    fn predict(&self, features: &[f64]) -> f64 {
        let mut neighbours: Vec<(f64, f64)> = self
            .train_x
            .iter()
            .zip(self.train_y.iter())
            .map(|(row, target)| (euclidean(row, features), *target))
            .collect();
        neighbours.sort_by(|a, b| a.0.total_cmp(&b.0));
        neighbours.truncate(self.k.max(1));

        // Exact matches take all the weight
        let exact: Vec<f64> = neighbours
            .iter()
            .filter(|(distance, _)| *distance == 0.0)
            .map(|(_, target)| *target)
            .collect();
        if !exact.is_empty() {
            return exact.iter().sum::<f64>() / exact.len() as f64;
        }

        let (weighted, total) = neighbours
            .iter()
            .fold((0.0, 0.0), |(weighted, total), (distance, target)| {
                let weight = 1.0 / distance;
                (weighted + weight * target, total + weight)
            });
        weighted / total
    }

    fn name(&self) -> &'static str {
        "knn"
    }
}

impl KnnRegressor {
    fn validate(&self, n_features: usize) -> EstimatorResult<()> {
        if self.train_x.is_empty() {
            return Err(EstimatorError::Artifact("knn has no training rows".to_string()));
        }
        if self.train_x.len() != self.train_y.len() {
            return Err(EstimatorError::Artifact(format!(
                "knn has {} rows but {} targets",
                self.train_x.len(),
                self.train_y.len()
            )));
        }
        if let Some(row) = self.train_x.iter().find(|row| row.len() != n_features) {
            return Err(EstimatorError::Artifact(format!(
                "knn row has {} features, scaler has {}",
                row.len(),
                n_features
            )));
        }
        Ok(())
    }
}

/// One node of a fitted decision tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TreeNode {
    /// Go to `left` when `x[feature] <= threshold`, else `right`
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        value: f64,
    },
}

/// Decision tree stored as a flat node list, root first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    pub nodes: Vec<TreeNode>,
}

impl DecisionTree {
    fn predict(&self, features: &[f64]) -> f64 {
        let mut index = 0;
        loop {
            match self.nodes.get(index) {
                Some(TreeNode::Leaf { value }) => return *value,
                Some(TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                }) => {
                    let value = features.get(*feature).copied().unwrap_or(f64::NAN);
                    index = if value <= *threshold { *left } else { *right };
                }
                // Unreachable once validated
                None => return 0.0,
            }
        }
    }

    fn validate(&self, n_features: usize) -> EstimatorResult<()> {
        if self.nodes.is_empty() {
            return Err(EstimatorError::Artifact("tree has no nodes".to_string()));
        }
        for (index, node) in self.nodes.iter().enumerate() {
            if let TreeNode::Split {
                feature,
                left,
                right,
                ..
            } = node
            {
                if *feature >= n_features {
                    return Err(EstimatorError::Artifact(format!(
                        "node {} splits on feature {} of {}",
                        index, feature, n_features
                    )));
                }
                // Children always follow their parent, which rules out cycles
                for child in [left, right] {
                    if *child <= index || *child >= self.nodes.len() {
                        return Err(EstimatorError::Artifact(format!(
                            "node {} has invalid child {}",
                            index, child
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Tree ensemble; prediction is the mean of all trees
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForestRegressor {
    pub trees: Vec<DecisionTree>,
}

impl Regressor for RandomForestRegressor {
    fn predict(&self, features: &[f64]) -> f64 {
        let sum: f64 = self.trees.iter().map(|tree| tree.predict(features)).sum();
        sum / self.trees.len() as f64
    }

    fn name(&self) -> &'static str {
        "random_forest"
    }
}

impl RandomForestRegressor {
    fn validate(&self, n_features: usize) -> EstimatorResult<()> {
        if self.trees.is_empty() {
            return Err(EstimatorError::Artifact("forest has no trees".to_string()));
        }
        self.trees.iter().try_for_each(|tree| tree.validate(n_features))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearRegressor {
    pub coefficients: Vec<f64>,
    pub intercept: f64,
}

impl Regressor for LinearRegressor {
    fn predict(&self, features: &[f64]) -> f64 {
        self.intercept
            + self
                .coefficients
                .iter()
                .zip(features.iter())
                .map(|(c, x)| c * x)
                .sum::<f64>()
    }

    fn name(&self) -> &'static str {
        "linear"
    }
}

/// Any regressor an artifact may carry, tagged by `kind`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RegressorModel {
    Knn(KnnRegressor),
    RandomForest(RandomForestRegressor),
    Linear(LinearRegressor),
}

impl RegressorModel {
    fn validate(&self, n_features: usize) -> EstimatorResult<()> {
        match self {
            RegressorModel::Knn(model) => model.validate(n_features),
            RegressorModel::RandomForest(model) => model.validate(n_features),
            RegressorModel::Linear(model) if model.coefficients.len() != n_features => {
                Err(EstimatorError::Artifact(format!(
                    "linear model has {} coefficients, scaler has {}",
                    model.coefficients.len(),
                    n_features
                )))
            }
            RegressorModel::Linear(_) => Ok(()),
        }
    }
}

impl Regressor for RegressorModel {
    fn predict(&self, features: &[f64]) -> f64 {
        match self {
            RegressorModel::Knn(model) => model.predict(features),
            RegressorModel::RandomForest(model) => model.predict(features),
            RegressorModel::Linear(model) => model.predict(features),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            RegressorModel::Knn(model) => model.name(),
            RegressorModel::RandomForest(model) => model.name(),
            RegressorModel::Linear(model) => model.name(),
        }
    }
}

/// On-disk artifact layouts, tagged by `format`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "snake_case")]
pub enum ArtifactFile {
    /// Early exports: a single model for both axes and no scaler
    Legacy { model: RegressorModel },
    V2 {
        scaler: StandardScaler,
        model_x: RegressorModel,
        model_y: RegressorModel,
        #[serde(default)]
        model_type_x: Option<String>,
        #[serde(default)]
        model_type_y: Option<String>,
    },
}

const UNKNOWN_MODEL_TYPE: &str = "Unknown";

/// Loaded, validated model artifact. Read-only once built.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelArtifact {
    scaler: StandardScaler,
    model_x: RegressorModel,
    model_y: RegressorModel,
    model_type_x: String,
    model_type_y: String,
}

impl ModelArtifact {
    pub fn new(
        scaler: StandardScaler,
        model_x: RegressorModel,
        model_y: RegressorModel,
    ) -> EstimatorResult<Self> {
        scaler.validate()?;
        model_x.validate(scaler.n_features())?;
        model_y.validate(scaler.n_features())?;

        Ok(ModelArtifact {
            scaler,
            model_x,
            model_y,
            model_type_x: UNKNOWN_MODEL_TYPE.to_string(),
            model_type_y: UNKNOWN_MODEL_TYPE.to_string(),
        })
    }

    /// Attach the diagnostic model-type tags recorded at training time
    pub fn with_model_types(mut self, model_type_x: impl Into<String>, model_type_y: impl Into<String>) -> Self {
        self.model_type_x = model_type_x.into();
        self.model_type_y = model_type_y.into();
        self
    }

    pub fn from_file(file: ArtifactFile) -> EstimatorResult<Self> {
        match file {
            ArtifactFile::Legacy { model } => {
                warn!("Legacy model artifact without scaler, using the same model for X and Y");
                ModelArtifact::new(
                    StandardScaler::identity(FEATURE_COUNT),
                    model.clone(),
                    model,
                )
            }
            ArtifactFile::V2 {
                scaler,
                model_x,
                model_y,
                model_type_x,
                model_type_y,
            } => Ok(ModelArtifact::new(scaler, model_x, model_y)?.with_model_types(
                model_type_x.unwrap_or_else(|| UNKNOWN_MODEL_TYPE.to_string()),
                model_type_y.unwrap_or_else(|| UNKNOWN_MODEL_TYPE.to_string()),
            )),
        }
    }

    pub fn from_json(content: &str) -> EstimatorResult<Self> {
        let file: ArtifactFile =
            serde_json::from_str(content).map_err(|e| EstimatorError::Artifact(e.to_string()))?;
        ModelArtifact::from_file(file)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read model artifact: {:?}", path.as_ref()))?;

        let artifact = ModelArtifact::from_json(&content)
            .with_context(|| format!("Failed to load model artifact: {:?}", path.as_ref()))?;

        info!("Model X loaded: {} ({})", artifact.model_type_x, artifact.model_x.name());
        info!("Model Y loaded: {} ({})", artifact.model_type_y, artifact.model_y.name());
        Ok(artifact)
    }

    pub fn scaler(&self) -> &StandardScaler {
        &self.scaler
    }

    pub fn model_x(&self) -> &RegressorModel {
        &self.model_x
    }

    pub fn model_y(&self) -> &RegressorModel {
        &self.model_y
    }

    pub fn model_type_x(&self) -> &str {
        &self.model_type_x
    }

    pub fn model_type_y(&self) -> &str {
        &self.model_type_y
    }
}

/// Runs the scaler and both axis regressors over a feature vector
#[derive(Debug, Clone, Default)]
pub struct RegressionEstimator {
    artifact: Option<Arc<ModelArtifact>>,
}

impl RegressionEstimator {
    /// Estimator with no artifact; `predict` fails until one is loaded
    pub fn new() -> Self {
        RegressionEstimator { artifact: None }
    }

    pub fn with_artifact(artifact: Arc<ModelArtifact>) -> Self {
        RegressionEstimator {
            artifact: Some(artifact),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.artifact.is_some()
    }

    /// Raw `(x, y)` in meters
    pub fn predict(&self, features: &[f64]) -> EstimatorResult<(f64, f64)> {
        let artifact = self.artifact.as_ref().ok_or(EstimatorError::ModelNotLoaded)?;
        let scaled = artifact.scaler.transform(features)?;

        let x = artifact.model_x.predict(&scaled);
        let y = artifact.model_y.predict(&scaled);
        debug!("Raw model output: ({:.4}, {:.4}) m", x, y);

        Ok((x, y))
    }
}

fn euclidean(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(p, q)| (p - q) * (p - q))
        .sum::<f64>()
        .sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constant(value: f64) -> RegressorModel {
        RegressorModel::Linear(LinearRegressor {
            coefficients: vec![0.0; FEATURE_COUNT],
            intercept: value,
        })
    }

    fn features() -> Vec<f64> {
        vec![-60.0, -65.0, 5.0, -125.0, 0.92, 0.12, 0.18]
    }

    #[test]
    fn test_scaler_transform() {
        let scaler = StandardScaler {
            mean: vec![1.0, 2.0],
            scale: vec![2.0, 0.0],
        };
        let scaled = scaler.transform(&[5.0, 7.0]).unwrap();
        assert_eq!(scaled, vec![2.0, 5.0]);
    }

    #[test]
    fn test_scaler_shape_mismatch() {
        let scaler = StandardScaler::identity(FEATURE_COUNT);
        let err = scaler.transform(&[1.0, 2.0]).unwrap_err();
        assert_eq!(
            err,
            EstimatorError::FeatureShape {
                expected: FEATURE_COUNT,
                actual: 2
            }
        );
    }

    #[test]
    fn test_predict_without_model() {
        let estimator = RegressionEstimator::new();
        assert!(!estimator.is_loaded());
        assert_eq!(
            estimator.predict(&features()).unwrap_err(),
            EstimatorError::ModelNotLoaded
        );
    }

    #[test]
    fn test_predict_axes_independent() {
        let artifact = ModelArtifact::new(
            StandardScaler::identity(FEATURE_COUNT),
            constant(0.10),
            constant(0.20),
        )
        .unwrap();
        let estimator = RegressionEstimator::with_artifact(Arc::new(artifact));

        let (x, y) = estimator.predict(&features()).unwrap();
        assert_eq!(x, 0.10);
        assert_eq!(y, 0.20);
    }

    #[test]
    fn test_predict_wrong_shape() {
        let artifact = ModelArtifact::new(StandardScaler::identity(3), constant_n(3), constant_n(3)).unwrap();
        let estimator = RegressionEstimator::with_artifact(Arc::new(artifact));

        assert_eq!(
            estimator.predict(&features()).unwrap_err(),
            EstimatorError::FeatureShape {
                expected: 3,
                actual: FEATURE_COUNT
            }
        );
    }

    fn constant_n(n: usize) -> RegressorModel {
        RegressorModel::Linear(LinearRegressor {
            coefficients: vec![0.0; n],
            intercept: 0.0,
        })
    }

    #[test]
    fn test_knn_distance_weighting() {
        let knn = KnnRegressor {
            k: 2,
            train_x: vec![vec![0.0], vec![1.0], vec![10.0]],
            train_y: vec![0.0, 3.0, 100.0],
        };
        // Distances 0.25 and 0.75: weights 4 and 4/3
        let prediction = knn.predict(&[0.25]);
        let expected = (4.0 * 0.0 + (4.0 / 3.0) * 3.0) / (4.0 + 4.0 / 3.0);
        assert!((prediction - expected).abs() < 1e-12);
    }

    #[test]
    fn test_knn_exact_match() {
        let knn = KnnRegressor {
            k: 3,
            train_x: vec![vec![1.0], vec![1.0], vec![2.0]],
            train_y: vec![0.1, 0.3, 0.9],
        };
        assert!((knn.predict(&[1.0]) - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_forest_mean_of_trees() {
        let tree = |low: f64, high: f64| DecisionTree {
            nodes: vec![
                TreeNode::Split {
                    feature: 0,
                    threshold: 0.5,
                    left: 1,
                    right: 2,
                },
                TreeNode::Leaf { value: low },
                TreeNode::Leaf { value: high },
            ],
        };
        let forest = RandomForestRegressor {
            trees: vec![tree(0.1, 0.2), tree(0.3, 0.4)],
        };

        assert!((forest.predict(&[0.0]) - 0.2).abs() < 1e-12);
        assert!((forest.predict(&[1.0]) - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_tree_rejects_backward_child() {
        let forest = RandomForestRegressor {
            trees: vec![DecisionTree {
                nodes: vec![
                    TreeNode::Split {
                        feature: 0,
                        threshold: 0.0,
                        left: 0,
                        right: 1,
                    },
                    TreeNode::Leaf { value: 1.0 },
                ],
            }],
        };
        assert!(matches!(
            forest.validate(FEATURE_COUNT),
            Err(EstimatorError::Artifact(_))
        ));
    }

    #[test]
    fn test_load_v2_json() {
        let json = r#"{
            "format": "v2",
            "scaler": {"mean": [0,0,0,0,0,0,0], "scale": [1,1,1,1,1,1,1]},
            "model_x": {"kind": "linear", "coefficients": [0,0,0,0,0,0,0], "intercept": 0.15},
            "model_y": {
                "kind": "random_forest",
                "trees": [{"nodes": [{"value": 0.05}]}]
            },
            "model_type_x": "Linear",
            "model_type_y": "Random Forest"
        }"#;

        let artifact = ModelArtifact::from_json(json).unwrap();
        assert_eq!(artifact.model_type_x(), "Linear");
        assert_eq!(artifact.model_type_y(), "Random Forest");
        assert_eq!(artifact.model_y().name(), "random_forest");

        let estimator = RegressionEstimator::with_artifact(Arc::new(artifact));
        let (x, y) = estimator.predict(&features()).unwrap();
        assert!((x - 0.15).abs() < 1e-12);
        assert!((y - 0.05).abs() < 1e-12);
    }

    #[test]
    fn test_load_legacy_json() {
        let json = r#"{
            "format": "legacy",
            "model": {"kind": "knn", "k": 1, "train_x": [[-60,-65,5,-125,0.92,0.12,0.18]], "train_y": [0.12]}
        }"#;

        let artifact = ModelArtifact::from_json(json).unwrap();
        assert_eq!(artifact.model_type_x(), "Unknown");
        assert_eq!(artifact.model_x(), artifact.model_y());
        assert_eq!(artifact.scaler(), &StandardScaler::identity(FEATURE_COUNT));
    }

    #[test]
    fn test_load_rejects_unknown_format() {
        let err = ModelArtifact::from_json(r#"{"format": "v9"}"#).unwrap_err();
        assert!(matches!(err, EstimatorError::Artifact(_)));
    }

    #[test]
    fn test_load_rejects_mismatched_model() {
        let json = r#"{
            "format": "v2",
            "scaler": {"mean": [0,0,0,0,0,0,0], "scale": [1,1,1,1,1,1,1]},
            "model_x": {"kind": "linear", "coefficients": [0,0], "intercept": 0.15},
            "model_y": {"kind": "linear", "coefficients": [0,0,0,0,0,0,0], "intercept": 0.15}
        }"#;
        assert!(matches!(
            ModelArtifact::from_json(json),
            Err(EstimatorError::Artifact(_))
        ));
    }

    const SCALER: &str = r#"{"mean": [0,0,0,0,0,0,0], "scale": [1,1,1,1,1,1,1]}"#;
    const LINEAR: &str = r#"{"kind": "linear", "coefficients": [0,0,0,0,0,0,0], "intercept": 0.1}"#;

    fn assert_rejected(scaler: &str, model_x: &str) {
        let json = format!(
            r#"{{"format": "v2", "scaler": {}, "model_x": {}, "model_y": {}}}"#,
            scaler, model_x, LINEAR
        );
        let result = ModelArtifact::from_json(&json);
        assert!(
            matches!(result, Err(EstimatorError::Artifact(_))),
            "accepted: {}",
            json
        );
    }

    #[test]
    fn test_load_rejects_scaler_length_mismatch() {
        assert_rejected(r#"{"mean": [0,0,0,0,0,0,0], "scale": [1,1,1]}"#, LINEAR);
    }

    #[test]
    fn test_load_rejects_empty_scaler() {
        assert_rejected(r#"{"mean": [], "scale": []}"#, LINEAR);
    }

    #[test]
    fn test_load_rejects_knn_without_rows() {
        assert_rejected(SCALER, r#"{"kind": "knn", "k": 3, "train_x": [], "train_y": []}"#);
    }

    #[test]
    fn test_load_rejects_knn_target_count() {
        assert_rejected(
            SCALER,
            r#"{"kind": "knn", "k": 1, "train_x": [[0,0,0,0,0,0,0]], "train_y": [0.1, 0.2]}"#,
        );
    }

    #[test]
    fn test_load_rejects_knn_row_width() {
        assert_rejected(
            SCALER,
            r#"{"kind": "knn", "k": 1, "train_x": [[0,0,0,0,0,0,0], [0,0,0]], "train_y": [0.1, 0.2]}"#,
        );
    }

    #[test]
    fn test_load_rejects_empty_forest() {
        assert_rejected(SCALER, r#"{"kind": "random_forest", "trees": []}"#);
    }

    #[test]
    fn test_load_rejects_empty_tree() {
        assert_rejected(SCALER, r#"{"kind": "random_forest", "trees": [{"nodes": []}]}"#);
    }

    #[test]
    fn test_load_rejects_split_on_missing_feature() {
        assert_rejected(
            SCALER,
            r#"{"kind": "random_forest", "trees": [{"nodes": [
                {"feature": 7, "threshold": 0.0, "left": 1, "right": 2},
                {"value": 0.1},
                {"value": 0.2}
            ]}]}"#,
        );
    }

    #[test]
    fn test_load_rejects_child_past_end() {
        assert_rejected(
            SCALER,
            r#"{"kind": "random_forest", "trees": [{"nodes": [
                {"feature": 0, "threshold": 0.0, "left": 1, "right": 5},
                {"value": 0.1}
            ]}]}"#,
        );
    }

    #[test]
    fn test_load_accepts_baseline() {
        let json = format!(
            r#"{{"format": "v2", "scaler": {}, "model_x": {}, "model_y": {}}}"#,
            SCALER, LINEAR, LINEAR
        );
        assert!(ModelArtifact::from_json(&json).is_ok());
    }
}
