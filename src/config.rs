use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::correction::BiasCorrection;
use crate::distance::PathLossModel;
use crate::pipeline::{Arena, DEFAULT_OUTLIER_THRESHOLD_M};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub distance: PathLossModel,
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub arena: Arena,
    #[serde(default)]
    pub correction: BiasCorrection,
    #[serde(default)]
    pub screening: ScreeningConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Path to the exported model artifact (JSON)
    pub path: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        ModelConfig {
            path: "model.json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Samples kept per history queue; 1 disables smoothing
    pub window_size: usize,
    /// Exponential blend factor, 0-1: low = smoother, high = more reactive
    pub alpha: f64,
    /// Jump (meters) reported as an outlier
    pub outlier_threshold_m: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        // Deployed with smoothing disabled
        FilterConfig {
            window_size: 1,
            alpha: 1.0,
            outlier_threshold_m: DEFAULT_OUTLIER_THRESHOLD_M,
        }
    }
}

/// Reading validity rules applied before samples reach the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreeningConfig {
    /// RSSI the scanners report when the beacon is not heard
    pub no_signal_rssi: i32,
    /// Reported distances at or below this (meters) are treated as invalid
    pub min_reported_distance_m: f64,
}

impl Default for ScreeningConfig {
    fn default() -> Self {
        ScreeningConfig {
            no_signal_rssi: -100,
            min_reported_distance_m: 0.01,
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: Config = serde_json::from_str(&content)
            .with_context(|| "Failed to parse config file")?;

        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}
