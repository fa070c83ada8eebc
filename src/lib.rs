pub mod config;
pub mod correction;
pub mod distance;
pub mod error;
pub mod features;
pub mod filter;
pub mod fingerprint;
pub mod model;
pub mod pipeline;
pub mod replay;

pub use config::Config;
pub use distance::rssi_to_distance;
pub use error::EstimatorError;
pub use pipeline::{Estimate, Pipeline};
