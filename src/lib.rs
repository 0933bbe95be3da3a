//! cf-behavior - Coordinate Frame behaviour analysis
//!
//! Bootstrap estimators of percent correct and response probability for
//! ferrets localising sounds under head-centred and world-centred task rules,
//! plus the sinusoidal-logistic response model used to simulate and fit
//! response curves.

pub mod angles;
pub mod bootstrap;
pub mod config;
pub mod format;
pub mod model;
pub mod output;
pub mod pipeline;
pub mod simulate;
pub mod stats;
pub mod subjects;
pub mod trials;

use thiserror::Error;

// Re-export main types
pub use angles::{duplicate_boundary_for_plotting, wrap_to_180};
pub use bootstrap::{
    estimate_joint, estimate_rate, resample_and_aggregate, BootstrapConfig, JointSurface,
    RateEstimate, RateScale, ResponseCount,
};
pub use config::{AnalysisConfig, FigureStyle};
pub use model::{activation, softmax_probability, CircularParams};
pub use subjects::{Frame, Subject, SUBJECTS};
pub use trials::{Trial, TrialTable};

#[derive(Debug, Error)]
pub enum CfError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("{source_name}: missing required column '{column}'")]
    MissingColumn {
        column: &'static str,
        source_name: String,
    },
    #[error("no usable data: {0}")]
    EmptyInput(String),
    #[error("plot error: {0}")]
    Plot(String),
}
