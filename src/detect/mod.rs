//! Anomaly scoring: per-channel z-score tests, a batch-local isolation
//! forest, and the consensus that combines them.

pub mod engine;
pub mod forest;
pub mod multivariate;
pub mod univariate;

pub use engine::AnomalyEngine;
pub use forest::{ForestParams, IsolationForest};
pub use multivariate::{MultivariateFlagger, MultivariateFlags, OutlierLabel};
pub use univariate::{UnivariateFlagger, ZScores};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which flaggers run, and so which signals feed the consensus column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DetectionMode {
    #[default]
    Both,
    #[serde(rename = "zscore")]
    #[value(name = "zscore")]
    ZScore,
    Multivariate,
}

impl DetectionMode {
    pub fn uses_zscore(self) -> bool {
        matches!(self, DetectionMode::Both | DetectionMode::ZScore)
    }

    pub fn uses_multivariate(self) -> bool {
        matches!(self, DetectionMode::Both | DetectionMode::Multivariate)
    }
}

impl fmt::Display for DetectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetectionMode::Both => write!(f, "both"),
            DetectionMode::ZScore => write!(f, "zscore"),
            DetectionMode::Multivariate => write!(f, "multivariate"),
        }
    }
}
