//! Planning pipeline errors

use std::fmt;

use thiserror::Error;

/// Pipeline stage an internal fault occurred in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanningStage {
    MatrixBuild,
    Construction,
}

impl fmt::Display for PlanningStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlanningStage::MatrixBuild => "matrix build",
            PlanningStage::Construction => "construction",
        };
        f.write_str(name)
    }
}

/// Errors that fail a whole planning request
///
/// Resolution misses, unreachable cells, unseeded drivers and overflow are
/// reported as data, never through this type.
#[derive(Debug, Error)]
pub enum PlanningError {
    #[error("invalid request: {0}")]
    InvalidInput(String),

    #[error("internal fault in region {region} during {stage}: {source}")]
    Internal {
        region: String,
        stage: PlanningStage,
        source: tokio::task::JoinError,
    },
}

impl PlanningError {
    /// Wire error code
    pub fn code(&self) -> &'static str {
        match self {
            PlanningError::InvalidInput(_) => "INVALID_REQUEST",
            PlanningError::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    /// Region and stage of an internal fault
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            PlanningError::InvalidInput(_) => None,
            PlanningError::Internal { region, stage, .. } => Some(serde_json::json!({
                "region": region,
                "stage": stage.to_string(),
            })),
        }
    }
}
