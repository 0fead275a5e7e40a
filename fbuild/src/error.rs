use thiserror::Error;

use crate::types::Phase;

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("source archive integrity check failed: expected sha256 {expected}, got {actual}")]
    IntegrityFailed { expected: String, actual: String },

    #[error("source generation failed: {0}")]
    GenerationFailed(String),

    #[error("build failed: {0}")]
    BuildFailed(String),

    #[error("install failed: {0}")]
    InstallFailed(String),

    #[error("verification failed: {0}")]
    VerificationFailed(String),

    #[error("fetching sources failed: {0}")]
    Fetch(String),

    #[error("formula error: {0}")]
    Formula(#[from] fbuild_meta::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BuildError {
    /// The workflow phase this error halted at
    pub fn phase(&self) -> Phase {
        match self {
            BuildError::IntegrityFailed { .. } | BuildError::Fetch(_) => Phase::Staging,
            BuildError::GenerationFailed(_) => Phase::Generating,
            BuildError::BuildFailed(_) => Phase::Building,
            BuildError::InstallFailed(_) => Phase::Installing,
            BuildError::VerificationFailed(_) => Phase::Verifying,
            BuildError::Formula(_) | BuildError::Io(_) => Phase::Staging,
        }
    }
}

pub type Result<T> = std::result::Result<T, BuildError>;
