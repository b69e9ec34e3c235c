//! Error taxonomy surfaced at the orchestrator boundary.
//!
//! Stage implementations work in `anyhow::Result`; the orchestrators convert
//! whatever a stage returns into a [`VerifyError`] tagged with the [`Stage`]
//! that failed. A missing-evidence outcome is a normal result, not an error.

use std::fmt;
use thiserror::Error;

/// Pipeline stage a failure originated from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Stage {
    Translate,
    Fetch,
    Connect,
    Split,
    Select,
    Verify,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Translate => "translator",
            Stage::Fetch => "evidence fetcher",
            Stage::Connect => "sentence connector",
            Stage::Split => "claim splitter",
            Stage::Select => "evidence selector",
            Stage::Verify => "statement verifier",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("model {model} unavailable: {reason}")]
    ModelUnavailable { model: String, reason: String },

    #[error("invalid fetch request: {0}")]
    InvalidFetchRequest(String),

    #[error("{stage} failed: {source:#}")]
    Stage {
        stage: Stage,
        #[source]
        source: anyhow::Error,
    },

    #[error("worker task failed: {0}")]
    Join(String),
}

impl VerifyError {
    /// Tag a collaborator failure with its stage. Errors that already carry a
    /// taxonomy variant (a model that failed to load inside the verifier, a
    /// rejected fetch request) pass through unchanged.
    pub fn stage(stage: Stage, err: anyhow::Error) -> Self {
        match err.downcast::<VerifyError>() {
            Ok(known) => known,
            Err(source) => VerifyError::Stage { stage, source },
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, VerifyError::ModelUnavailable { .. })
    }
}

pub type Result<T> = std::result::Result<T, VerifyError>;
