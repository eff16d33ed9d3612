// src/error.rs
// Error taxonomy for the persona pipeline.

use thiserror::Error;

/// Failure of a single model completion call.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GatewayError {
    /// Credentials were rejected. Every later call would fail the same way.
    #[error("model credentials rejected: {0}")]
    Unauthorized(String),

    #[error("model unavailable: {0}")]
    Unavailable(String),

    #[error("model returned an empty response")]
    EmptyResponse,
}

impl GatewayError {
    /// Fatal errors abort the whole pipeline instead of degrading one batch.
    pub fn is_fatal(&self) -> bool {
        matches!(self, GatewayError::Unauthorized(_))
    }
}

/// Failure while turning one batch into personas.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("malformed model output: {0}")]
    MalformedOutput(String),
}

impl ExtractionError {
    /// Transient gateway failures are worth another attempt; bad JSON is not.
    pub fn is_retryable(&self) -> bool {
        match self {
            ExtractionError::Gateway(e) => !e.is_fatal(),
            ExtractionError::MalformedOutput(_) => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("analysis aborted: {0}")]
    Gateway(#[source] GatewayError),
}
