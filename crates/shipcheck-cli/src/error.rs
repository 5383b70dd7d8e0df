//! Error types for the CLI

/// CLI Result type
pub type Result<T> = std::result::Result<T, Error>;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Harness(#[from] shipcheck_common::Error),

    #[error(transparent)]
    Telemetry(#[from] shipcheck_common::telemetry::TelemetryError),

    #[error("validation error: {message}")]
    Validation { message: String },

    #[error("{0}")]
    ScenariosFailed(String),
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation {
            message: message.into(),
        }
    }
}
