use thiserror::Error;

/// Errors surfaced by the projection engine and its storage/export helpers.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProjectionError {
    #[error("ages must satisfy current <= retirement <= end (got {current}, {retirement}, {end})")]
    InvalidAges {
        current: u32,
        retirement: u32,
        end: u32,
    },

    #[error("invalid {field}: {reason}")]
    InvalidParameter { field: &'static str, reason: String },

    #[error("withdrawal rate override requires the percentage-of-prior-balance method")]
    WithdrawalMethodMismatch,

    #[error("invalid liquidity event '{label}': {reason}")]
    InvalidEvent { label: String, reason: String },

    #[error("scenario store error: {0}")]
    Store(String),

    #[error("export error: {0}")]
    Export(String),
}

impl ProjectionError {
    pub(crate) fn parameter(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            field,
            reason: reason.into(),
        }
    }
}

impl From<std::io::Error> for ProjectionError {
    fn from(err: std::io::Error) -> Self {
        Self::Store(err.to_string())
    }
}

impl From<serde_json::Error> for ProjectionError {
    fn from(err: serde_json::Error) -> Self {
        Self::Store(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ProjectionError>;
