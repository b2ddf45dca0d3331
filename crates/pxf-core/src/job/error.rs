use thiserror::Error;

/// Invalid job configuration. Rejected before anything is persisted or fetched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("block size must be positive (got {0})")]
    BlockSize(i64),
    #[error("stride must be at least 1 on both axes (got {step_x}x{step_y})")]
    Stride { step_x: i64, step_y: i64 },
    #[error("grid has more than {max} points")]
    TooManyPoints { max: usize },
    #[error("corner coordinates are out of range")]
    OutOfRange,
    #[error("invalid url template {template:?}: {reason}")]
    Template { template: String, reason: String },
    #[error("identifier path must not be empty")]
    IdField,
}
