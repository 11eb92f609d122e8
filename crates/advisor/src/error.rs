use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AdvisorError {
    #[error("invalid forecast input: {0}")]
    InvalidInput(String),

    #[error("forecast failed: {0}")]
    ForecastFailed(String),

    #[error("forecast provider unavailable: {0}")]
    Unavailable(String),
}
