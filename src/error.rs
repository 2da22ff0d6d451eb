use thiserror::Error;

/// Filter configuration and input errors.
#[derive(Error, Debug, Clone)]
pub enum FilterError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

pub type FilterResult<T> = Result<T, FilterError>;
