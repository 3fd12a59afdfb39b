use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProviderError>;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Provider state unavailable: {0}")]
    StateUnavailable(String),

    #[error("{0}")]
    Other(String),
}
