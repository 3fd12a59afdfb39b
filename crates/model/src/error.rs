use thiserror::Error;

pub type Result<T> = std::result::Result<T, ModelError>;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Unsupported cache state schema_version {found} (expected {expected})")]
    UnsupportedSchema { found: u32, expected: u32 },
}
