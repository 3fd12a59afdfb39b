use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Cache state error: {0}")]
    ModelError(#[from] kb_model::ModelError),

    #[error("Sync service unavailable: {0}")]
    ServiceUnavailable(String),
}
