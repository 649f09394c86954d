#[derive(thiserror::Error, Debug)]
pub enum TmError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("no translation memory loaded")]
    EmptyIndex,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("storage error: {0:?}")]
    Storage(#[from] anyhow::Error),

    #[error("internal error: {0}")]
    Internal(String),
}
