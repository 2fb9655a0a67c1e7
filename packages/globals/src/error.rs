use thiserror::Error;
use trellis_expression::ExpressionError;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StorageError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Storage operation failed: {0}")]
    Failed(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GlobalsError {
    #[error("Unknown value provider: '{provider}'.")]
    UnknownProvider { provider: String },

    #[error("Merging global values '{provider}' failed: {message}")]
    InvalidPayload { provider: String, message: String },

    #[error("Stored global values are malformed: {0}")]
    CorruptSnapshot(String),

    #[error(transparent)]
    Expression(#[from] ExpressionError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub type GlobalsResult<T> = Result<T, GlobalsError>;
