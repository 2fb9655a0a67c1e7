use thiserror::Error;

/// Errors shared by every trellis crate
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommonError {
    #[error("Invalid definition descriptor: '{descriptor}'")]
    InvalidDescriptor { descriptor: String },

    #[error("List index {index} is out of range for a list of length {len}")]
    IndexOutOfRange { index: usize, len: usize },
}

pub type CommonResult<T> = Result<T, CommonError>;
