use thiserror::Error;
use trellis_common::CommonError;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AttributeError {
    #[error("Access Check Failed! AttributeStore.{operation}(): attribute '{attribute}' of component '{component}' is not visible to '{accessor}'.")]
    AccessDenied {
        operation: &'static str,
        attribute: String,
        component: String,
        accessor: String,
    },

    #[error("Invalid attribute definitions: {0}")]
    InvalidDefinitions(String),

    #[error(transparent)]
    Path(#[from] CommonError),
}

pub type AttributeResult<T> = Result<T, AttributeError>;
