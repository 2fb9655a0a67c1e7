use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BuildError {
    #[error("Invalid template entry: {0}")]
    Template(String),

    #[error("Component creation failed: {0}")]
    Failed(String),

    #[error("Component creation panicked: {0}")]
    Panicked(String),
}

pub type BuildResult<T> = Result<T, BuildError>;
