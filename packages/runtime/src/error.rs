use std::path::PathBuf;
use thiserror::Error;
use trellis_attributes::AttributeError;
use trellis_common::{CommonError, ComponentId};
use trellis_expression::ExpressionError;
use trellis_globals::GlobalsError;
use trellis_iteration::BuildError;
use trellis_loader::LoadError;

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Failed to read config {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Unknown component: {0}")]
    UnknownComponent(ComponentId),

    #[error("Runtime built without a {0}")]
    MissingCollaborator(&'static str),

    #[error(transparent)]
    Common(#[from] CommonError),

    #[error(transparent)]
    Attribute(#[from] AttributeError),

    #[error(transparent)]
    Expression(#[from] ExpressionError),

    #[error(transparent)]
    Globals(#[from] GlobalsError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Build(#[from] BuildError),
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;
