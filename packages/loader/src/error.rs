use thiserror::Error;

pub const UNKNOWN_ERROR_MESSAGE_PREFIX: &str =
    "An unknown error occurred attempting to fetch definitions at: ";

/// Failure reported by a transport for one URI
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Transport failure: {0}")]
pub struct TransportError(pub String);

/// Batch-level load failure, handed to every callback of the batch
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LoadError {
    /// The server answered with an in-band error for this request
    #[error("{message}")]
    Server { uri: String, message: String },

    /// The fetch failed without an in-band error; connectivity is assumed lost
    #[error("An unknown error occurred attempting to fetch definitions at: {uri}")]
    Unknown { uri: String },

    /// Another batch's fetch of a shared descriptor failed
    #[error("Loading '{descriptor}' failed: {message}")]
    Rejected { descriptor: String, message: String },

    /// A coalesced request was dropped before its fetch finished
    #[error("Definition request was abandoned")]
    Abandoned,
}

pub type LoadResult<T> = Result<T, LoadError>;
