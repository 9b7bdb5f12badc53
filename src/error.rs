//! Error taxonomy shared by the prompt builder and both adapters.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A required credential is missing; the feature is unavailable.
    #[error("{0} is not configured")]
    Configuration(&'static str),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The model answered with something that is not a JSON object.
    /// `raw` keeps the untouched model output for diagnostics.
    #[error("invalid response from the model provider: {reason}")]
    ResponseFormat { reason: String, raw: String },

    #[error("model provider request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("model provider returned status {status}: {body}")]
    Provider { status: u16, body: String },

    #[error("datastore request failed: {0}")]
    Persistence(String),
}
