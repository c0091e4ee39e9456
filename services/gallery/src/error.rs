//! Error taxonomy shared by the upload coordinator and the moderation worker.

use thiserror::Error;

/// Errors surfaced by gallery components
#[derive(Error, Debug)]
pub enum GalleryError {
    /// Caller input is missing or malformed; never retried
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// An external collaborator call failed
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// A queue notification could not be decoded
    #[error("Malformed notification: {0}")]
    MalformedNotification(String),
}

impl GalleryError {
    /// Wrap a collaborator failure, keeping its full source chain in the message
    pub fn unavailable(context: &str, err: impl std::error::Error) -> Self {
        let mut message = format!("{context}: {err}");
        let mut source = err.source();
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        GalleryError::Unavailable(message)
    }
}

pub type Result<T, E = GalleryError> = std::result::Result<T, E>;
