//! Error types for the provenance engine bridge.

use thiserror::Error;

/// Bridge errors with specific exit codes.
#[derive(Error, Debug)]
pub enum Error {
    /// A token did not resolve. This is a lifetime bug, never retried.
    #[error("Invalid handle token {0}")]
    InvalidHandle(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The engine reported failure; the message comes from its error slot.
    #[error("Engine error: {0}")]
    Engine(String),

    #[error("Signing failed: {0}")]
    SigningFailure(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("{0} used after close")]
    UseAfterClose(&'static str),

    #[error("{0} is not open")]
    NotOpen(&'static str),

    #[error("{0} is already open")]
    AlreadyOpen(&'static str),

    /// The signing key or certificate chain could not be loaded.
    #[error("Invalid signing credentials: {0}")]
    Credentials(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Returns the exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Engine(_) => 1,
            Error::SigningFailure(_) => 2,
            Error::UnsupportedFormat(_) => 3,
            Error::Credentials(_) => 4,
            Error::Io(_) => 5,
            Error::Json(_) => 6,
            Error::InvalidHandle(_)
            | Error::UseAfterClose(_)
            | Error::NotOpen(_)
            | Error::AlreadyOpen(_) => 70,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_programming_errors_share_exit_code() {
        assert_eq!(Error::InvalidHandle(7).exit_code(), 70);
        assert_eq!(Error::UseAfterClose("Reader").exit_code(), 70);
        assert_eq!(Error::NotOpen("Builder").exit_code(), 70);
    }

    #[test]
    fn test_messages_name_the_wrapper() {
        assert_eq!(
            Error::UseAfterClose("Builder").to_string(),
            "Builder used after close"
        );
        assert_eq!(
            Error::UnsupportedFormat("photo".into()).to_string(),
            "Unsupported format: photo"
        );
    }
}
