use std::net::SocketAddr;
use thiserror::Error;
use tokio_util::codec::LinesCodecError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("framing error: {0}")]
    Framing(#[from] LinesCodecError),
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("unexpected {0}")]
    Unexpected(&'static str),
    #[error("connection closed by {0}")]
    Closed(SocketAddr),
    #[error("{0} has left the table")]
    Gone(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether the exchange that produced this error should simply be tried again.
    ///
    /// Only validation failures qualify; a dropped connection means the other
    /// side is gone.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Malformed(_)
                | Error::Unexpected(_)
                | Error::Framing(LinesCodecError::MaxLineLengthExceeded)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_validation_failures_are_retryable() {
        let malformed = serde_json::from_str::<u16>("nope").unwrap_err();
        assert!(Error::Malformed(malformed).is_retryable());
        assert!(Error::Unexpected("response").is_retryable());
        assert!(Error::Framing(LinesCodecError::MaxLineLengthExceeded).is_retryable());

        let closed = Error::Closed("127.0.0.1:9001".parse().unwrap());
        assert!(!closed.is_retryable());
        assert!(!Error::Gone("127.0.0.1:9001".into()).is_retryable());
    }
}
