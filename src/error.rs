use thiserror::Error;

use crate::dns::ParseError;
use crate::tsig::TsigError;

#[derive(Error, Debug, Clone)]
pub enum DnsError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("message too large: {size} bytes, max {max}")]
    MessageTooLarge { size: usize, max: usize },

    #[error("bad network: {0}")]
    BadNetwork(String),

    #[error("invalid pattern: {0:?}")]
    InvalidPattern(String),

    #[error("Operation timed out")]
    Timeout,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Tsig(#[from] TsigError),
}

impl From<std::io::Error> for DnsError {
    fn from(err: std::io::Error) -> Self {
        DnsError::Io(err.to_string())
    }
}

impl From<ParseError> for DnsError {
    fn from(err: ParseError) -> Self {
        DnsError::Parse(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for DnsError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        DnsError::Timeout
    }
}

pub type Result<T> = std::result::Result<T, DnsError>;
