use thiserror::Error;

use crate::types::sip_request::Request;

/// Result alias for SIP message operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced while parsing or inspecting SIP messages
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The datagram is not a syntactically valid SIP message
    #[error("Parse error: {0}")]
    Parse(String),

    /// A start line could not be parsed
    #[error("Invalid start line: {0}")]
    InvalidStartLine(String),

    /// A header required for the operation is absent
    #[error("Missing required header: {0}")]
    MissingHeader(&'static str),

    /// A header is present but its value is malformed
    #[error("Invalid {name} header: {value}")]
    InvalidHeader { name: &'static str, value: String },

    /// A URI could not be parsed
    #[error("Invalid URI: {0}")]
    InvalidUri(String),

    /// Status code outside 100..=699
    #[error("Invalid status code: {0}")]
    InvalidStatusCode(u16),

    /// Start line and headers of a request parsed but its body did not.
    ///
    /// `request` carries everything but the body so that a 400 can
    /// still be generated from it.
    #[error("Bad request body: {detail}")]
    BadBody { request: Box<Request>, detail: String },

    /// Unknown or malformed method token
    #[error("Invalid method: {0}")]
    InvalidMethod(String),
}

impl Error {
    pub(crate) fn invalid_header(name: &'static str, value: impl Into<String>) -> Self {
        Error::InvalidHeader { name, value: value.into() }
    }
}
