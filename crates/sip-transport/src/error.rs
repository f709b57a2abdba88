use std::io;
use thiserror::Error;

/// Result type for transport operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the transport layer
#[derive(Error, Debug)]
pub enum Error {
    /// Socket level failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Failed to bind to an address
    #[error("Failed to bind to address {0}: {1}")]
    BindFailed(std::net::SocketAddr, #[source] io::Error),

    /// The destination host could not be resolved
    #[error("Could not resolve {0}")]
    ResolveFailed(String),

    /// The transport has been closed
    #[error("Transport is closed")]
    TransportClosed,

    /// Datagram exceeds what the transport will send
    #[error("Message too large: {0} bytes")]
    MessageTooLarge(usize),
}
