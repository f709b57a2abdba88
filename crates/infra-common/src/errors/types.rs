use thiserror::Error;

/// Result alias used by the infrastructure helpers
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while setting up logging or reading configuration
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration could not be read or is invalid
    #[error("configuration error: {0}")]
    Config(String),

    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A global subscriber was already installed
    #[error("logging already initialized: {0}")]
    Logging(String),
}
