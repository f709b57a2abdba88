//! Dialog and transaction errors
//!
//! Some errors correspond to a SIP answer: [`DialogError::response_for`]
//! builds the response that reports the error to the peer that sent the
//! offending request.

use thiserror::Error;

use b2bua_sip_core::{Request, Response};

use crate::dialog::DialogId;
use crate::transaction::TransactionId;

/// Result type for dialog operations
pub type DialogResult<T> = Result<T, DialogError>;

/// Errors raised by the transaction engine and the dialog state machine
#[derive(Error, Debug)]
pub enum DialogError {
    /// A SIP message could not be parsed or lacks a required header
    #[error("SIP message error: {0}")]
    Sip(#[from] b2bua_sip_core::Error),

    /// The transport refused a datagram
    #[error("Transport error: {0}")]
    Transport(#[from] b2bua_sip_transport::Error),

    /// A client transaction with the same key is still live
    #[error("Transaction already exists: {0}")]
    DuplicateTransaction(String),

    /// No transaction with this id
    #[error("Transaction {0} not found")]
    TransactionNotFound(TransactionId),

    /// Final response already sent on this server transaction
    #[error("Transaction {0} has already been completed")]
    TransactionCompleted(TransactionId),

    /// No dialog with this id
    #[error("Dialog {0} not found")]
    DialogNotFound(DialogId),

    /// The request is answered with a specific SIP status
    #[error("Protocol error: {code} {reason}")]
    Protocol { code: u16, reason: String },

    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(String),

    /// The event loop is gone
    #[error("Event loop is not running")]
    LoopClosed,

    /// A job scheduled on the event loop panicked
    #[error("Scheduled call panicked: {0}")]
    CallPanicked(String),
}

impl DialogError {
    pub fn protocol(code: u16, reason: impl Into<String>) -> Self {
        DialogError::Protocol { code, reason: reason.into() }
    }

    /// SIP response reporting this error for `request`, if any
    pub fn response_for(&self, request: &Request, server: Option<&str>) -> Option<Response> {
        match self {
            DialogError::Protocol { code, reason } => Some(request.gen_response(*code, reason, server)),
            DialogError::Sip(_) => Some(request.gen_response(400, "Bad Request", server)),
            _ => None,
        }
    }
}
