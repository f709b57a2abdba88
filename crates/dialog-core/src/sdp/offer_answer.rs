//! Asynchronous SDP rewriting
//!
//! A dialog that has to send or accept a session description may hand it to
//! an application supplied [`SdpRewriter`] first. The rewriter answers
//! through the [`SdpCompletion`] it is given, from any thread; the answer is
//! marshaled back onto the event loop, where the suspended step resumes.
//!
//! ```text
//!  dialog ──body──▶ SdpRewriter ──(later, any thread)──▶ SdpCompletion::complete
//!    ▲                                                           │
//!    └──────────── DialogManager::complete_sdp ◀── event loop ◀──┘
//! ```

use std::fmt;

use bytes::{Bytes, BytesMut};
use thiserror::Error;

use super::MessageBody;
use crate::dialog::DialogId;
use crate::errors::DialogResult;
use crate::events::CallEvent;
use crate::manager::DialogManager;
use crate::reactor::ReactorHandle;

/// Which side of the negotiation a body belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpSide {
    /// A body we are about to send
    Local,
    /// A body the peer sent
    Remote,
}

/// Failure reported by a rewriter; the call leg fails with this status
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("SDP handling failed: {code} {reason}")]
pub struct SdpError {
    pub code: u16,
    pub reason: String,
}

impl SdpError {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        SdpError { code, reason: reason.into() }
    }
}

/// Media-aware body transformation supplied by the application
pub trait SdpRewriter: Send + Sync {
    /// Rewrite a body before it is sent to the peer
    fn on_local_sdp_change(&self, dialog: DialogId, body: MessageBody, done: SdpCompletion);

    /// Rewrite a body received from the peer before the application sees it
    fn on_remote_sdp_change(&self, dialog: DialogId, body: MessageBody, done: SdpCompletion);
}

/// Resumes the suspended dialog step once the rewriter is done
pub struct SdpCompletion {
    handle: ReactorHandle<DialogManager>,
    dialog: DialogId,
    side: SdpSide,
    event: CallEvent,
}

impl fmt::Debug for SdpCompletion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SdpCompletion")
            .field("dialog", &self.dialog)
            .field("side", &self.side)
            .field("event", &self.event.seq)
            .finish()
    }
}

impl SdpCompletion {
    pub(crate) fn new(
        handle: ReactorHandle<DialogManager>,
        dialog: DialogId,
        side: SdpSide,
        event: CallEvent,
    ) -> Self {
        SdpCompletion { handle, dialog, side, event }
    }

    pub fn dialog(&self) -> DialogId {
        self.dialog
    }

    pub fn side(&self) -> SdpSide {
        self.side
    }

    /// Hand the rewritten body (or the failure) back to the dialog
    pub fn complete(self, result: Result<MessageBody, SdpError>) -> DialogResult<()> {
        let SdpCompletion { handle, dialog, side, event } = self;
        handle.schedule(move |mgr: &mut DialogManager| {
            mgr.complete_sdp(dialog, side, event, result);
        })
    }
}

/// Copy of an SDP body with every connection address set to `0.0.0.0`
pub fn hold_body(body: &MessageBody) -> MessageBody {
    let text = String::from_utf8_lossy(&body.content);
    let mut out = BytesMut::with_capacity(body.content.len());
    for line in text.split_inclusive('\n') {
        let (content, eol) = match line.strip_suffix("\r\n") {
            Some(content) => (content, "\r\n"),
            None => match line.strip_suffix('\n') {
                Some(content) => (content, "\n"),
                None => (line, ""),
            },
        };
        match content.strip_prefix("c=") {
            Some(conn) => {
                let mut parts: Vec<&str> = conn.split_whitespace().collect();
                if parts.len() >= 3 {
                    parts[2] = "0.0.0.0";
                }
                out.extend_from_slice(b"c=");
                out.extend_from_slice(parts.join(" ").as_bytes());
            }
            None => out.extend_from_slice(content.as_bytes()),
        }
        out.extend_from_slice(eol.as_bytes());
    }
    MessageBody {
        content_type: body.content_type.clone(),
        content: Bytes::from(out),
        needs_update: body.needs_update,
    }
}
