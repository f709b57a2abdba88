//! Session description bodies
//!
//! The engine never interprets SDP beyond what the call flow needs: bodies
//! are compared byte-for-byte to detect redundant re-INVITEs, and the
//! connection address can be zeroed to emulate hold. Media-aware rewriting
//! (relay allocation and the like) is delegated to an [`SdpRewriter`].

pub mod offer_answer;

pub use offer_answer::{hold_body, SdpCompletion, SdpError, SdpRewriter, SdpSide};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use b2bua_sip_core::SipMessage;

pub const SDP_CONTENT_TYPE: &str = "application/sdp";

/// A message body together with its content type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageBody {
    pub content_type: String,
    pub content: Bytes,
    /// Local bodies with this flag go through
    /// [`SdpRewriter::on_local_sdp_change`] before they are sent
    #[serde(default)]
    pub needs_update: bool,
}

impl MessageBody {
    pub fn new(content_type: impl Into<String>, content: impl Into<Bytes>) -> Self {
        MessageBody {
            content_type: content_type.into(),
            content: content.into(),
            needs_update: false,
        }
    }

    pub fn sdp(content: impl Into<Bytes>) -> Self {
        Self::new(SDP_CONTENT_TYPE, content)
    }

    /// Body of a received message, `None` when empty
    pub fn from_message(msg: &impl SipMessage) -> Option<Self> {
        let content = msg.body();
        if content.is_empty() {
            return None;
        }
        let content_type = msg.content_type().unwrap_or(SDP_CONTENT_TYPE);
        Some(Self::new(content_type, content.clone()))
    }

    pub fn is_sdp(&self) -> bool {
        self.content_type
            .split(';')
            .next()
            .map(|t| t.trim().eq_ignore_ascii_case(SDP_CONTENT_TYPE))
            .unwrap_or(false)
    }

    /// Same bytes, regardless of content type and rewrite flag
    pub fn same_content(&self, other: &MessageBody) -> bool {
        self.content == other.content
    }

    pub fn with_needs_update(mut self, needs_update: bool) -> Self {
        self.needs_update = needs_update;
        self
    }

    /// Attach this body to an outgoing message
    pub fn apply_to(&self, msg: &mut impl SipMessage) {
        msg.set_body(self.content.clone(), Some(&self.content_type));
    }
}
