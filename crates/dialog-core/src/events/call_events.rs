use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use b2bua_sip_core::{Address, Header, HeaderName, Uri};

use crate::sdp::MessageBody;

static EVENT_SEQ: AtomicU64 = AtomicU64::new(1);

fn next_seq() -> u64 {
    EVENT_SEQ.fetch_add(1, Ordering::Relaxed)
}

/// Which leg of the B2BUA an event came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Origin {
    /// The leg that sent us the INVITE
    Caller,
    /// The leg we sent the INVITE to
    Callee,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Caller => f.write_str("caller"),
            Origin::Callee => f.write_str("callee"),
        }
    }
}

/// Payload of a `Try`: what is needed to place the outgoing call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TryData {
    /// Reused for the new leg when set, generated otherwise
    pub call_id: Option<String>,
    pub calling: Option<String>,
    pub called: Option<String>,
    pub body: Option<MessageBody>,
    /// Authorization header value passed through when pass-auth is on
    pub auth: Option<String>,
    pub calling_name: Option<String>,
}

/// Status line plus optional body
#[derive(Debug, Clone, PartialEq)]
pub struct StatusData {
    pub code: u16,
    pub reason: String,
    pub body: Option<MessageBody>,
}

impl StatusData {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        StatusData { code, reason: reason.into(), body: None }
    }

    pub fn with_body(mut self, body: Option<MessageBody>) -> Self {
        self.body = body;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FailData {
    pub code: u16,
    pub reason: String,
    /// WWW-Authenticate or Proxy-Authenticate of a 401/407 with pass-auth
    pub challenge: Option<Header>,
}

impl FailData {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        FailData { code, reason: reason.into(), challenge: None }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RedirectData {
    pub code: u16,
    pub reason: String,
    pub body: Option<MessageBody>,
    pub contacts: Vec<Uri>,
}

/// Call-control event variants
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    Try(TryData),
    /// Provisional progress; `None` means a plain 180 Ringing
    Ring(Option<StatusData>),
    /// 2xx whose answer will only come with the ACK (late media)
    PreConnect(StatusData),
    Connect(StatusData),
    /// Re-INVITE offer
    Update(Option<MessageBody>),
    Info(Option<MessageBody>),
    Fail(Option<FailData>),
    Redirect(Option<RedirectData>),
    /// Teardown, optionally transferring to the given target
    Disconnect(Option<Address>),
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Try(_) => "Try",
            EventKind::Ring(_) => "Ring",
            EventKind::PreConnect(_) => "PreConnect",
            EventKind::Connect(_) => "Connect",
            EventKind::Update(_) => "Update",
            EventKind::Info(_) => "Info",
            EventKind::Fail(_) => "Fail",
            EventKind::Redirect(_) => "Redirect",
            EventKind::Disconnect(_) => "Disconnect",
        }
    }

    /// Fail, Redirect and Disconnect all end the call
    pub fn is_teardown(&self) -> bool {
        matches!(
            self,
            EventKind::Fail(_) | EventKind::Redirect(_) | EventKind::Disconnect(_)
        )
    }

    /// Body a dialog would send or has received with this event
    pub fn body(&self) -> Option<&MessageBody> {
        match self {
            EventKind::Try(data) => data.body.as_ref(),
            EventKind::Ring(data) => data.as_ref().and_then(|d| d.body.as_ref()),
            EventKind::PreConnect(data) | EventKind::Connect(data) => data.body.as_ref(),
            EventKind::Update(body) | EventKind::Info(body) => body.as_ref(),
            EventKind::Redirect(data) => data.as_ref().and_then(|d| d.body.as_ref()),
            EventKind::Fail(_) | EventKind::Disconnect(_) => None,
        }
    }

    pub(crate) fn body_mut(&mut self) -> Option<&mut Option<MessageBody>> {
        match self {
            EventKind::Try(data) => Some(&mut data.body),
            EventKind::Ring(Some(data)) => Some(&mut data.body),
            EventKind::PreConnect(data) | EventKind::Connect(data) => Some(&mut data.body),
            EventKind::Update(body) | EventKind::Info(body) => Some(body),
            EventKind::Redirect(Some(data)) => Some(&mut data.body),
            _ => None,
        }
    }
}

/// A sequenced call-control event.
///
/// Sequence numbers come from a process-wide counter, so an event created
/// later always orders after one created earlier. Dialogs drop events whose
/// sequence number is not above the last one they emitted.
#[derive(Debug, Clone, PartialEq)]
pub struct CallEvent {
    pub kind: EventKind,
    pub seq: u64,
    pub rtime: Instant,
    pub origin: Option<Origin>,
    /// Reason header value (RFC 3326)
    pub reason: Option<String>,
    pub extra_headers: Vec<Header>,
    pub max_forwards: Option<u32>,
}

impl CallEvent {
    pub fn new(kind: EventKind, rtime: Instant) -> Self {
        CallEvent {
            kind,
            seq: next_seq(),
            rtime,
            origin: None,
            reason: None,
            extra_headers: Vec::new(),
            max_forwards: None,
        }
    }

    pub fn now(kind: EventKind) -> Self {
        Self::new(kind, Instant::now())
    }

    pub fn with_origin(mut self, origin: Option<Origin>) -> Self {
        self.origin = origin;
        self
    }

    pub fn with_reason(mut self, reason: Option<String>) -> Self {
        self.reason = reason;
        self
    }

    pub fn with_extra_headers(mut self, headers: Vec<Header>) -> Self {
        self.extra_headers = headers;
        self
    }

    pub fn with_max_forwards(mut self, max_forwards: Option<u32>) -> Self {
        self.max_forwards = max_forwards;
        self
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    /// Headers copied into the SIP message this event produces
    pub fn outgoing_headers(&self) -> Vec<Header> {
        let mut headers = self.extra_headers.clone();
        if let Some(reason) = &self.reason {
            headers.push(Header::new(HeaderName::Reason, reason.clone()));
        }
        if let EventKind::Fail(Some(FailData { challenge: Some(challenge), .. })) = &self.kind {
            headers.push(challenge.clone());
        }
        headers
    }
}

impl fmt::Display for CallEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind.name(), self.seq)?;
        if let Some(origin) = self.origin {
            write!(f, " from {}", origin)?;
        }
        Ok(())
    }
}
