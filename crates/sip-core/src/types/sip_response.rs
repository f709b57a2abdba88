use bytes::Bytes;

use crate::error::Result;
use crate::types::headers::{HeaderName, Headers};
use crate::types::message::{write_headers_and_body, SipMessage};
use crate::types::status::StatusCode;

/// A SIP response
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: StatusCode,
    pub reason: String,
    pub headers: Headers,
    pub body: Bytes,
}

impl Response {
    pub fn new(status: StatusCode, reason: impl Into<String>) -> Self {
        Response { status, reason: reason.into(), headers: Headers::new(), body: Bytes::new() }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> u16 {
        self.status.as_u16()
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Change status and reason; an empty reason selects the default phrase
    pub fn set_status(&mut self, status: StatusCode, reason: &str) {
        self.status = status;
        self.reason = if reason.is_empty() {
            status.reason_phrase().to_string()
        } else {
            reason.to_string()
        };
    }

    pub fn to_tag(&self) -> Result<Option<String>> {
        Ok(self.to_address()?.tag().map(str::to_string))
    }

    pub fn set_to_tag(&mut self, tag: &str) -> Result<()> {
        let mut to = self.to_address()?;
        to.set_tag(tag);
        self.headers.set(HeaderName::To, to.to_string());
        Ok(())
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut head = format!("SIP/2.0 {} {}\r\n", self.status, self.reason);
        Bytes::from(write_headers_and_body(&mut head, &self.headers, &self.body))
    }
}

impl SipMessage for Response {
    fn headers(&self) -> &Headers {
        &self.headers
    }

    fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    fn body(&self) -> &Bytes {
        &self.body
    }

    fn set_body(&mut self, body: Bytes, content_type: Option<&str>) {
        self.headers.remove(&HeaderName::ContentType);
        if let Some(ct) = content_type {
            if !body.is_empty() {
                self.headers.append(HeaderName::ContentType, ct);
            }
        }
        self.body = body;
    }
}
