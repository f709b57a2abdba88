use bytes::Bytes;

use crate::error::Result;
use crate::types::headers::{Header, HeaderName, Headers};
use crate::types::message::{write_headers_and_body, SipMessage};
use crate::types::method::Method;
use crate::types::uri::Uri;
use crate::types::via::Via;

/// A SIP request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    pub uri: Uri,
    pub headers: Headers,
    pub body: Bytes,
}

impl Request {
    pub fn new(method: Method, uri: Uri) -> Self {
        Request { method, uri, headers: Headers::new(), body: Bytes::new() }
    }

    pub fn with_header(mut self, header: Header) -> Self {
        self.headers.push(header);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Replace the top Via, used to give a request a new branch
    pub fn set_top_via(&mut self, via: &Via) {
        if !self.headers.replace_first(&HeaderName::Via, via.to_string()) {
            self.headers.append(HeaderName::Via, via.to_string());
        }
    }

    /// Rewrite the top Via after reception (`received`/`rport`)
    pub fn fix_top_via(&mut self, source: &crate::types::HostPort) -> Result<()> {
        let mut via = self.top_via()?;
        via.fix_received(source);
        self.set_top_via(&via);
        Ok(())
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut head = format!("{} {} SIP/2.0\r\n", self.method, self.uri);
        Bytes::from(write_headers_and_body(&mut head, &self.headers, &self.body))
    }
}

impl SipMessage for Request {
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
