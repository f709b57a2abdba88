//! # Message generators
//!
//! Requests and responses that RFC 3261 derives from an existing request:
//!
//! - [`Request::gen_response`] copies Via, From, To, Call-ID, CSeq and
//!   Record-Route into a response (section 8.2.6).
//! - [`Request::gen_ack`] builds the ACK for a non-2xx final response to
//!   an INVITE, reusing the INVITE's top Via and branch (section 17.1.1.3).
//! - [`Request::gen_cancel`] builds the CANCEL for a pending INVITE
//!   (section 9.1).
//! - [`Request::gen_request`] builds a sibling request with another method
//!   on the same Call-ID, From, To and route set.
//!
//! [`RequestBuilder`] assembles new in-dialog or dialog-creating requests.

use bytes::Bytes;

use crate::types::address::Address;
use crate::types::cseq::CSeq;
use crate::types::headers::{Header, HeaderName, Headers};
use crate::types::message::SipMessage;
use crate::types::method::Method;
use crate::types::sip_request::Request;
use crate::types::sip_response::Response;
use crate::types::status::StatusCode;
use crate::types::uri::Uri;
use crate::types::via::Via;
use crate::utils::generate_branch;

/// Default Max-Forwards for requests originated here
pub const DEFAULT_MAX_FORWARDS: u32 = 70;

impl Request {
    /// Build a response to this request.
    ///
    /// Codes outside `100..=699` fall back to 500. An empty `reason`
    /// selects the default phrase for the code.
    pub fn gen_response(&self, code: u16, reason: &str, server: Option<&str>) -> Response {
        let status = StatusCode::new(code).unwrap_or(StatusCode::SERVER_INTERNAL_ERROR);
        let mut resp = Response::new(status, "");
        resp.set_status(status, reason);
        for name in [
            HeaderName::Via,
            HeaderName::From,
            HeaderName::To,
            HeaderName::CallId,
            HeaderName::CSeq,
            HeaderName::RecordRoute,
        ] {
            for value in self.headers.get_all(&name) {
                resp.headers.append(name.clone(), value);
            }
        }
        if let Some(server) = server {
            resp.headers.append(HeaderName::Server, server);
        }
        resp
    }

    /// ACK for a final response to this INVITE
    pub fn gen_ack(&self) -> Request {
        self.derived(Method::Ack, None)
    }

    /// CANCEL for this pending INVITE
    pub fn gen_cancel(&self) -> Request {
        self.derived(Method::Cancel, None)
    }

    /// Sibling request with another method and a new branch.
    ///
    /// The CSeq number is taken from `cseq` or copied from this request.
    pub fn gen_request(&self, method: Method, cseq: Option<u32>) -> Request {
        let mut req = self.derived(method, cseq);
        if let Ok(mut via) = req.top_via() {
            via.set_branch(generate_branch());
            req.set_top_via(&via);
        }
        req
    }

    fn derived(&self, method: Method, cseq: Option<u32>) -> Request {
        let mut req = Request::new(method.clone(), self.uri.clone());
        if let Some(via) = self.headers.get(&HeaderName::Via) {
            req.headers.append(HeaderName::Via, via);
        }
        if let Some(mf) = self.headers.get(&HeaderName::MaxForwards) {
            req.headers.append(HeaderName::MaxForwards, mf);
        }
        for name in [HeaderName::From, HeaderName::To, HeaderName::CallId] {
            if let Some(value) = self.headers.get(&name) {
                req.headers.append(name, value);
            }
        }
        let seq = cseq.or_else(|| self.cseq().ok().map(|c| c.seq)).unwrap_or(1);
        req.headers.append(HeaderName::CSeq, CSeq::new(seq, method).to_string());
        for route in self.headers.get_all(&HeaderName::Route) {
            req.headers.append(HeaderName::Route, route);
        }
        if let Some(ua) = self.headers.get(&HeaderName::UserAgent) {
            req.headers.append(HeaderName::UserAgent, ua);
        }
        req
    }
}

/// Builder for requests originated by a user agent
///
/// ```rust
/// use b2bua_sip_core::prelude::*;
///
/// let local = HostPort::new("192.0.2.1", 5060);
/// let req = RequestBuilder::new(Method::Invite, "sip:bob@192.0.2.4".parse().unwrap())
///     .from("<sip:alice@192.0.2.1>;tag=1234".parse().unwrap())
///     .to("<sip:bob@192.0.2.4>".parse().unwrap())
///     .call_id("a84b4c76e66710")
///     .cseq(200)
///     .via(Via::udp(&local, generate_branch()))
///     .build();
/// assert_eq!(req.cseq().unwrap().seq, 200);
/// ```
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    method: Method,
    uri: Uri,
    via: Option<Via>,
    from: Option<Address>,
    to: Option<Address>,
    call_id: Option<String>,
    cseq: u32,
    contact: Option<Address>,
    routes: Vec<Address>,
    max_forwards: u32,
    user_agent: Option<String>,
    extra: Headers,
    body: Option<(Bytes, String)>,
}

impl RequestBuilder {
    pub fn new(method: Method, uri: Uri) -> Self {
        RequestBuilder {
            method,
            uri,
            via: None,
            from: None,
            to: None,
            call_id: None,
            cseq: 1,
            contact: None,
            routes: Vec::new(),
            max_forwards: DEFAULT_MAX_FORWARDS,
            user_agent: None,
            extra: Headers::new(),
            body: None,
        }
    }

    pub fn via(mut self, via: Via) -> Self {
        self.via = Some(via);
        self
    }

    pub fn from(mut self, from: Address) -> Self {
        self.from = Some(from);
        self
    }

    pub fn to(mut self, to: Address) -> Self {
        self.to = Some(to);
        self
    }

    pub fn call_id(mut self, call_id: impl Into<String>) -> Self {
        self.call_id = Some(call_id.into());
        self
    }

    pub fn cseq(mut self, seq: u32) -> Self {
        self.cseq = seq;
        self
    }

    pub fn contact(mut self, contact: Option<Address>) -> Self {
        self.contact = contact;
        self
    }

    pub fn routes(mut self, routes: Vec<Address>) -> Self {
        self.routes = routes;
        self
    }

    pub fn max_forwards(mut self, max_forwards: u32) -> Self {
        self.max_forwards = max_forwards;
        self
    }

    pub fn user_agent(mut self, user_agent: Option<String>) -> Self {
        self.user_agent = user_agent;
        self
    }

    pub fn header(mut self, header: Header) -> Self {
        self.extra.push(header);
        self
    }

    pub fn headers(mut self, headers: impl IntoIterator<Item = Header>) -> Self {
        self.extra.extend(headers);
        self
    }

    pub fn body(mut self, body: Bytes, content_type: impl Into<String>) -> Self {
        self.body = Some((body, content_type.into()));
        self
    }

    pub fn build(self) -> Request {
        let mut req = Request::new(self.method.clone(), self.uri);
        if let Some(via) = self.via {
            req.headers.append(HeaderName::Via, via.to_string());
        }
        req.headers
            .append(HeaderName::MaxForwards, self.max_forwards.to_string());
        if let Some(from) = self.from {
            req.headers.append(HeaderName::From, from.to_string());
        }
        if let Some(to) = self.to {
            req.headers.append(HeaderName::To, to.to_string());
        }
        if let Some(call_id) = self.call_id {
            req.headers.append(HeaderName::CallId, call_id);
        }
        req.headers
            .append(HeaderName::CSeq, CSeq::new(self.cseq, self.method).to_string());
        if let Some(contact) = self.contact {
            req.headers.append(HeaderName::Contact, contact.to_string());
        }
        for route in self.routes {
            req.headers.append(HeaderName::Route, route.to_string());
        }
        if let Some(ua) = self.user_agent {
            req.headers.append(HeaderName::UserAgent, ua);
        }
        req.headers.extend(self.extra.iter().cloned());
        if let Some((body, content_type)) = self.body {
            req.set_body(body, Some(&content_type));
        }
        req
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_message;
    use crate::types::message::Message;

    fn invite() -> Request {
        let raw = "INVITE sip:bob@192.0.2.4 SIP/2.0\r\n\
Via: SIP/2.0/UDP 192.0.2.1:5060;branch=z9hG4bKnashds8\r\n\
Via: SIP/2.0/UDP 10.1.1.1:5060;branch=z9hG4bKfirst\r\n\
Max-Forwards: 69\r\n\
Record-Route: <sip:proxy.example.com;lr>\r\n\
From: Alice <sip:alice@192.0.2.1>;tag=1928301774\r\n\
To: Bob <sip:bob@192.0.2.4>\r\n\
Call-ID: a84b4c76e66710\r\n\
CSeq: 314159 INVITE\r\n\
Route: <sip:edge.example.com;lr>\r\n\
Content-Type: application/sdp\r\n\
Content-Length: 4\r\n\r\nv=0\n";
        match parse_message(raw.as_bytes()).unwrap() {
            Message::Request(req) => req,
            Message::Response(_) => panic!("expected request"),
        }
    }

    #[test]
    fn test_gen_response_copies_dialog_headers() {
        let resp = invite().gen_response(180, "", Some("b2bua"));
        assert_eq!(resp.reason(), "Ringing");
        assert_eq!(resp.vias().unwrap().len(), 2);
        assert_eq!(resp.record_routes().unwrap().len(), 1);
        assert_eq!(resp.header(&HeaderName::Server), Some("b2bua"));
        assert!(resp.body().is_empty());
        assert!(resp.header(&HeaderName::Route).is_none());
    }

    #[test]
    fn test_gen_response_invalid_code_becomes_500() {
        assert_eq!(invite().gen_response(42, "", None).code(), 500);
    }

    #[test]
    fn test_gen_ack_and_cancel_keep_branch() {
        let inv = invite();
        let ack = inv.gen_ack();
        let cancel = inv.gen_cancel();
        for (req, method) in [(&ack, Method::Ack), (&cancel, Method::Cancel)] {
            assert_eq!(req.vias().unwrap().len(), 1);
            assert_eq!(req.top_via().unwrap().branch(), Some("z9hG4bKnashds8"));
            assert_eq!(req.cseq().unwrap(), CSeq::new(314159, method));
            assert_eq!(req.routes().unwrap().len(), 1);
            assert!(req.body().is_empty());
        }
    }

    #[test]
    fn test_gen_request_gets_new_branch() {
        let bye = invite().gen_request(Method::Bye, Some(314160));
        assert_ne!(bye.top_via().unwrap().branch(), Some("z9hG4bKnashds8"));
        assert_eq!(bye.cseq().unwrap().seq, 314160);
    }

    #[test]
    fn test_builder_serializes_and_parses_back() {
        let local = crate::types::HostPort::new("192.0.2.1", 5060);
        let req = RequestBuilder::new(Method::Invite, "sip:bob@192.0.2.4".parse().unwrap())
            .via(Via::udp(&local, "z9hG4bKabc"))
            .from("<sip:alice@192.0.2.1>;tag=1".parse().unwrap())
            .to("<sip:bob@192.0.2.4>".parse().unwrap())
            .call_id("cid")
            .cseq(200)
            .routes(vec!["<sip:p1;lr>".parse().unwrap()])
            .header(Header::new("X-Leg", "a"))
            .body(Bytes::from_static(b"v=0\r\n"), "application/sdp")
            .build();
        let parsed = match parse_message(&req.to_bytes()).unwrap() {
            Message::Request(r) => r,
            Message::Response(_) => panic!("expected request"),
        };
        assert_eq!(parsed, req);
    }
}
