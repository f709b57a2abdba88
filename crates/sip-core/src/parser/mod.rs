//! # SIP datagram parser
//!
//! A [nom](https://docs.rs/nom) based parser for complete UDP datagrams.
//! The start line and each header line are parsed with nom combinators;
//! header values stay as text and are interpreted lazily by the typed
//! accessors on [`SipMessage`](crate::types::SipMessage).
//!
//! Folded header lines are unfolded, compact header names are mapped to
//! their long form, and comma separated Via/Contact/Route/Record-Route
//! values are split into one entry per value. The body is cut to
//! `Content-Length` when that header is present; the header itself is
//! not kept since serialization recomputes it. A request whose body does
//! not match its `Content-Length` comes back as [`Error::BadBody`].

pub mod headers;
pub mod request;
pub mod response;

use bytes::Bytes;
use tracing::trace;

use crate::error::{Error, Result};
use crate::types::headers::{HeaderName, Headers};
use crate::types::message::Message;
use crate::types::sip_request::Request;
use crate::types::sip_response::Response;

/// RFC 3261 `token` characters
pub fn is_token_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"-.!%*_+`'~".contains(&b)
}

/// Parse one datagram into a request or response
pub fn parse_message(data: &[u8]) -> Result<Message> {
    let (head, body) = split_head_body(data);
    let head = std::str::from_utf8(head).map_err(|_| Error::Parse("message head is not UTF-8".into()))?;
    let head = head.trim_start_matches(|c: char| c == '\r' || c == '\n');

    let mut lines = headers::unfold_lines(head).into_iter();
    let start_line = lines
        .next()
        .ok_or_else(|| Error::Parse("empty message".into()))?;

    let mut parsed = Headers::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        for header in headers::parse_header_line(&line)? {
            parsed.push(header);
        }
    }

    let body = cut_body(&parsed, body);
    // recomputed on serialization
    parsed.remove(&HeaderName::ContentLength);

    if start_line.starts_with("SIP/") {
        let (status, reason) = response::parse_status_line(&start_line)?;
        let body = body.map_err(Error::Parse)?;
        trace!("Parsed response {} {}", status, reason);
        Ok(Message::Response(Response { status, reason, headers: parsed, body }))
    } else {
        let (method, uri) = request::parse_request_line(&start_line)?;
        match body {
            Ok(body) => {
                trace!("Parsed request {} {}", method, uri);
                Ok(Message::Request(Request { method, uri, headers: parsed, body }))
            }
            Err(detail) => Err(Error::BadBody {
                request: Box::new(Request { method, uri, headers: parsed, body: Bytes::new() }),
                detail,
            }),
        }
    }
}

fn split_head_body(data: &[u8]) -> (&[u8], &[u8]) {
    if let Some(pos) = find(data, b"\r\n\r\n") {
        return (&data[..pos], &data[pos + 4..]);
    }
    if let Some(pos) = find(data, b"\n\n") {
        return (&data[..pos], &data[pos + 2..]);
    }
    (data, &[])
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn cut_body(headers: &Headers, body: &[u8]) -> std::result::Result<Bytes, String> {
    match headers.get(&HeaderName::ContentLength) {
        Some(value) => {
            let len = value
                .trim()
                .parse::<usize>()
                .map_err(|_| format!("invalid Content-Length: {}", value.trim()))?;
            if len > body.len() {
                return Err(format!(
                    "truncated body: Content-Length {} but {} bytes present",
                    len,
                    body.len()
                ));
            }
            Ok(Bytes::copy_from_slice(&body[..len]))
        }
        None => Ok(Bytes::copy_from_slice(body)),
    }
}
