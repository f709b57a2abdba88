//! # b2bua-sip-core
//!
//! The SIP message layer used by the b2bua transaction and dialog engines.
//!
//! This crate provides:
//!
//! - A message model ([`Request`], [`Response`], [`Message`]) that keeps
//!   headers in wire order and exposes typed accessors for the headers the
//!   transaction and dialog layers inspect (Via, From, To, Call-ID, CSeq,
//!   Contact, Record-Route, Expires, Max-Forwards).
//! - A `nom` based parser for datagrams ([`parse_message`]), including
//!   compact header forms and comma separated multi-value headers.
//! - Generators for the messages RFC 3261 derives from other messages:
//!   responses, ACK and CANCEL for an INVITE, and dialog requests built
//!   with [`RequestBuilder`].
//!
//! ## Example
//!
//! ```rust
//! use b2bua_sip_core::prelude::*;
//!
//! let raw = b"OPTIONS sip:bob@192.0.2.4 SIP/2.0\r\n\
//! Via: SIP/2.0/UDP 192.0.2.1:5060;branch=z9hG4bK74bf9\r\n\
//! From: <sip:alice@192.0.2.1>;tag=9fxced76sl\r\n\
//! To: <sip:bob@192.0.2.4>\r\n\
//! Call-ID: 3848276298220188511@192.0.2.1\r\n\
//! CSeq: 63104 OPTIONS\r\n\
//! Content-Length: 0\r\n\r\n";
//!
//! let request = match parse_message(raw).unwrap() {
//!     Message::Request(request) => request,
//!     Message::Response(_) => unreachable!(),
//! };
//! let response = request.gen_response(200, "OK", None);
//! assert_eq!(response.status().as_u16(), 200);
//! assert_eq!(response.call_id().unwrap(), "3848276298220188511@192.0.2.1");
//! ```

pub mod builder;
pub mod error;
pub mod parser;
pub mod types;
pub mod utils;

pub use builder::RequestBuilder;
pub use error::{Error, Result};
pub use parser::parse_message;
pub use types::{
    Address, CSeq, Header, HeaderName, Headers, HostPort, Message, Method, Param, Request,
    Response, SipMessage, StatusCode, Uri, Via,
};
pub use utils::{generate_branch, generate_call_id, generate_tag};

/// Re-exports of the types most users need
pub mod prelude {
    pub use crate::builder::RequestBuilder;
    pub use crate::error::{Error, Result};
    pub use crate::parser::parse_message;
    pub use crate::types::{
        Address, CSeq, Header, HeaderName, Headers, HostPort, Message, Method, Param, Request,
        Response, SipMessage, StatusCode, Uri, Via,
    };
    pub use crate::utils::{generate_branch, generate_call_id, generate_tag};
}
