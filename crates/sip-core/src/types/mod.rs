//! SIP message types
//!
//! Headers are stored in wire order as name/value pairs; the structured
//! types in this module ([`Via`], [`Address`], [`CSeq`], [`Uri`]) are
//! parsed on demand through the accessors of [`SipMessage`].

pub mod address;
pub mod cseq;
pub mod headers;
pub mod host_port;
pub mod message;
pub mod method;
pub mod param;
pub mod sip_request;
pub mod sip_response;
pub mod status;
pub mod uri;
pub mod via;

pub use address::Address;
pub use cseq::CSeq;
pub use headers::{Header, HeaderName, Headers};
pub use host_port::HostPort;
pub use message::{Message, SipMessage};
pub use method::Method;
pub use param::Param;
pub use sip_request::Request;
pub use sip_response::Response;
pub use status::StatusCode;
pub use uri::Uri;
pub use via::Via;
