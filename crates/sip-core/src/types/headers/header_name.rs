use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Header names the engine inspects, plus a catch-all
///
/// Parsing accepts the long form in any case and the RFC 3261 compact
/// forms (`v`, `f`, `t`, `i`, `m`, `l`, `c`, `k`, `s`, `e`, `r`, `b`).
/// Serialization always uses the canonical long form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HeaderName {
    Via,
    From,
    To,
    CallId,
    CSeq,
    Contact,
    Route,
    RecordRoute,
    MaxForwards,
    Expires,
    ContentType,
    ContentLength,
    ContentEncoding,
    UserAgent,
    Server,
    Supported,
    Subject,
    Reason,
    Warning,
    Also,
    ReferTo,
    ReferredBy,
    Authorization,
    ProxyAuthorization,
    WwwAuthenticate,
    ProxyAuthenticate,
    Other(String),
}

impl HeaderName {
    pub fn as_str(&self) -> &str {
        match self {
            HeaderName::Via => "Via",
            HeaderName::From => "From",
            HeaderName::To => "To",
            HeaderName::CallId => "Call-ID",
            HeaderName::CSeq => "CSeq",
            HeaderName::Contact => "Contact",
            HeaderName::Route => "Route",
            HeaderName::RecordRoute => "Record-Route",
            HeaderName::MaxForwards => "Max-Forwards",
            HeaderName::Expires => "Expires",
            HeaderName::ContentType => "Content-Type",
            HeaderName::ContentLength => "Content-Length",
            HeaderName::ContentEncoding => "Content-Encoding",
            HeaderName::UserAgent => "User-Agent",
            HeaderName::Server => "Server",
            HeaderName::Supported => "Supported",
            HeaderName::Subject => "Subject",
            HeaderName::Reason => "Reason",
            HeaderName::Warning => "Warning",
            HeaderName::Also => "Also",
            HeaderName::ReferTo => "Refer-To",
            HeaderName::ReferredBy => "Referred-By",
            HeaderName::Authorization => "Authorization",
            HeaderName::ProxyAuthorization => "Proxy-Authorization",
            HeaderName::WwwAuthenticate => "WWW-Authenticate",
            HeaderName::ProxyAuthenticate => "Proxy-Authenticate",
            HeaderName::Other(name) => name,
        }
    }

    /// Headers whose comma separated values are split into separate entries
    pub fn is_multi_value(&self) -> bool {
        matches!(
            self,
            HeaderName::Via | HeaderName::Contact | HeaderName::Route | HeaderName::RecordRoute
        )
    }

    /// Equality that ignores case for extension header names
    pub fn matches(&self, other: &HeaderName) -> bool {
        match (self, other) {
            (HeaderName::Other(a), HeaderName::Other(b)) => a.eq_ignore_ascii_case(b),
            (a, b) => a == b,
        }
    }
}

impl fmt::Display for HeaderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for HeaderName {
    fn from(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "via" | "v" => HeaderName::Via,
            "from" | "f" => HeaderName::From,
            "to" | "t" => HeaderName::To,
            "call-id" | "i" => HeaderName::CallId,
            "cseq" => HeaderName::CSeq,
            "contact" | "m" => HeaderName::Contact,
            "route" => HeaderName::Route,
            "record-route" => HeaderName::RecordRoute,
            "max-forwards" => HeaderName::MaxForwards,
            "expires" => HeaderName::Expires,
            "content-type" | "c" => HeaderName::ContentType,
            "content-length" | "l" => HeaderName::ContentLength,
            "content-encoding" | "e" => HeaderName::ContentEncoding,
            "user-agent" => HeaderName::UserAgent,
            "server" => HeaderName::Server,
            "supported" | "k" => HeaderName::Supported,
            "subject" | "s" => HeaderName::Subject,
            "reason" => HeaderName::Reason,
            "warning" => HeaderName::Warning,
            "also" => HeaderName::Also,
            "refer-to" | "r" => HeaderName::ReferTo,
            "referred-by" | "b" => HeaderName::ReferredBy,
            "authorization" => HeaderName::Authorization,
            "proxy-authorization" => HeaderName::ProxyAuthorization,
            "www-authenticate" => HeaderName::WwwAuthenticate,
            "proxy-authenticate" => HeaderName::ProxyAuthenticate,
            _ => HeaderName::Other(name.trim().to_string()),
        }
    }
}

impl FromStr for HeaderName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || !s.bytes().all(crate::parser::is_token_char) {
            return Err(Error::Parse(format!("invalid header name: {:?}", s)));
        }
        Ok(HeaderName::from(s))
    }
}
