use bytes::Bytes;

use crate::error::{Error, Result};
use crate::types::address::Address;
use crate::types::cseq::CSeq;
use crate::types::headers::{HeaderName, Headers};
use crate::types::sip_request::Request;
use crate::types::sip_response::Response;
use crate::types::via::Via;

/// Header access shared by requests and responses
///
/// Structured accessors parse on every call; they return
/// [`Error::MissingHeader`] or [`Error::InvalidHeader`] instead of
/// panicking, so malformed datagrams surface as ordinary errors.
pub trait SipMessage {
    fn headers(&self) -> &Headers;
    fn headers_mut(&mut self) -> &mut Headers;
    fn body(&self) -> &Bytes;
    fn set_body(&mut self, body: Bytes, content_type: Option<&str>);

    fn header(&self, name: &HeaderName) -> Option<&str> {
        self.headers().get(name)
    }

    fn call_id(&self) -> Result<&str> {
        self.header(&HeaderName::CallId)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or(Error::MissingHeader("Call-ID"))
    }

    fn from_address(&self) -> Result<Address> {
        parse_required(self.headers(), HeaderName::From, "From")
    }

    fn to_address(&self) -> Result<Address> {
        parse_required(self.headers(), HeaderName::To, "To")
    }

    fn cseq(&self) -> Result<CSeq> {
        self.header(&HeaderName::CSeq)
            .ok_or(Error::MissingHeader("CSeq"))?
            .parse()
    }

    fn vias(&self) -> Result<Vec<Via>> {
        let vias = self
            .headers()
            .get_all(&HeaderName::Via)
            .map(str::parse)
            .collect::<Result<Vec<Via>>>()?;
        if vias.is_empty() {
            return Err(Error::MissingHeader("Via"));
        }
        Ok(vias)
    }

    fn top_via(&self) -> Result<Via> {
        self.header(&HeaderName::Via)
            .ok_or(Error::MissingHeader("Via"))?
            .parse()
    }

    fn contacts(&self) -> Result<Vec<Address>> {
        parse_all(self.headers(), &HeaderName::Contact)
    }

    fn first_contact(&self) -> Result<Option<Address>> {
        self.header(&HeaderName::Contact).map(str::parse).transpose()
    }

    fn record_routes(&self) -> Result<Vec<Address>> {
        parse_all(self.headers(), &HeaderName::RecordRoute)
    }

    fn routes(&self) -> Result<Vec<Address>> {
        parse_all(self.headers(), &HeaderName::Route)
    }

    /// Expires header as seconds
    fn expires(&self) -> Result<Option<i64>> {
        self.header(&HeaderName::Expires)
            .map(|v| {
                v.trim()
                    .parse::<i64>()
                    .map_err(|_| Error::invalid_header("Expires", v))
            })
            .transpose()
    }

    fn max_forwards(&self) -> Result<Option<u32>> {
        self.header(&HeaderName::MaxForwards)
            .map(|v| {
                v.trim()
                    .parse::<u32>()
                    .map_err(|_| Error::invalid_header("Max-Forwards", v))
            })
            .transpose()
    }

    fn content_type(&self) -> Option<&str> {
        self.header(&HeaderName::ContentType).map(str::trim)
    }

    fn user_agent(&self) -> Option<&str> {
        self.header(&HeaderName::UserAgent)
            .or_else(|| self.header(&HeaderName::Server))
    }

    /// Check the headers every transaction lookup depends on
    fn validate(&self) -> Result<()> {
        self.call_id()?;
        self.from_address()?;
        self.to_address()?;
        self.cseq()?;
        self.vias()?;
        Ok(())
    }
}

fn parse_required(headers: &Headers, name: HeaderName, label: &'static str) -> Result<Address> {
    headers.get(&name).ok_or(Error::MissingHeader(label))?.parse()
}

fn parse_all(headers: &Headers, name: &HeaderName) -> Result<Vec<Address>> {
    headers.get_all(name).map(str::parse).collect()
}

/// A parsed datagram
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request(Request),
    Response(Response),
}

impl Message {
    pub fn to_bytes(&self) -> Bytes {
        match self {
            Message::Request(req) => req.to_bytes(),
            Message::Response(resp) => resp.to_bytes(),
        }
    }
}

impl From<Request> for Message {
    fn from(req: Request) -> Self {
        Message::Request(req)
    }
}

impl From<Response> for Message {
    fn from(resp: Response) -> Self {
        Message::Response(resp)
    }
}

/// Serialize headers and body with a freshly computed Content-Length
pub(crate) fn write_headers_and_body(out: &mut String, headers: &Headers, body: &Bytes) -> Vec<u8> {
    for header in headers.iter() {
        if header.name == HeaderName::ContentLength {
            continue;
        }
        out.push_str(header.name.as_str());
        out.push_str(": ");
        out.push_str(&header.value);
        out.push_str("\r\n");
    }
    out.push_str(&format!("Content-Length: {}\r\n\r\n", body.len()));
    let mut data = Vec::with_capacity(out.len() + body.len());
    data.extend_from_slice(out.as_bytes());
    data.extend_from_slice(body);
    data
}
