use std::fmt;

use b2bua_sip_core::{Method, Request, Response, SipMessage, Via};

use crate::errors::{DialogError, DialogResult};

/// Transaction identity derived from message headers
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransactionKey {
    pub call_id: String,
    pub from_tag: Option<String>,
    pub cseq: u32,
    /// Only client keys carry the method
    pub method: Option<Method>,
    pub branch: Option<String>,
    /// Set on ACK keys and on re-keyed INVITE server transactions
    pub to_tag: Option<String>,
}

impl TransactionKey {
    fn base(msg: &impl SipMessage) -> DialogResult<(String, Option<String>, u32, Method)> {
        let cseq = msg.cseq()?;
        Ok((
            msg.call_id()?.to_string(),
            msg.from_address()?.tag().map(str::to_string),
            cseq.seq,
            cseq.method,
        ))
    }

    fn top_branch(msg: &impl SipMessage) -> DialogResult<String> {
        msg.top_via()?
            .branch()
            .map(str::to_string)
            .ok_or_else(|| DialogError::protocol(400, "Missing Via branch"))
    }

    /// Key of a client transaction for an outgoing request
    pub fn client(req: &Request) -> DialogResult<Self> {
        let (call_id, from_tag, cseq, method) = Self::base(req)?;
        Ok(TransactionKey {
            call_id,
            from_tag,
            cseq,
            method: Some(method),
            branch: Some(Self::top_branch(req)?),
            to_tag: None,
        })
    }

    /// Key of the client transaction a response belongs to
    pub fn client_for_response(resp: &Response) -> DialogResult<Self> {
        let (call_id, from_tag, cseq, method) = Self::base(resp)?;
        Ok(TransactionKey {
            call_id,
            from_tag,
            cseq,
            method: Some(method),
            branch: Some(Self::top_branch(resp)?),
            to_tag: None,
        })
    }

    /// Client key a request would have had if it left through `via`;
    /// used to detect requests looping back to us
    pub fn client_for_via(req: &Request, via: &Via) -> DialogResult<Self> {
        let (call_id, from_tag, cseq, method) = Self::base(req)?;
        Ok(TransactionKey {
            call_id,
            from_tag,
            cseq,
            method: Some(method),
            branch: via.branch().map(str::to_string),
            to_tag: None,
        })
    }

    /// Key of the server transaction an incoming request belongs to
    pub fn server(req: &Request) -> DialogResult<Self> {
        let (call_id, from_tag, cseq, _) = Self::base(req)?;
        if req.method == Method::Ack {
            return Ok(TransactionKey {
                call_id,
                from_tag,
                cseq,
                method: None,
                branch: None,
                to_tag: req.to_address()?.tag().map(str::to_string),
            });
        }
        Ok(TransactionKey {
            call_id,
            from_tag,
            cseq,
            method: None,
            branch: Some(Self::top_branch(req)?),
            to_tag: None,
        })
    }

    /// The key a completed INVITE server transaction is found by
    pub fn with_to_tag(&self, to_tag: Option<String>) -> Self {
        TransactionKey { branch: None, to_tag, ..self.clone() }
    }
}

impl fmt::Display for TransactionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.call_id, self.cseq)?;
        if let Some(method) = &self.method {
            write!(f, " {}", method)?;
        }
        if let Some(tag) = &self.from_tag {
            write!(f, " from-tag={}", tag)?;
        }
        if let Some(branch) = &self.branch {
            write!(f, " branch={}", branch)?;
        }
        if let Some(tag) = &self.to_tag {
            write!(f, " to-tag={}", tag)?;
        }
        Ok(())
    }
}
