//! Route set, remote target and request generation for a leg

use bytes::Bytes;
use tracing::{debug, trace, warn};

use b2bua_sip_core::{
    generate_branch, Address, Header, HeaderName, HostPort, Method, Request, RequestBuilder,
    Response, SipMessage, StatusCode, Via,
};

use super::dialog_impl::{Dialog, UaContext};
use crate::errors::{DialogError, DialogResult};
use crate::sdp::MessageBody;
use crate::transaction::{ClientTxOptions, TransactionId, TxOwner};

impl Dialog {
    /// Take the route set (and optionally the remote target) from `msg`.
    ///
    /// Record-Route is reversed for responses to our own requests. A strict
    /// router at the head of the set becomes the Request-URI and the remote
    /// target moves to the end of the set (RFC 3261 section 12.2.1.1).
    pub(crate) fn update_routing(
        &mut self,
        msg: &impl SipMessage,
        update_rtarget: bool,
        reverse: bool,
    ) -> DialogResult<()> {
        if update_rtarget {
            if let Some(contact) = msg.first_contact()? {
                self.remote_target = Some(contact.uri);
            }
        }
        let mut routes = msg.record_routes()?;
        if reverse {
            routes.reverse();
        }
        self.routes = routes;
        let Some(first) = self.routes.first() else {
            if let Some(target) = &self.remote_target {
                self.remote_addr = target.host_port();
            }
            return Ok(());
        };
        if !first.uri.is_loose_routing() {
            if let Some(target) = self.remote_target.take() {
                self.routes.push(Address::new(target));
            }
            let strict = self.routes.remove(0);
            self.remote_addr = strict.uri.host_port();
            self.remote_target = Some(strict.uri.stripped());
        } else if let Some(proxy) = self.config.outbound_proxy.clone() {
            if let Some(target) = self.remote_target.take() {
                self.routes.push(Address::new(target));
            }
            self.remote_target = Some(self.routes[0].uri.stripped());
            self.remote_addr = proxy;
        } else {
            self.remote_addr = first.uri.host_port();
        }
        trace!("{} remote target {:?} via {}", self.id, self.remote_target, self.remote_addr);
        Ok(())
    }

    /// Where requests of this leg are sent
    pub(crate) fn request_target(&self) -> HostPort {
        self.config
            .outbound_proxy
            .clone()
            .unwrap_or_else(|| self.remote_addr.clone())
    }

    /// Whether an in-dialog request from the peer belongs to this leg
    pub fn is_yours(&self, req: &Request) -> bool {
        if req.method != Method::Bye {
            if let Some(branch) = &self.branch {
                let same = req
                    .top_via()
                    .ok()
                    .and_then(|via| via.branch().map(|b| b == branch))
                    .unwrap_or(false);
                if !same {
                    return false;
                }
            }
        }
        if req.call_id().ok() != Some(self.call_id.as_str()) {
            return false;
        }
        let (Ok(from), Ok(to)) = (req.from_address(), req.to_address()) else {
            return false;
        };
        let remote_tag = self.remote_uri.as_ref().and_then(Address::tag);
        let local_tag = self.local_uri.as_ref().and_then(Address::tag);
        remote_tag == from.tag() && local_tag == to.tag()
    }

    /// New in-dialog request; consumes one local CSeq number
    pub(crate) fn gen_request(
        &mut self,
        ctx: &UaContext<'_>,
        method: Method,
        body: Option<&MessageBody>,
        extra: &[Header],
        max_forwards: Option<u32>,
    ) -> DialogResult<Request> {
        let target = self
            .remote_target
            .clone()
            .or_else(|| self.remote_uri.as_ref().map(|a| a.uri.clone()))
            .ok_or_else(|| DialogError::protocol(500, "No remote target"))?;
        let (Some(from), Some(to)) = (self.local_uri.clone(), self.remote_uri.clone()) else {
            return Err(DialogError::protocol(500, "Dialog is not set up"));
        };
        let cseq = self.local_cseq;
        self.local_cseq += 1;
        let local = ctx.tm.local_addr();
        let mut builder = RequestBuilder::new(method, target)
            .via(Via::udp(&local, generate_branch()))
            .from(from)
            .to(to)
            .call_id(self.call_id.clone())
            .cseq(cseq)
            .contact(self.local_contact.clone())
            .routes(self.routes.clone())
            .user_agent(self.user_agent(ctx).map(str::to_string))
            .headers(self.config.extra_headers.iter().cloned())
            .headers(extra.iter().cloned());
        if let Some(mf) = max_forwards {
            builder = builder.max_forwards(mf);
        }
        if let Some(body) = body {
            builder = builder.body(body.content.clone(), body.content_type.clone());
        }
        Ok(builder.build())
    }

    /// Start a client transaction for `req` towards the request target
    pub(crate) fn send_request(
        &self,
        ctx: &mut UaContext<'_>,
        req: Request,
        owner: Option<TxOwner>,
        uack: bool,
    ) -> DialogResult<TransactionId> {
        let target = self.request_target();
        debug!("{} sending {} to {}", self.id, req.method, target);
        ctx.tm
            .new_client_transaction(ctx.sched, req, target, owner, ClientTxOptions { uack })
    }

    /// BYE whose responses nobody waits for
    pub(crate) fn send_bye(&mut self, ctx: &mut UaContext<'_>, extra: &[Header]) -> DialogResult<()> {
        let req = self.gen_request(ctx, Method::Bye, None, extra, None)?;
        self.send_request(ctx, req, None, false)?;
        Ok(())
    }

    /// Answer an in-dialog request right away
    pub(crate) fn reply(
        &self,
        ctx: &mut UaContext<'_>,
        tx: TransactionId,
        req: &Request,
        code: u16,
        reason: &str,
    ) {
        let resp = req.gen_response(code, reason, self.user_agent(ctx));
        if let Err(e) = ctx.tm.send_response(ctx.sched, tx, resp, None) {
            warn!("{} can't answer {} with {}: {}", self.id, req.method, code, e);
        }
    }

    /// Answer the INVITE we are serving, using its response template
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn send_uas_response(
        &self,
        ctx: &mut UaContext<'_>,
        code: u16,
        reason: &str,
        body: Option<&MessageBody>,
        contacts: &[Address],
        extra: &[Header],
        ack_wait: bool,
    ) -> DialogResult<()> {
        let (Some(tx), Some(template)) = (self.uas_tx, self.uas_resp.as_ref()) else {
            return Err(DialogError::protocol(500, "No INVITE to answer"));
        };
        let mut resp: Response = template.clone();
        let status = StatusCode::new(code)?;
        resp.set_status(status, reason);
        resp.headers.remove(&HeaderName::Contact);
        for contact in contacts {
            resp.headers.append(HeaderName::Contact, contact.to_string());
        }
        for header in extra {
            resp.headers.push(header.clone());
        }
        match body {
            Some(body) => resp.set_body(body.content.clone(), Some(&body.content_type)),
            None => resp.set_body(Bytes::new(), None),
        }
        let ack_owner = if ack_wait { Some(self.id) } else { None };
        ctx.tm.send_response(ctx.sched, tx, resp, ack_owner)
    }

    /// Our Contact, for responses that establish or refresh the dialog
    pub(crate) fn contact_list(&self) -> Vec<Address> {
        self.local_contact.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UaConfig;
    use crate::dialog::DialogId;

    fn response_with(record_routes: &[&str], contact: &str) -> Response {
        let mut resp = Response::new(StatusCode::OK, "OK");
        for rr in record_routes {
            resp.headers.append(HeaderName::RecordRoute, *rr);
        }
        resp.headers.append(HeaderName::Contact, contact);
        resp
    }

    fn dialog(config: UaConfig) -> Dialog {
        Dialog::new(DialogId::new(), config, HostPort::new("192.0.2.4", 5060))
    }

    #[test]
    fn test_loose_routes_reversed_for_uac() {
        let mut d = dialog(UaConfig::default());
        let resp = response_with(
            &["<sip:p2.example.net;lr>", "<sip:p1.example.net:5070;lr>"],
            "<sip:bob@192.0.2.20:5080>",
        );
        d.update_routing(&resp, true, true).unwrap();
        assert_eq!(d.routes.len(), 2);
        assert_eq!(d.routes[0].uri.host, "p1.example.net");
        assert_eq!(d.remote_addr, HostPort::new("p1.example.net", 5070));
        assert_eq!(d.remote_target.as_ref().unwrap().host, "192.0.2.20");
    }

    #[test]
    fn test_strict_router_becomes_request_uri() {
        let mut d = dialog(UaConfig::default());
        let resp = response_with(&["<sip:strict.example.net;transport=udp>"], "<sip:bob@192.0.2.20>");
        d.update_routing(&resp, true, false).unwrap();
        let target = d.remote_target.as_ref().unwrap();
        assert_eq!(target.host, "strict.example.net");
        assert!(target.params.is_empty());
        assert_eq!(d.routes.len(), 1);
        assert_eq!(d.routes[0].uri.host, "192.0.2.20");
        assert_eq!(d.remote_addr, HostPort::new("strict.example.net", 5060));
    }

    #[test]
    fn test_outbound_proxy_keeps_target_in_route_set() {
        let config = UaConfig {
            outbound_proxy: Some(HostPort::new("192.0.2.99", 5060)),
            ..UaConfig::default()
        };
        let mut d = dialog(config);
        let resp = response_with(&["<sip:p1.example.net;lr>"], "<sip:bob@192.0.2.20>");
        d.update_routing(&resp, true, true).unwrap();
        assert_eq!(d.remote_target.as_ref().unwrap().host, "p1.example.net");
        assert_eq!(d.routes.last().unwrap().uri.host, "192.0.2.20");
        assert_eq!(d.request_target(), HostPort::new("192.0.2.99", 5060));
    }

    #[test]
    fn test_no_routes_uses_contact() {
        let mut d = dialog(UaConfig::default());
        let resp = response_with(&[], "<sip:bob@192.0.2.20:5090>");
        d.update_routing(&resp, true, true).unwrap();
        assert!(d.routes.is_empty());
        assert_eq!(d.remote_addr, HostPort::new("192.0.2.20", 5090));
    }
}
