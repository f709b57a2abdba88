//! Message routing for incoming datagrams
//!
//! A new request is offered, in order, to:
//!
//! 1. the legs registered for its Call-ID that recognise it as theirs
//! 2. the application's [`RequestHandler`], if one is installed
//! 3. the default policy: 481 for requests carrying a To tag, a new UAS
//!    leg for INVITE, 200 for NOTIFY and PING, 501 for anything else

use std::net::SocketAddr;
use std::time::Instant;

use tracing::{debug, info, warn};

use b2bua_sip_core::{HostPort, Method, Request, Response, SipMessage};

use super::core::DialogManager;
use crate::config::UaConfig;
use crate::dialog::{Dialog, DialogId, UaState};
use crate::transaction::{Incoming, RequestOutcome, TransactionId};

/// What to do with a request no leg has claimed
#[derive(Debug)]
pub enum RequestDisposition {
    /// Answer with this response
    Respond(Response),
    /// Create a UAS leg with this configuration
    NewDialog(UaConfig),
    /// Fall back to the default policy
    Default,
    /// Leave it unanswered
    Ignore,
}

/// Application hook for out-of-dialog requests
pub trait RequestHandler: Send {
    fn on_request(&mut self, request: &Request, rtime: Instant) -> RequestDisposition;
}

impl<F> RequestHandler for F
where
    F: FnMut(&Request, Instant) -> RequestDisposition + Send,
{
    fn on_request(&mut self, request: &Request, rtime: Instant) -> RequestDisposition {
        self(request, rtime)
    }
}

impl DialogManager {
    /// Feed one received datagram into the engine
    pub fn handle_incoming(&mut self, data: &[u8], source: SocketAddr, rtime: Instant) {
        self.scheduler.set_now(rtime);
        let incoming = self
            .tm
            .handle_incoming(&mut self.scheduler, data, HostPort::from(source), rtime);
        if let Incoming::Request { tx, request, rtime } = incoming {
            let outcome = self.route_request(tx, request, rtime);
            self.tm.apply_outcome(&mut self.scheduler, tx, outcome);
        }
        self.settle();
    }

    fn route_request(
        &mut self,
        tx: TransactionId,
        req: Request,
        rtime: Instant,
    ) -> Option<RequestOutcome> {
        if let Some(id) = self.claimant(&req) {
            return self
                .with_dialog(id, |d, ctx| d.recv_request(ctx, tx, req, rtime))
                .flatten();
        }
        if let Some(handler) = self.request_handler.as_mut() {
            match handler.on_request(&req, rtime) {
                RequestDisposition::Respond(resp) => {
                    return Some(RequestOutcome { response: Some(resp), ..Default::default() })
                }
                RequestDisposition::NewDialog(config) => {
                    return self.accept_dialog(config, tx, req, rtime)
                }
                RequestDisposition::Ignore => return None,
                RequestDisposition::Default => {}
            }
        }
        self.default_route(tx, req, rtime)
    }

    /// The leg an in-dialog request belongs to
    fn claimant(&self, req: &Request) -> Option<DialogId> {
        let call_id = req.call_id().ok()?;
        self.tm
            .consumers(call_id)
            .iter()
            .copied()
            .find(|id| self.dialogs.get(id).map(|d| d.is_yours(req)).unwrap_or(false))
    }

    fn default_route(
        &mut self,
        tx: TransactionId,
        req: Request,
        rtime: Instant,
    ) -> Option<RequestOutcome> {
        let server = self.config.user_agent.as_deref();
        let has_to_tag = req
            .to_address()
            .map(|to| to.tag().is_some())
            .unwrap_or(false);
        let (code, reason) = if has_to_tag {
            (481, "Call Leg/Transaction Does Not Exist")
        } else {
            match &req.method {
                Method::Invite if self.config.accept_invites => {
                    let config = self.config.default_ua.clone();
                    return self.accept_dialog(config, tx, req, rtime);
                }
                Method::Notify => (200, "OK"),
                Method::Extension(m) if m.eq_ignore_ascii_case("PING") => (200, "OK"),
                _ => (501, "Not Implemented"),
            }
        };
        debug!("answering unclaimed {} with {}", req.method, code);
        let response = req.gen_response(code, reason, server);
        Some(RequestOutcome { response: Some(response), ..Default::default() })
    }

    /// New UAS leg for a dialog creating INVITE
    fn accept_dialog(
        &mut self,
        config: UaConfig,
        tx: TransactionId,
        req: Request,
        rtime: Instant,
    ) -> Option<RequestOutcome> {
        if req.method != Method::Invite {
            warn!("can't create a dialog for {}", req.method);
            let response = req.gen_response(501, "Not Implemented", self.config.user_agent.as_deref());
            return Some(RequestOutcome { response: Some(response), ..Default::default() });
        }
        let next_hop = match req.top_via() {
            Ok(via) => via.response_addr(),
            Err(e) => {
                warn!("INVITE without usable Via: {}", e);
                return None;
            }
        };
        let id = DialogId::new();
        info!("{} created for incoming INVITE from {}", id, next_hop);
        self.dialogs.insert(id, Dialog::new(id, config, next_hop));
        let server = self.config.user_agent.clone();
        let fallback = req.gen_response(500, "Server Internal Error", server.as_deref());
        let outcome = self
            .with_dialog(id, |d, ctx| d.recv_request(ctx, tx, req, rtime))
            .flatten();
        if self.dialogs.get(&id).map(|d| d.state() == UaState::Idle).unwrap_or(false) {
            warn!("{} could not be set up, rejecting INVITE", id);
            if let Some(d) = self.dialogs.remove(&id) {
                self.tm.unreg_consumer(d.call_id(), id);
            }
            return Some(RequestOutcome { response: Some(fallback), ..Default::default() });
        }
        outcome
    }
}
