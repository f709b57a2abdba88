//! Established call: re-INVITEs, BYE, REFER, INFO and keepalives

use std::time::Instant;

use tracing::{debug, info, warn};

use b2bua_sip_core::{Address, Header, HeaderName, Method, Request, Response, SipMessage};

use super::dialog_impl::{Dialog, UaContext};
use super::dialog_state::{DialogTimer, Transition, UaState};
use crate::errors::DialogResult;
use crate::events::{CallEvent, EventKind, FailData, LegNotice, StatusData};
use crate::sdp::{hold_body, MessageBody};
use crate::transaction::{TransactionId, TxOwner};

/// Keepalive answers meaning the peer does not take re-INVITEs
const KEEPALIVE_REJECTS: [u16; 3] = [408, 481, 486];

impl Dialog {
    pub(crate) fn connected_request(
        &mut self,
        ctx: &mut UaContext<'_>,
        tx: TransactionId,
        req: &Request,
        rtime: Instant,
    ) -> DialogResult<Option<Transition>> {
        match req.method {
            Method::Refer => {
                let Some(refer_to) = req
                    .header(&HeaderName::ReferTo)
                    .and_then(|v| v.parse::<Address>().ok())
                else {
                    self.reply(ctx, tx, req, 400, "Bad Request");
                    return Ok(None);
                };
                self.reply(ctx, tx, req, 202, "Accepted");
                info!("{} transferred to {}", self.id, refer_to);
                let event = CallEvent::new(EventKind::Disconnect(Some(refer_to)), rtime)
                    .with_origin(self.origin);
                self.equeue.push_back(event);
                let origin = self.origin;
                self.recv_event(
                    ctx,
                    CallEvent::new(EventKind::Disconnect(None), rtime).with_origin(origin),
                )?;
                Ok(None)
            }
            Method::Invite => self.connected_reinvite(ctx, tx, req, rtime),
            Method::Bye => {
                self.reply(ctx, tx, req, 200, "OK");
                self.queue_remote_disconnect(req, rtime);
                self.cancel_credit_timer(ctx);
                self.mark_disconnected(ctx, rtime);
                Ok(Some(Transition::to(UaState::Disconnected).notify(
                    LegNotice::Disconnected { code: None },
                    rtime,
                    self.origin,
                )))
            }
            Method::Info => {
                self.reply(ctx, tx, req, 200, "OK");
                let event = CallEvent::new(EventKind::Info(MessageBody::from_message(req)), rtime)
                    .with_origin(self.origin);
                self.equeue.push_back(event);
                Ok(None)
            }
            Method::Options => {
                self.reply(ctx, tx, req, 200, "OK");
                Ok(None)
            }
            _ => Ok(None),
        }
    }

    /// re-INVITE from the peer; a repeat of the session it already has is
    /// answered right away
    fn connected_reinvite(
        &mut self,
        ctx: &mut UaContext<'_>,
        tx: TransactionId,
        req: &Request,
        rtime: Instant,
    ) -> DialogResult<Option<Transition>> {
        let trying = req.gen_response(100, "Trying", self.user_agent(ctx));
        ctx.tm.send_response(ctx.sched, tx, trying.clone(), None)?;
        self.uas_resp = Some(trying);
        self.uas_tx = Some(tx);

        let body = match MessageBody::from_message(req) {
            None => self.remote_sdp.as_ref().map(hold_body),
            Some(body) => {
                if matches!(&self.remote_sdp, Some(r) if r.same_content(&body)) {
                    debug!("{} session unchanged, answering re-INVITE", self.id);
                    let contacts = self.contact_list();
                    let local = self.local_sdp.clone();
                    self.send_uas_response(ctx, 200, "OK", local.as_ref(), &contacts, &[], false)?;
                    return Ok(None);
                }
                Some(body)
            }
        };
        let event = CallEvent::new(EventKind::Update(body.clone()), rtime)
            .with_origin(self.origin)
            .with_reason(req.header(&HeaderName::Reason).map(str::to_string))
            .with_max_forwards(req.max_forwards().ok().flatten());
        self.accept_remote(ctx, body, event);
        Ok(Some(Transition::to(UaState::UasUpdating)))
    }

    /// ACK carrying the answer to a 2xx sent with a deferred answer
    pub(crate) fn connected_ack(
        &mut self,
        ctx: &mut UaContext<'_>,
        req: &Request,
        rtime: Instant,
    ) -> DialogResult<Option<Transition>> {
        let body = MessageBody::from_message(req);
        let status = StatusData::new(200, "ACK").with_body(body.clone());
        let event = CallEvent::new(EventKind::Connect(status), rtime).with_origin(self.origin);
        self.cancel_timer(ctx, DialogTimer::Expire);
        self.cancel_credit_timer(ctx);
        self.start_credit_timer(ctx, rtime);
        self.connect_ts = Some(rtime);
        self.notify_now(ctx, LegNotice::Connected, rtime);
        self.accept_remote(ctx, body, event);
        Ok(None)
    }

    pub(crate) fn connected_event(
        &mut self,
        ctx: &mut UaContext<'_>,
        event: CallEvent,
    ) -> DialogResult<Option<Transition>> {
        match &event.kind {
            EventKind::Disconnect(_) | EventKind::Fail(_) | EventKind::Redirect(_) => {
                let target = match &event.kind {
                    EventKind::Disconnect(also) => also.clone(),
                    EventKind::Redirect(Some(data)) => {
                        data.contacts.first().cloned().map(Address::new)
                    }
                    _ => None,
                };
                let mut extra = event.outgoing_headers();
                match target {
                    Some(target) if self.config.use_refer => {
                        extra.push(Header::new(HeaderName::ReferTo, target.to_string()));
                        if let Some(local) = &self.local_uri {
                            let by = Address::new(local.uri.clone());
                            extra.push(Header::new(HeaderName::ReferredBy, by.to_string()));
                        }
                        let sent = self
                            .gen_request(ctx, Method::Refer, None, &extra, None)
                            .and_then(|req| self.send_request(ctx, req, Some(TxOwner::Refer(self.id)), false));
                        if let Err(e) = sent {
                            warn!("{} can't send REFER: {}", self.id, e);
                        }
                    }
                    target => {
                        if let Some(also) = target {
                            extra.push(Header::new(HeaderName::Also, also.to_string()));
                        }
                        if let Err(e) = self.send_bye(ctx, &extra) {
                            warn!("{} can't send BYE: {}", self.id, e);
                        }
                    }
                }
                self.cancel_credit_timer(ctx);
                self.mark_disconnected(ctx, event.rtime);
                Ok(Some(Transition::to(UaState::Disconnected).notify(
                    LegNotice::Disconnected { code: None },
                    event.rtime,
                    event.origin,
                )))
            }
            EventKind::Update(body) => self.connected_update(ctx, body.clone(), &event),
            EventKind::Info(body) => {
                let body = body.clone();
                let req = self.gen_request(ctx, Method::Info, body.as_ref(), &event.outgoing_headers(), None)?;
                self.send_request(ctx, req, None, false)?;
                Ok(None)
            }
            EventKind::Connect(status) if self.pending_tr.is_some() => {
                let body = status.body.clone();
                if self.suspend_local(ctx, body.as_ref(), &event) {
                    return Ok(None);
                }
                self.cancel_timer(ctx, DialogTimer::Expire);
                self.start_credit_timer(ctx, event.rtime);
                self.connect_ts = Some(event.rtime);
                self.local_sdp = body.clone();
                if let Some(tx) = self.pending_tr.take() {
                    let ack_body = body.map(|b| (b.content, b.content_type));
                    ctx.tm.send_ack(ctx.sched, tx, ack_body)?;
                }
                self.notify_now(ctx, LegNotice::Connected, event.rtime);
                Ok(None)
            }
            _ => {
                debug!("{} ignoring {} in connected state", self.id, event);
                Ok(None)
            }
        }
    }

    /// Local session change: re-INVITE unless the body is what the peer
    /// already has
    fn connected_update(
        &mut self,
        ctx: &mut UaContext<'_>,
        body: Option<MessageBody>,
        event: &CallEvent,
    ) -> DialogResult<Option<Transition>> {
        // no local session and no new body also counts as unchanged
        let unchanged = match (&self.local_sdp, &body) {
            (Some(local), Some(new)) => local.same_content(new),
            (None, None) => true,
            _ => false,
        };
        if unchanged {
            let status = StatusData::new(200, "OK").with_body(self.remote_sdp.clone());
            let reply = CallEvent::new(EventKind::Connect(status), event.rtime).with_origin(event.origin);
            self.equeue.push_back(reply);
            return Ok(None);
        }
        if self.suspend_local(ctx, body.as_ref(), event) {
            return Ok(None);
        }
        let max_forwards = match event.max_forwards {
            Some(0) => {
                let fail = CallEvent::new(
                    EventKind::Fail(Some(FailData::new(483, "Too Many Hops"))),
                    event.rtime,
                )
                .with_origin(event.origin);
                self.equeue.push_back(fail);
                return Ok(None);
            }
            Some(n) => Some(n - 1),
            None => None,
        };
        let req = self.gen_request(ctx, Method::Invite, body.as_ref(), &event.outgoing_headers(), max_forwards)?;
        self.local_sdp = body;
        let tx = self.send_request(ctx, req, Some(TxOwner::Dialog(self.id)), false)?;
        self.tr = Some(tx);
        Ok(Some(Transition::to(UaState::UacUpdating)))
    }

    pub(crate) fn send_keepalive(&mut self, ctx: &mut UaContext<'_>) {
        if self.state != UaState::Connected {
            return;
        }
        let body = self.local_sdp.clone();
        let sent = self
            .gen_request(ctx, Method::Invite, body.as_ref(), &[], None)
            .and_then(|req| self.send_request(ctx, req, Some(TxOwner::Keepalive(self.id)), false));
        match sent {
            Ok(tx) => self.ka_tx = Some(tx),
            Err(e) => warn!("{} can't send keepalive: {}", self.id, e),
        }
    }

    pub(crate) fn keepalive_response(&mut self, ctx: &mut UaContext<'_>, resp: &Response) {
        let code = resp.code();
        if self.state != UaState::Connected || code < 200 {
            return;
        }
        self.ka_tx = None;
        self.keepalives += 1;
        if KEEPALIVE_REJECTS.contains(&code) {
            if self.keepalives == 1 {
                warn!(
                    "{} remote UA at {} does not support re-INVITEs ({}), disabling keepalive",
                    self.id, self.remote_addr, code
                );
                let grace = ctx.config.keepalive_grace;
                self.arm_in(ctx, grace, DialogTimer::KeepaliveGrace);
            } else {
                warn!("{} keepalive answered with {}, disconnecting", self.id, code);
                let now = ctx.now();
                self.disconnect(ctx, now, None);
            }
            return;
        }
        if let Some(interval) = self.config.keepalive_interval {
            self.arm_in(ctx, interval, DialogTimer::Keepalive);
        }
    }

    /// The peer's answer to our REFER; the leg is closed with BYE either way
    pub(crate) fn refer_response(&mut self, ctx: &mut UaContext<'_>, resp: &Response) {
        if resp.code() < 200 || self.refer_done {
            return;
        }
        self.refer_done = true;
        debug!("{} REFER answered with {}", self.id, resp.code());
        if let Err(e) = self.send_bye(ctx, &[]) {
            warn!("{} can't send BYE after REFER: {}", self.id, e);
        }
    }
}
