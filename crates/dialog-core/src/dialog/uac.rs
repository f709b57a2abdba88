//! Outgoing call setup: Idle, Trying, Ringing and Cancelling on the UAC side

use std::time::Instant;

use tracing::{debug, info, warn};

use b2bua_sip_core::{
    generate_call_id, Address, Header, HeaderName, Method, Response, SipMessage, Uri,
};

use super::dialog_impl::{Dialog, UaContext};
use super::dialog_state::{DialogTimer, Transition, UaState};
use crate::errors::DialogResult;
use crate::events::{
    CallEvent, EventKind, FailData, LegNotice, Origin, RedirectData, StatusData, TryData,
};
use crate::sdp::MessageBody;
use crate::transaction::{TransactionId, TxOwner};

impl Dialog {
    pub(crate) fn uac_idle_event(
        &mut self,
        ctx: &mut UaContext<'_>,
        event: CallEvent,
    ) -> DialogResult<Option<Transition>> {
        match &event.kind {
            EventKind::Try(data) => {
                let data = data.clone();
                self.uac_start(ctx, data, &event)
            }
            EventKind::Fail(_) | EventKind::Disconnect(_) => Ok(Some(
                Transition::to(UaState::Dead).notify(
                    LegNotice::Disconnected { code: None },
                    event.rtime,
                    event.origin,
                ),
            )),
            _ => Ok(None),
        }
    }

    fn uac_start(
        &mut self,
        ctx: &mut UaContext<'_>,
        data: TryData,
        event: &CallEvent,
    ) -> DialogResult<Option<Transition>> {
        self.origin = Some(Origin::Callee);
        self.setup_ts = Some(event.rtime);
        if self.suspend_local(ctx, data.body.as_ref(), event) {
            return Ok(None);
        }
        if data.body.is_none() {
            self.late_media = true;
        }
        let local = ctx.tm.local_addr();
        self.call_id = data
            .call_id
            .clone()
            .unwrap_or_else(|| generate_call_id(Some(local.host.as_str())));
        ctx.tm.reg_consumer(&self.call_id, self.id);

        let called = data.called.as_deref();
        let next_hop = self.remote_addr0.clone();
        self.remote_target = Some(Uri::sip(called, next_hop.host.clone(), Some(next_hop.port)));
        self.remote_uri = Some(Address::new(Uri::sip(called, next_hop.host.clone(), None)));
        self.remote_addr = next_hop;

        let calling = data.calling.as_deref();
        let mut from = Address::new(Uri::sip(calling, local.host.clone(), None));
        if let Some(name) = &data.calling_name {
            from = from.with_display_name(name.clone());
        }
        from.set_tag(self.local_tag.clone());
        self.local_uri = Some(from);
        self.local_cseq = 200;
        self.local_contact = Some(Address::new(Uri::sip(calling, local.host, Some(local.port))));
        self.routes.clear();
        self.local_sdp = data.body.clone();

        let mut extra = event.outgoing_headers();
        if self.config.pass_auth {
            if let Some(auth) = &data.auth {
                extra.push(Header::new(HeaderName::Authorization, auth.clone()));
            }
        }
        let body = self.local_sdp.clone();
        let req = self.gen_request(ctx, Method::Invite, body.as_ref(), &extra, event.max_forwards)?;
        info!(
            "{} calling {} from {} (Call-ID {})",
            self.id,
            called.unwrap_or("-"),
            calling.unwrap_or("-"),
            self.call_id
        );
        let tx = self.send_request(ctx, req, Some(TxOwner::Dialog(self.id)), self.late_media)?;
        self.tr = Some(tx);
        self.arm_setup_timers(ctx, event.rtime, true);
        Ok(Some(Transition::to(UaState::UacTrying)))
    }

    pub(crate) fn uac_trying_response(
        &mut self,
        ctx: &mut UaContext<'_>,
        tx: TransactionId,
        resp: &Response,
        rtime: Instant,
    ) -> DialogResult<Option<Transition>> {
        let code = resp.code();
        self.last_scode = code;
        if self.cancel_timer(ctx, DialogTimer::NoReply) {
            match (code, self.no_progress_time, self.no_progress_at) {
                (100, Some(_), Some(at)) => self.arm_at(ctx, at, DialogTimer::NoProgress),
                (c, _, _) if c < 200 => self.arm_expire(ctx),
                _ => {}
            }
        }
        let body = MessageBody::from_message(resp);
        if code == 100 {
            self.p100_ts = Some(rtime);
            let status = StatusData::new(code, resp.reason()).with_body(body);
            let event = CallEvent::new(EventKind::Ring(Some(status)), rtime).with_origin(self.origin);
            self.equeue.push_back(event);
            return Ok(None);
        }
        if self.cancel_timer(ctx, DialogTimer::NoProgress) && code < 200 {
            self.arm_expire(ctx);
        }
        if code < 200 {
            let status = StatusData::new(code, resp.reason()).with_body(body.clone());
            let event = CallEvent::new(EventKind::Ring(Some(status)), rtime).with_origin(self.origin);
            self.accept_remote(ctx, body, event);
            self.p1xx_ts = Some(rtime);
            return Ok(Some(Transition::to(UaState::UacRinging).notify(
                LegNotice::Ringing { code },
                rtime,
                self.origin,
            )));
        }
        self.cancel_timer(ctx, DialogTimer::Expire);
        self.uac_final_response(ctx, tx, resp, rtime).map(Some)
    }

    pub(crate) fn uac_ringing_response(
        &mut self,
        ctx: &mut UaContext<'_>,
        tx: TransactionId,
        resp: &Response,
        rtime: Instant,
    ) -> DialogResult<Option<Transition>> {
        let code = resp.code();
        if code < 200 {
            if matches!(self.p1xx_ts, Some(last) if rtime < last) {
                return Ok(None);
            }
            self.p1xx_ts = Some(rtime);
            self.last_scode = code;
            let body = MessageBody::from_message(resp);
            let status = StatusData::new(code, resp.reason()).with_body(body.clone());
            let event = CallEvent::new(EventKind::Ring(Some(status)), rtime).with_origin(self.origin);
            self.notify_now(ctx, LegNotice::Ringing { code }, rtime);
            self.accept_remote(ctx, body, event);
            return Ok(None);
        }
        self.cancel_timer(ctx, DialogTimer::Expire);
        self.uac_final_response(ctx, tx, resp, rtime).map(Some)
    }

    /// Final response to the initial INVITE
    fn uac_final_response(
        &mut self,
        ctx: &mut UaContext<'_>,
        tx: TransactionId,
        resp: &Response,
        rtime: Instant,
    ) -> DialogResult<Transition> {
        let code = resp.code();
        self.last_scode = code;
        let reason = resp.reason().to_string();
        let body = MessageBody::from_message(resp);

        if (200..300).contains(&code) {
            self.update_routing(resp, true, true)?;
            let Some(tag) = resp.to_tag()? else {
                warn!("{} {} answer without To tag", self.id, code);
                let fail = CallEvent::new(
                    EventKind::Fail(Some(FailData::new(502, "Bad Gateway"))),
                    rtime,
                )
                .with_origin(self.origin);
                self.equeue.push_back(fail);
                if let Err(e) = self.send_bye(ctx, &[]) {
                    warn!("{} can't send BYE: {}", self.id, e);
                }
                self.mark_disconnected(ctx, rtime);
                return Ok(Transition::to(UaState::Failed).notify(
                    LegNotice::Failed { code: 502 },
                    rtime,
                    self.origin,
                ));
            };
            if let Some(remote) = self.remote_uri.as_mut() {
                remote.set_tag(tag);
            }
            let status = StatusData::new(code, reason).with_body(body.clone());
            if !self.late_media || body.is_none() {
                self.late_media = false;
                let event = CallEvent::new(EventKind::Connect(status), rtime).with_origin(self.origin);
                self.start_credit_timer(ctx, rtime);
                self.connect_ts = Some(rtime);
                self.accept_remote(ctx, body, event);
                return Ok(Transition::to(UaState::Connected).notify(
                    LegNotice::Connected,
                    rtime,
                    self.origin,
                ));
            }
            let event = CallEvent::new(EventKind::PreConnect(status), rtime).with_origin(self.origin);
            self.pending_tr = Some(tx);
            self.accept_remote(ctx, body, event);
            return Ok(Transition::to(UaState::Connected));
        }

        let contacts: Vec<Uri> = resp
            .contacts()
            .unwrap_or_default()
            .into_iter()
            .map(|a| a.uri)
            .collect();
        let kind = match code {
            301 | 302 if !contacts.is_empty() => EventKind::Redirect(Some(RedirectData {
                code,
                reason,
                body,
                contacts: contacts.into_iter().take(1).collect(),
            })),
            300 if !contacts.is_empty() => EventKind::Redirect(Some(RedirectData {
                code,
                reason,
                body,
                contacts,
            })),
            _ => {
                let mut fail = FailData::new(code, reason);
                if self.config.pass_auth {
                    let name = match code {
                        401 => Some(HeaderName::WwwAuthenticate),
                        407 => Some(HeaderName::ProxyAuthenticate),
                        _ => None,
                    };
                    fail.challenge = name.and_then(|name| {
                        resp.header(&name).map(|value| Header::new(name.clone(), value))
                    });
                }
                EventKind::Fail(Some(fail))
            }
        };
        let event = CallEvent::new(kind, rtime)
            .with_origin(self.origin)
            .with_reason(resp.header(&HeaderName::Reason).map(str::to_string));
        debug!("{} call failed with {}", self.id, code);
        self.mark_disconnected(ctx, rtime);
        self.equeue.push_back(event);
        Ok(Transition::to(UaState::Failed).notify(LegNotice::Failed { code }, rtime, self.origin))
    }

    /// Call-control events while our INVITE is pending
    pub(crate) fn uac_early_event(
        &mut self,
        ctx: &mut UaContext<'_>,
        event: CallEvent,
    ) -> DialogResult<Option<Transition>> {
        if !event.kind.is_teardown() {
            debug!("{} ignoring {} while the call is being set up", self.id, event);
            return Ok(None);
        }
        if let Some(tx) = self.tr {
            if let Err(e) = ctx.tm.cancel_transaction(ctx.sched, tx, event.outgoing_headers()) {
                warn!("{} can't cancel {}: {}", self.id, tx, e);
            }
        }
        for timer in [DialogTimer::NoReply, DialogTimer::NoProgress, DialogTimer::Expire] {
            self.cancel_timer(ctx, timer);
        }
        self.mark_disconnected(ctx, event.rtime);
        Ok(Some(Transition::to(UaState::UacCancelling).notify(
            LegNotice::Disconnected { code: Some(self.last_scode) },
            event.rtime,
            event.origin,
        )))
    }

    /// Final answer to a cancelled INVITE; a 2xx that raced the CANCEL is
    /// torn down with BYE
    pub(crate) fn uac_cancelling_response(
        &mut self,
        ctx: &mut UaContext<'_>,
        resp: &Response,
    ) -> DialogResult<Option<Transition>> {
        let code = resp.code();
        if code < 200 {
            return Ok(None);
        }
        if (200..300).contains(&code) {
            self.update_routing(resp, true, true)?;
            if let Some(tag) = resp.to_tag()? {
                if let Some(remote) = self.remote_uri.as_mut() {
                    remote.set_tag(tag);
                }
            }
            self.send_bye(ctx, &[])?;
        }
        Ok(Some(Transition::to(UaState::Disconnected)))
    }
}
