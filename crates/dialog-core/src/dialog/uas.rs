//! Incoming call setup on the UAS side

use std::time::Instant;

use tracing::{debug, info, warn};

use b2bua_sip_core::{Address, HeaderName, Method, Request, SipMessage, Uri};

use super::dialog_impl::{Dialog, UaContext};
use super::dialog_state::{DialogTimer, Transition, UaState};
use crate::errors::DialogResult;
use crate::events::{CallEvent, EventKind, LegNotice, Origin, TryData};
use crate::sdp::MessageBody;
use crate::transaction::TransactionId;

impl Dialog {
    /// Dialog creating INVITE
    pub(crate) fn uas_idle_request(
        &mut self,
        ctx: &mut UaContext<'_>,
        tx: TransactionId,
        req: &Request,
        rtime: Instant,
    ) -> DialogResult<Option<Transition>> {
        self.origin = Some(Origin::Caller);
        let server = self.user_agent(ctx).map(str::to_string);
        let trying = req.gen_response(100, "Trying", server.as_deref());
        ctx.tm.send_response(ctx.sched, tx, trying.clone(), None)?;

        let mut template = trying;
        template.set_to_tag(&self.local_tag)?;
        let local = ctx.tm.local_addr();
        self.local_cseq = 100;
        self.local_contact = Some(Address::new(Uri::sip(None, local.host, Some(local.port))));
        self.remote_target = req.first_contact()?.map(|a| a.uri);
        self.update_routing(&template, false, false)?;
        self.remote_addr0 = self.remote_addr.clone();
        self.local_uri = Some(template.to_address()?);
        let from = req.from_address()?;
        self.remote_uri = Some(from.clone());
        self.call_id = req.call_id()?.to_string();
        ctx.tm.reg_consumer(&self.call_id, self.id);
        self.branch = req.top_via()?.branch().map(str::to_string);
        self.uas_resp = Some(template);
        self.uas_tx = Some(tx);

        let body = MessageBody::from_message(req);
        let data = TryData {
            call_id: Some(self.call_id.clone()),
            calling: from.uri.user.clone(),
            called: req.uri.user.clone(),
            body: body.clone(),
            auth: req.header(&HeaderName::Authorization).map(str::to_string),
            calling_name: from.display_name.clone(),
        };
        info!(
            "{} incoming call from {} to {} (Call-ID {})",
            self.id,
            data.calling.as_deref().unwrap_or("-"),
            data.called.as_deref().unwrap_or("-"),
            self.call_id
        );
        let event = CallEvent::new(EventKind::Try(data), rtime)
            .with_origin(self.origin)
            .with_reason(req.header(&HeaderName::Reason).map(str::to_string))
            .with_max_forwards(req.max_forwards().ok().flatten());
        self.arm_setup_timers(ctx, rtime, false);
        self.accept_remote(ctx, body, event);
        self.setup_ts = Some(rtime);
        Ok(Some(Transition::to(UaState::UasTrying)))
    }

    /// Answers from the application while the peer's INVITE is pending
    pub(crate) fn uas_early_event(
        &mut self,
        ctx: &mut UaContext<'_>,
        event: CallEvent,
    ) -> DialogResult<Option<Transition>> {
        let rtime = event.rtime;
        let extra = event.outgoing_headers();
        match &event.kind {
            EventKind::Ring(status) => {
                let (code, reason, body) = match status {
                    Some(s) => (s.code, s.reason.clone(), s.body.clone()),
                    None => (180, "Ringing".to_string(), None),
                };
                if code == 100 {
                    return Ok(None);
                }
                if self.suspend_local(ctx, body.as_ref(), &event) {
                    return Ok(None);
                }
                if body.is_some() {
                    self.local_sdp = body.clone();
                }
                let contacts = self.contact_list();
                self.send_uas_response(ctx, code, &reason, body.as_ref(), &contacts, &extra, false)?;
                if self.state == UaState::UasTrying {
                    if self.cancel_timer(ctx, DialogTimer::NoProgress) {
                        self.arm_expire(ctx);
                    }
                    if self.p1xx_ts.is_none() {
                        self.p1xx_ts = Some(rtime);
                    }
                    return Ok(Some(Transition::to(UaState::UasRinging).notify(
                        LegNotice::Ringing { code },
                        rtime,
                        event.origin,
                    )));
                }
                self.notify_now(ctx, LegNotice::Ringing { code }, rtime);
                Ok(None)
            }
            EventKind::Connect(status) | EventKind::PreConnect(status) => {
                let preconnect = matches!(event.kind, EventKind::PreConnect(_));
                let body = status.body.clone();
                if self.suspend_local(ctx, body.as_ref(), &event) {
                    return Ok(None);
                }
                if body.is_some() {
                    self.local_sdp = body.clone();
                }
                self.cancel_timer(ctx, DialogTimer::NoProgress);
                let contacts = self.contact_list();
                self.send_uas_response(
                    ctx,
                    status.code,
                    &status.reason,
                    body.as_ref(),
                    &contacts,
                    &extra,
                    preconnect,
                )?;
                if preconnect {
                    return Ok(Some(Transition::to(UaState::Connected)));
                }
                self.cancel_timer(ctx, DialogTimer::Expire);
                self.start_credit_timer(ctx, rtime);
                self.connect_ts = Some(rtime);
                Ok(Some(Transition::to(UaState::Connected).notify(
                    LegNotice::Connected,
                    rtime,
                    event.origin,
                )))
            }
            EventKind::Redirect(data) => {
                let (code, reason, body, contacts) = match data {
                    Some(d) => (
                        d.code,
                        d.reason.clone(),
                        d.body.clone(),
                        d.contacts.iter().cloned().map(Address::new).collect::<Vec<_>>(),
                    ),
                    None => (500, "Failed".to_string(), None, Vec::new()),
                };
                if let Err(e) =
                    self.send_uas_response(ctx, code, &reason, body.as_ref(), &contacts, &extra, false)
                {
                    warn!("{} can't redirect: {}", self.id, e);
                }
                self.mark_disconnected(ctx, rtime);
                Ok(Some(Transition::to(UaState::Failed).notify(
                    LegNotice::Failed { code },
                    rtime,
                    event.origin,
                )))
            }
            EventKind::Fail(data) => {
                let (code, reason) = match data {
                    Some(d) => (d.code, d.reason.clone()),
                    None => (500, "Failed".to_string()),
                };
                if let Err(e) = self.send_uas_response(ctx, code, &reason, None, &[], &extra, false) {
                    warn!("{} can't reject: {}", self.id, e);
                }
                self.mark_disconnected(ctx, rtime);
                Ok(Some(Transition::to(UaState::Failed).notify(
                    LegNotice::Failed { code },
                    rtime,
                    event.origin,
                )))
            }
            EventKind::Disconnect(_) => {
                if let Err(e) =
                    self.send_uas_response(ctx, 500, "Disconnected", None, &[], &extra, false)
                {
                    warn!("{} can't reject: {}", self.id, e);
                }
                self.mark_disconnected(ctx, rtime);
                Ok(Some(Transition::to(UaState::Disconnected).notify(
                    LegNotice::Disconnected { code: Some(self.last_scode) },
                    rtime,
                    event.origin,
                )))
            }
            _ => {
                debug!("{} ignoring {} before the call is answered", self.id, event);
                Ok(None)
            }
        }
    }

    /// BYE from the caller while we are still ringing
    pub(crate) fn uas_ringing_request(
        &mut self,
        ctx: &mut UaContext<'_>,
        tx: TransactionId,
        req: &Request,
        rtime: Instant,
    ) -> DialogResult<Option<Transition>> {
        if req.method != Method::Bye {
            return Ok(None);
        }
        if let Err(e) = self.send_uas_response(ctx, 487, "Request Terminated", None, &[], &[], false) {
            debug!("{} INVITE already answered: {}", self.id, e);
        }
        self.reply(ctx, tx, req, 200, "OK");
        self.queue_remote_disconnect(req, rtime);
        self.mark_disconnected(ctx, rtime);
        Ok(Some(Transition::to(UaState::Disconnected).notify(
            LegNotice::Disconnected { code: None },
            rtime,
            self.origin,
        )))
    }

    /// Queue the Disconnect event reporting a BYE (or REFER) from the peer
    pub(crate) fn queue_remote_disconnect(&mut self, req: &Request, rtime: Instant) {
        let also = req
            .header(&HeaderName::Also)
            .and_then(|v| v.parse::<Address>().ok());
        let event = CallEvent::new(EventKind::Disconnect(also), rtime)
            .with_origin(self.origin)
            .with_reason(req.header(&HeaderName::Reason).map(str::to_string));
        self.equeue.push_back(event);
    }
}
