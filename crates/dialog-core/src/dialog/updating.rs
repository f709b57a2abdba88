//! Session modification in progress, in either direction

use std::time::Instant;

use tracing::{debug, warn};

use b2bua_sip_core::{Address, Header, HeaderName, Method, Request, Response, SipMessage, Uri};

use super::dialog_impl::{Dialog, UaContext};
use super::dialog_state::{Transition, UaState};
use crate::errors::DialogResult;
use crate::events::{CallEvent, EventKind, FailData, LegNotice, Origin, RedirectData, StatusData};
use crate::sdp::MessageBody;
use crate::transaction::TransactionId;

impl Dialog {
    fn disconnected_by(&mut self, ctx: &UaContext<'_>, rtime: Instant, origin: Option<Origin>) -> Transition {
        self.mark_disconnected(ctx, rtime);
        Transition::to(UaState::Disconnected).notify(LegNotice::Disconnected { code: None }, rtime, origin)
    }

    fn bye_or_warn(&mut self, ctx: &mut UaContext<'_>, event: &CallEvent) {
        if let Err(e) = self.send_bye(ctx, &event.outgoing_headers()) {
            warn!("{} can't send BYE: {}", self.id, e);
        }
    }

    fn cancel_update(&mut self, ctx: &mut UaContext<'_>) {
        if let Some(tx) = self.tr {
            if let Err(e) = ctx.tm.cancel_transaction(ctx.sched, tx, Vec::new()) {
                debug!("{} re-INVITE {} not cancelled: {}", self.id, tx, e);
            }
        }
    }

    /// Requests while our re-INVITE is pending
    pub(crate) fn uac_updating_request(
        &mut self,
        ctx: &mut UaContext<'_>,
        tx: TransactionId,
        req: &Request,
        rtime: Instant,
    ) -> DialogResult<Option<Transition>> {
        match req.method {
            Method::Invite => {
                self.reply(ctx, tx, req, 491, "Request Pending");
                Ok(None)
            }
            Method::Bye => {
                self.cancel_update(ctx);
                self.reply(ctx, tx, req, 200, "OK");
                self.queue_remote_disconnect(req, rtime);
                self.cancel_credit_timer(ctx);
                let origin = self.origin;
                Ok(Some(self.disconnected_by(ctx, rtime, origin)))
            }
            _ => Ok(None),
        }
    }

    pub(crate) fn uac_updating_response(
        &mut self,
        ctx: &mut UaContext<'_>,
        resp: &Response,
        rtime: Instant,
    ) -> DialogResult<Option<Transition>> {
        let code = resp.code();
        let reason = resp.reason().to_string();
        let body = MessageBody::from_message(resp);
        if code < 200 {
            if code != 100 {
                let status = StatusData::new(code, reason).with_body(body);
                let event = CallEvent::new(EventKind::Ring(Some(status)), rtime).with_origin(self.origin);
                self.equeue.push_back(event);
            }
            return Ok(None);
        }
        if (200..300).contains(&code) {
            let status = StatusData::new(code, reason).with_body(body.clone());
            let event = CallEvent::new(EventKind::Connect(status), rtime).with_origin(self.origin);
            self.accept_remote(ctx, body, event);
            return Ok(Some(Transition::to(UaState::Connected)));
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
            300 if !contacts.is_empty() => {
                EventKind::Redirect(Some(RedirectData { code, reason, body, contacts }))
            }
            _ => {
                self.local_sdp = None;
                EventKind::Fail(Some(FailData::new(code, reason)))
            }
        };
        let event = CallEvent::new(kind, rtime)
            .with_origin(self.origin)
            .with_reason(resp.header(&HeaderName::Reason).map(str::to_string));

        if matches!(code, 408 | 481) {
            // the peer has lost the dialog
            self.bye_or_warn(ctx, &event);
            self.equeue.push_back(event);
            self.cancel_credit_timer(ctx);
            let origin = self.origin;
            self.equeue
                .push_back(CallEvent::new(EventKind::Disconnect(None), rtime).with_origin(origin));
            return Ok(Some(self.disconnected_by(ctx, rtime, origin)));
        }
        self.equeue.push_back(event);
        Ok(Some(Transition::to(UaState::Connected)))
    }

    pub(crate) fn uac_updating_event(
        &mut self,
        ctx: &mut UaContext<'_>,
        event: CallEvent,
    ) -> DialogResult<Option<Transition>> {
        if !event.kind.is_teardown() {
            debug!("{} ignoring {} while re-INVITE is pending", self.id, event);
            return Ok(None);
        }
        self.cancel_update(ctx);
        self.bye_or_warn(ctx, &event);
        self.cancel_credit_timer(ctx);
        Ok(Some(self.disconnected_by(ctx, event.rtime, event.origin)))
    }

    /// Requests while the peer's re-INVITE waits for our answer
    pub(crate) fn uas_updating_request(
        &mut self,
        ctx: &mut UaContext<'_>,
        tx: TransactionId,
        req: &Request,
        rtime: Instant,
    ) -> DialogResult<Option<Transition>> {
        match req.method {
            Method::Invite => {
                self.reply(ctx, tx, req, 491, "Request Pending");
                Ok(None)
            }
            Method::Bye => {
                self.terminate_update(ctx, &[]);
                self.reply(ctx, tx, req, 200, "OK");
                self.queue_remote_disconnect(req, rtime);
                self.cancel_credit_timer(ctx);
                let origin = self.origin;
                Ok(Some(self.disconnected_by(ctx, rtime, origin)))
            }
            Method::Refer => {
                let Some(refer_to) = req
                    .header(&HeaderName::ReferTo)
                    .and_then(|v| v.parse::<Address>().ok())
                else {
                    self.reply(ctx, tx, req, 400, "Bad Request");
                    return Ok(None);
                };
                self.terminate_update(ctx, &[]);
                self.reply(ctx, tx, req, 202, "Accepted");
                let event = CallEvent::new(EventKind::Disconnect(Some(refer_to)), rtime)
                    .with_origin(self.origin);
                self.equeue.push_back(event);
                self.cancel_credit_timer(ctx);
                let origin = self.origin;
                Ok(Some(self.disconnected_by(ctx, rtime, origin)))
            }
            _ => Ok(None),
        }
    }

    fn terminate_update(&mut self, ctx: &mut UaContext<'_>, extra: &[Header]) {
        if let Err(e) = self.send_uas_response(ctx, 487, "Request Terminated", None, &[], extra, false) {
            debug!("{} re-INVITE already answered: {}", self.id, e);
        }
    }

    /// The application's answer to the peer's re-INVITE
    pub(crate) fn uas_updating_event(
        &mut self,
        ctx: &mut UaContext<'_>,
        event: CallEvent,
    ) -> DialogResult<Option<Transition>> {
        let extra = event.outgoing_headers();
        match &event.kind {
            EventKind::Ring(status) => {
                let (code, reason, body) = match status {
                    Some(s) => (s.code, s.reason.clone(), s.body.clone()),
                    None => (180, "Ringing".to_string(), None),
                };
                if self.suspend_local(ctx, body.as_ref(), &event) {
                    return Ok(None);
                }
                self.local_sdp = body.clone();
                self.send_uas_response(ctx, code, &reason, body.as_ref(), &[], &extra, false)?;
                Ok(None)
            }
            EventKind::Connect(status) | EventKind::PreConnect(status) => {
                let body = status.body.clone();
                if self.suspend_local(ctx, body.as_ref(), &event) {
                    return Ok(None);
                }
                self.local_sdp = body.clone();
                let contacts = self.contact_list();
                self.send_uas_response(
                    ctx,
                    status.code,
                    &status.reason,
                    body.as_ref(),
                    &contacts,
                    &extra,
                    false,
                )?;
                Ok(Some(Transition::to(UaState::Connected)))
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
                self.send_uas_response(ctx, code, &reason, body.as_ref(), &contacts, &extra, false)?;
                Ok(None)
            }
            EventKind::Fail(data) => {
                let (code, reason) = match data {
                    Some(d) => (d.code, d.reason.clone()),
                    None => (500, "Failed".to_string()),
                };
                self.remote_sdp = None;
                self.send_uas_response(ctx, code, &reason, None, &[], &extra, false)?;
                Ok(Some(Transition::to(UaState::Connected)))
            }
            EventKind::Disconnect(_) => {
                self.terminate_update(ctx, &extra);
                self.bye_or_warn(ctx, &event);
                self.cancel_credit_timer(ctx);
                Ok(Some(self.disconnected_by(ctx, event.rtime, event.origin)))
            }
            _ => {
                debug!("{} ignoring {} while answering re-INVITE", self.id, event);
                Ok(None)
            }
        }
    }
}
