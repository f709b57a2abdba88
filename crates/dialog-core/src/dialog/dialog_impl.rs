//! Call leg implementation
//!
//! A [`Dialog`] is one leg of a B2BUA call. It is driven from three sides:
//!
//! - SIP requests and responses handed over by the transaction manager
//! - call-control events from the application ([`CallEvent`])
//! - its own lifecycle timers ([`DialogTimer`])
//!
//! Each input is dispatched to the handler of the current [`UaState`]. A
//! handler either leaves the state alone or returns a [`Transition`]; the
//! transition is applied by [`Dialog::change_state`], which runs the exit
//! and entry effects of the two states before the lifecycle notice is sent.
//! Events queued by a handler are emitted afterwards, strictly in sequence
//! order.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, trace, warn};

use b2bua_sip_core::{generate_tag, Address, HostPort, Request, Response, SipMessage, Uri};

use super::dialog_id::DialogId;
use super::dialog_state::{DialogTimer, Transition, UaState};
use crate::config::{EngineConfig, UaConfig};
use crate::errors::DialogResult;
use crate::events::{CallEvent, EventKind, FailData, LegNotice, Notification, Origin};
use crate::manager::{DialogManager, EngineTimer};
use crate::reactor::{ReactorHandle, Repeat, Scheduler, TimerHandle};
use crate::sdp::{MessageBody, SdpCompletion, SdpError, SdpRewriter, SdpSide};
use crate::transaction::{RequestOutcome, TransactionId, TransactionManager, TransactionState};

/// Everything a dialog needs from the engine while it handles one input
pub struct UaContext<'a> {
    pub(crate) tm: &'a mut TransactionManager,
    pub(crate) sched: &'a mut Scheduler<EngineTimer>,
    pub(crate) config: &'a EngineConfig,
    pub(crate) handle: &'a ReactorHandle<DialogManager>,
    pub(crate) notify: &'a UnboundedSender<Notification>,
    pub(crate) sdp: Option<&'a Arc<dyn SdpRewriter>>,
}

impl UaContext<'_> {
    pub fn now(&self) -> Instant {
        self.sched.now()
    }
}

/// Handles of the armed lifecycle timers
#[derive(Debug, Default, Clone)]
pub struct DialogTimers {
    pub expire: Option<TimerHandle>,
    pub no_progress: Option<TimerHandle>,
    pub no_reply: Option<TimerHandle>,
    pub credit: Option<TimerHandle>,
    pub keepalive: Option<TimerHandle>,
    pub keepalive_grace: Option<TimerHandle>,
    pub godead: Option<TimerHandle>,
    pub cancel_give_up: Option<TimerHandle>,
}

impl DialogTimers {
    pub fn get(&self, timer: DialogTimer) -> Option<TimerHandle> {
        match timer {
            DialogTimer::Expire => self.expire,
            DialogTimer::NoProgress => self.no_progress,
            DialogTimer::NoReply => self.no_reply,
            DialogTimer::Credit => self.credit,
            DialogTimer::Keepalive => self.keepalive,
            DialogTimer::KeepaliveGrace => self.keepalive_grace,
            DialogTimer::GoDead => self.godead,
            DialogTimer::CancelGiveUp => self.cancel_give_up,
        }
    }

    pub(crate) fn slot(&mut self, timer: DialogTimer) -> &mut Option<TimerHandle> {
        match timer {
            DialogTimer::Expire => &mut self.expire,
            DialogTimer::NoProgress => &mut self.no_progress,
            DialogTimer::NoReply => &mut self.no_reply,
            DialogTimer::Credit => &mut self.credit,
            DialogTimer::Keepalive => &mut self.keepalive,
            DialogTimer::KeepaliveGrace => &mut self.keepalive_grace,
            DialogTimer::GoDead => &mut self.godead,
            DialogTimer::CancelGiveUp => &mut self.cancel_give_up,
        }
    }

    fn all_mut(&mut self) -> [&mut Option<TimerHandle>; 8] {
        [
            &mut self.expire,
            &mut self.no_progress,
            &mut self.no_reply,
            &mut self.credit,
            &mut self.keepalive,
            &mut self.keepalive_grace,
            &mut self.godead,
            &mut self.cancel_give_up,
        ]
    }
}

/// Call duration figures of a leg
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallAccounting {
    /// Connected time, zero if the call was never answered
    pub duration: Duration,
    /// Time from setup to answer, or to now/disconnect if unanswered
    pub setup_delay: Duration,
    pub connected: bool,
    pub disconnected: bool,
}

/// One call leg
#[derive(Debug)]
pub struct Dialog {
    pub(crate) id: DialogId,
    pub(crate) config: UaConfig,
    pub(crate) state: UaState,
    pub(crate) origin: Option<Origin>,

    pub(crate) call_id: String,
    pub(crate) local_tag: String,
    /// Our side as it appears in From (UAC) or To (UAS)
    pub(crate) local_uri: Option<Address>,
    pub(crate) remote_uri: Option<Address>,
    pub(crate) local_contact: Option<Address>,
    pub(crate) remote_target: Option<Uri>,
    /// Transport destination of in-dialog requests
    pub(crate) remote_addr: HostPort,
    /// Next hop the leg was created with
    pub(crate) remote_addr0: HostPort,
    pub(crate) routes: Vec<Address>,
    pub(crate) local_cseq: u32,
    pub(crate) remote_cseq: Option<u32>,
    /// Top Via branch of the initial INVITE until the call is answered
    pub(crate) branch: Option<String>,

    pub(crate) local_sdp: Option<MessageBody>,
    pub(crate) remote_sdp: Option<MessageBody>,
    pub(crate) late_media: bool,
    pub(crate) sdp_hooks: bool,

    /// Outstanding INVITE client transaction
    pub(crate) tr: Option<TransactionId>,
    /// 2xx client transaction whose ACK waits for the application's answer
    pub(crate) pending_tr: Option<TransactionId>,
    pub(crate) uas_tx: Option<TransactionId>,
    /// Template for responses on `uas_tx`, carrying our To tag
    pub(crate) uas_resp: Option<Response>,

    pub(crate) equeue: VecDeque<CallEvent>,
    pub(crate) elast_seq: Option<u64>,
    pub(crate) last_scode: u16,

    pub(crate) timers: DialogTimers,
    pub(crate) expire_time: Option<Duration>,
    pub(crate) no_progress_time: Option<Duration>,
    pub(crate) no_reply_time: Option<Duration>,
    pub(crate) expire_at: Option<Instant>,
    pub(crate) no_progress_at: Option<Instant>,
    pub(crate) credit_time: Option<Duration>,
    pub(crate) credit_times: BTreeMap<u32, Instant>,

    pub(crate) ka_tx: Option<TransactionId>,
    pub(crate) keepalives: u32,
    pub(crate) refer_done: bool,

    pub(crate) setup_ts: Option<Instant>,
    pub(crate) p100_ts: Option<Instant>,
    pub(crate) p1xx_ts: Option<Instant>,
    pub(crate) connect_ts: Option<Instant>,
    pub(crate) disconnect_ts: Option<Instant>,
    pub(crate) remote_ua: Option<String>,
}

impl Dialog {
    /// A new leg in the Idle state; `next_hop` receives the initial INVITE
    pub fn new(id: DialogId, config: UaConfig, next_hop: HostPort) -> Self {
        Dialog {
            id,
            state: UaState::Idle,
            origin: None,
            call_id: String::new(),
            local_tag: generate_tag(),
            local_uri: None,
            remote_uri: None,
            local_contact: None,
            remote_target: None,
            remote_addr: next_hop.clone(),
            remote_addr0: next_hop,
            routes: Vec::new(),
            local_cseq: 0,
            remote_cseq: None,
            branch: None,
            local_sdp: None,
            remote_sdp: None,
            late_media: false,
            sdp_hooks: true,
            tr: None,
            pending_tr: None,
            uas_tx: None,
            uas_resp: None,
            equeue: VecDeque::new(),
            elast_seq: None,
            last_scode: 100,
            timers: DialogTimers::default(),
            expire_time: config.expire_time,
            no_progress_time: config.no_progress_time,
            no_reply_time: config.no_reply_time,
            expire_at: None,
            no_progress_at: None,
            credit_time: config.credit_time,
            credit_times: BTreeMap::new(),
            ka_tx: None,
            keepalives: 0,
            refer_done: false,
            setup_ts: None,
            p100_ts: None,
            p1xx_ts: None,
            connect_ts: None,
            disconnect_ts: None,
            remote_ua: None,
            config,
        }
    }

    pub fn id(&self) -> DialogId {
        self.id
    }

    pub fn state(&self) -> UaState {
        self.state
    }

    pub fn origin(&self) -> Option<Origin> {
        self.origin
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub fn local_tag(&self) -> &str {
        &self.local_tag
    }

    pub fn remote_tag(&self) -> Option<&str> {
        self.remote_uri.as_ref().and_then(Address::tag)
    }

    pub fn local_cseq(&self) -> u32 {
        self.local_cseq
    }

    pub fn remote_cseq(&self) -> Option<u32> {
        self.remote_cseq
    }

    pub fn routes(&self) -> &[Address] {
        &self.routes
    }

    pub fn remote_target(&self) -> Option<&Uri> {
        self.remote_target.as_ref()
    }

    pub fn remote_addr(&self) -> &HostPort {
        &self.remote_addr
    }

    pub fn local_sdp(&self) -> Option<&MessageBody> {
        self.local_sdp.as_ref()
    }

    pub fn remote_sdp(&self) -> Option<&MessageBody> {
        self.remote_sdp.as_ref()
    }

    pub fn timers(&self) -> &DialogTimers {
        &self.timers
    }

    pub fn remote_user_agent(&self) -> Option<&str> {
        self.remote_ua.as_deref()
    }

    /// User part of the called party
    pub fn called(&self) -> Option<&str> {
        self.remote_uri.as_ref().and_then(|a| a.uri.user.as_deref())
    }

    /// User part of the calling party
    pub fn calling(&self) -> Option<&str> {
        self.local_uri.as_ref().and_then(|a| a.uri.user.as_deref())
    }

    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    pub fn is_dead(&self) -> bool {
        self.state.is_dead()
    }

    /// Call duration figures as of `now`
    pub fn acct(&self, now: Instant) -> CallAccounting {
        let (end, disconnected) = match self.disconnect_ts {
            Some(ts) => (ts, true),
            None => (now, false),
        };
        let setup = self.setup_ts.unwrap_or(now);
        match self.connect_ts {
            Some(connect) => CallAccounting {
                duration: end.saturating_duration_since(connect),
                setup_delay: connect.saturating_duration_since(setup),
                connected: true,
                disconnected,
            },
            None => CallAccounting {
                duration: Duration::ZERO,
                setup_delay: end.saturating_duration_since(setup),
                connected: false,
                disconnected,
            },
        }
    }

    /// Time of the 100 Trying and of the first other provisional response
    pub fn progress_times(&self) -> (Option<Instant>, Option<Instant>) {
        (self.p100_ts, self.p1xx_ts)
    }

    /// Consume a new in-dialog (or dialog creating) request.
    ///
    /// The returned outcome carries a response the transaction manager
    /// should send, and for a state changing INVITE the dialog that wants
    /// to hear about CANCEL and a missing ACK.
    pub fn recv_request(
        &mut self,
        ctx: &mut UaContext<'_>,
        tx: TransactionId,
        req: Request,
        rtime: Instant,
    ) -> Option<RequestOutcome> {
        if self.remote_ua.is_none() {
            self.update_ua(&req);
        }
        let cseq = match req.cseq() {
            Ok(cseq) => cseq.seq,
            Err(e) => {
                debug!("{} dropping request without CSeq: {}", self.id, e);
                return None;
            }
        };
        if matches!(self.remote_cseq, Some(last) if last >= cseq) {
            debug!("{} CSeq {} is not above {:?}", self.id, cseq, self.remote_cseq);
            let resp = req.gen_response(500, "Server Internal Error", self.user_agent(ctx));
            return Some(RequestOutcome { response: Some(resp), ..Default::default() });
        }
        self.remote_cseq = Some(cseq);
        let is_invite = req.method == b2bua_sip_core::Method::Invite;
        if self.state == UaState::Idle && !is_invite {
            return None;
        }
        debug!("{} received {} in {} state", self.id, req.method, self.state);

        let result = match self.state {
            UaState::Idle => self.uas_idle_request(ctx, tx, &req, rtime),
            UaState::UasRinging => self.uas_ringing_request(ctx, tx, &req, rtime),
            UaState::Connected => self.connected_request(ctx, tx, &req, rtime),
            UaState::UacUpdating => self.uac_updating_request(ctx, tx, &req, rtime),
            UaState::UasUpdating => self.uas_updating_request(ctx, tx, &req, rtime),
            UaState::Disconnected | UaState::Failed => self.terminated_request(ctx, tx, &req),
            _ => Ok(None),
        };
        let changed = self.finish(ctx, result);
        self.emit_pending(ctx);
        if changed && is_invite {
            Some(RequestOutcome {
                response: None,
                cancel: Some(self.id),
                noack: Some(self.id),
                ack: None,
            })
        } else {
            None
        }
    }

    /// Response for one of our INVITE client transactions
    pub fn recv_response(
        &mut self,
        ctx: &mut UaContext<'_>,
        tx: TransactionId,
        resp: Response,
        rtime: Instant,
    ) {
        if matches!(self.state, UaState::Idle | UaState::Dead) {
            return;
        }
        self.update_ua(&resp);
        let code = resp.code();
        debug!("{} received {} in {} state", self.id, code, self.state);
        let result = match self.state {
            UaState::UacTrying => self.uac_trying_response(ctx, tx, &resp, rtime),
            UaState::UacRinging => self.uac_ringing_response(ctx, tx, &resp, rtime),
            UaState::UacCancelling => self.uac_cancelling_response(ctx, &resp),
            UaState::UacUpdating => self.uac_updating_response(ctx, &resp, rtime),
            _ => Ok(None),
        };
        self.finish(ctx, result);
        self.emit_pending(ctx);

        // a 2xx held for a late answer that nobody is going to provide
        if (200..300).contains(&code)
            && self.pending_tr != Some(tx)
            && ctx.tm.client_state(tx) == Some(TransactionState::Uack)
        {
            if let Err(e) = ctx.tm.send_ack(ctx.sched, tx, None) {
                warn!("{} can't ACK {}: {}", self.id, tx, e);
            }
        }
    }

    /// Call-control event from the application
    pub fn recv_event(&mut self, ctx: &mut UaContext<'_>, event: CallEvent) -> DialogResult<()> {
        if self.state == UaState::Idle
            && !matches!(
                event.kind,
                EventKind::Try(_) | EventKind::Fail(_) | EventKind::Disconnect(_)
            )
        {
            debug!("{} ignoring {} before the call is set up", self.id, event);
            return Ok(());
        }
        debug!("{} got {} in {} state", self.id, event, self.state);
        let result = match self.state {
            UaState::Idle => self.uac_idle_event(ctx, event),
            UaState::UacTrying | UaState::UacRinging => self.uac_early_event(ctx, event),
            UaState::UasTrying | UaState::UasRinging => self.uas_early_event(ctx, event),
            UaState::Connected => self.connected_event(ctx, event),
            UaState::UacUpdating => self.uac_updating_event(ctx, event),
            UaState::UasUpdating => self.uas_updating_event(ctx, event),
            UaState::UacCancelling | UaState::Disconnected | UaState::Failed | UaState::Dead => {
                trace!("{} event {} has no effect in {} state", self.id, event, self.state);
                Ok(None)
            }
        };
        let outcome = match result {
            Ok(transition) => {
                if let Some(t) = transition {
                    self.change_state(ctx, t);
                }
                Ok(())
            }
            Err(e) => Err(e),
        };
        self.emit_pending(ctx);
        outcome
    }

    /// ACK for a 2xx we sent with a deferred answer
    pub fn recv_ack(&mut self, ctx: &mut UaContext<'_>, req: Request, rtime: Instant) {
        if !self.is_connected() {
            return;
        }
        if self.state == UaState::Connected {
            let result = self.connected_ack(ctx, &req, rtime);
            self.finish(ctx, result);
        }
        self.emit_pending(ctx);
    }

    /// The pending INVITE we answer was cancelled, or expired
    pub fn on_cancel(&mut self, ctx: &mut UaContext<'_>, req: Option<Request>, rtime: Instant) {
        let reason = req
            .as_ref()
            .and_then(|r| r.header(&b2bua_sip_core::HeaderName::Reason))
            .map(str::to_string);
        let event = CallEvent::new(EventKind::Disconnect(None), rtime)
            .with_origin(self.origin)
            .with_reason(reason);
        match self.state {
            UaState::UasTrying | UaState::UasRinging => {}
            UaState::UasUpdating => {
                if let Err(e) = self.send_bye(ctx, &[]) {
                    warn!("{} can't send BYE: {}", self.id, e);
                }
                self.cancel_credit_timer(ctx);
            }
            _ => return,
        }
        debug!("{} cancelled by peer in {} state", self.id, self.state);
        self.disconnect_ts = Some(rtime);
        let origin = self.origin;
        self.change_state(
            ctx,
            Transition::to(UaState::Disconnected).notify(
                LegNotice::Disconnected { code: None },
                rtime,
                origin,
            ),
        );
        self.emit_event(ctx, event);
    }

    /// Tear the leg down, whatever its state
    pub fn disconnect(&mut self, ctx: &mut UaContext<'_>, rtime: Instant, origin: Option<Origin>) {
        let queued = CallEvent::new(EventKind::Disconnect(None), rtime).with_origin(origin);
        self.equeue.push_back(queued);
        let event = CallEvent::new(EventKind::Disconnect(None), rtime).with_origin(origin);
        if let Err(e) = self.recv_event(ctx, event) {
            warn!("{} disconnect failed: {}", self.id, e);
        }
    }

    pub fn on_timer(&mut self, ctx: &mut UaContext<'_>, handle: TimerHandle, timer: DialogTimer) {
        let slot = self.timers.slot(timer);
        if *slot != Some(handle) {
            trace!("{} stale {:?} timer", self.id, timer);
            return;
        }
        *slot = None;
        let now = ctx.now();
        match timer {
            DialogTimer::Expire | DialogTimer::NoProgress | DialogTimer::NoReply => {
                debug!("{} {:?} timer expired in {} state", self.id, timer, self.state);
                self.disconnect(ctx, now, None);
            }
            DialogTimer::Credit => {
                debug!("{} credit time is over", self.id);
                self.disconnect(ctx, now, None);
            }
            DialogTimer::KeepaliveGrace => self.disconnect(ctx, now, None),
            DialogTimer::Keepalive => self.send_keepalive(ctx),
            DialogTimer::GoDead => {
                if matches!(self.state, UaState::Disconnected | UaState::Failed) {
                    self.change_state(ctx, Transition::to(UaState::Dead));
                }
            }
            DialogTimer::CancelGiveUp => {
                if self.state == UaState::UacCancelling {
                    warn!("{} no final answer to CANCEL, giving up", self.id);
                    self.change_state(ctx, Transition::to(UaState::Disconnected));
                }
            }
        }
        self.emit_pending(ctx);
    }

    /// Replace or add credit deadlines and re-arm the credit timer
    pub fn reset_credit_time(
        &mut self,
        ctx: &mut UaContext<'_>,
        rtime: Instant,
        credit_times: BTreeMap<u32, Instant>,
    ) {
        self.credit_times.extend(credit_times);
        if self.is_connected() {
            self.cancel_credit_timer(ctx);
            self.start_credit_timer(ctx, rtime);
        }
    }

    /// Resume an input suspended on the SDP rewriter
    pub fn complete_sdp(
        &mut self,
        ctx: &mut UaContext<'_>,
        side: SdpSide,
        mut event: CallEvent,
        result: Result<MessageBody, SdpError>,
    ) {
        match result {
            Ok(body) => {
                let body = body.with_needs_update(false);
                if let Some(slot) = event.kind.body_mut() {
                    *slot = Some(body.clone());
                }
                match side {
                    SdpSide::Local => {
                        if let Err(e) = self.recv_event(ctx, event) {
                            warn!("{} resumed event failed: {}", self.id, e);
                        }
                    }
                    SdpSide::Remote => {
                        self.remote_sdp = Some(body);
                        self.equeue.push_back(event);
                        self.emit_pending(ctx);
                    }
                }
            }
            Err(e) => {
                warn!("{} {:?} SDP rewrite failed: {}", self.id, side, e);
                let fail = CallEvent::new(EventKind::Fail(Some(FailData::new(e.code, e.reason))), event.rtime)
                    .with_origin(self.origin);
                self.equeue.push_back(fail.clone());
                self.emit_pending(ctx);
                if let Err(e) = self.recv_event(ctx, fail) {
                    warn!("{} failing after SDP error: {}", self.id, e);
                }
            }
        }
    }

    /// Apply a handler result; true when the state changed
    pub(crate) fn finish(
        &mut self,
        ctx: &mut UaContext<'_>,
        result: DialogResult<Option<Transition>>,
    ) -> bool {
        match result {
            Ok(Some(t)) => {
                self.change_state(ctx, t);
                true
            }
            Ok(None) => false,
            Err(e) => {
                warn!("{} error in {} state: {}", self.id, self.state, e);
                false
            }
        }
    }

    pub(crate) fn change_state(&mut self, ctx: &mut UaContext<'_>, t: Transition) {
        let prev = self.state;
        self.leave_state(ctx, prev);
        debug!("{} {} -> {}", self.id, prev, t.next);
        self.state = t.next;
        self.enter_state(ctx);
        if let Some(notice) = t.notice {
            let rtime = t.rtime.unwrap_or_else(|| ctx.now());
            self.notify(ctx, notice, rtime, t.origin);
        }
        if self.state == UaState::Dead {
            let now = ctx.now();
            self.notify(ctx, LegNotice::Dead, now, self.origin);
        }
    }

    fn leave_state(&mut self, ctx: &mut UaContext<'_>, prev: UaState) {
        match prev {
            UaState::Connected => {
                if let Some(ka) = self.ka_tx.take() {
                    if let Err(e) = ctx.tm.cancel_transaction(ctx.sched, ka, Vec::new()) {
                        trace!("{} keepalive {} already gone: {}", self.id, ka, e);
                    }
                }
                if let Some(tx) = self.pending_tr.take() {
                    if let Err(e) = ctx.tm.send_ack(ctx.sched, tx, None) {
                        warn!("{} can't ACK {}: {}", self.id, tx, e);
                    }
                }
                self.cancel_timer(ctx, DialogTimer::Expire);
                self.cancel_timer(ctx, DialogTimer::Keepalive);
            }
            UaState::UacCancelling => {
                self.cancel_timer(ctx, DialogTimer::CancelGiveUp);
            }
            _ => {}
        }
    }

    fn enter_state(&mut self, ctx: &mut UaContext<'_>) {
        match self.state {
            UaState::Connected => {
                self.branch = None;
                self.keepalives = 0;
                if let Some(interval) = self.config.keepalive_interval {
                    self.arm_in(ctx, interval, DialogTimer::Keepalive);
                }
            }
            UaState::Disconnected | UaState::Failed => {
                self.sdp_hooks = false;
                for timer in [
                    DialogTimer::Expire,
                    DialogTimer::NoProgress,
                    DialogTimer::NoReply,
                    DialogTimer::Credit,
                    DialogTimer::Keepalive,
                ] {
                    self.cancel_timer(ctx, timer);
                }
                let godead = ctx.config.godead_timeout;
                self.arm_in(ctx, godead, DialogTimer::GoDead);
            }
            UaState::UacCancelling => {
                self.sdp_hooks = false;
                let give_up = ctx.config.cancelling_timeout;
                self.arm_in(ctx, give_up, DialogTimer::CancelGiveUp);
            }
            UaState::Dead => {
                for slot in self.timers.all_mut() {
                    if let Some(handle) = slot.take() {
                        ctx.sched.cancel(handle);
                    }
                }
                if !self.call_id.is_empty() {
                    ctx.tm.unreg_consumer(&self.call_id, self.id);
                }
                self.equeue.clear();
            }
            _ => {}
        }
    }

    fn notify(&self, ctx: &mut UaContext<'_>, notice: LegNotice, rtime: Instant, origin: Option<Origin>) {
        trace!("{} notice {:?}", self.id, notice);
        let _ = ctx.notify.send(Notification::Leg {
            dialog: self.id,
            notice,
            rtime,
            origin,
        });
    }

    /// Lifecycle notice that does not come with a state change
    pub(crate) fn notify_now(&self, ctx: &mut UaContext<'_>, notice: LegNotice, rtime: Instant) {
        self.notify(ctx, notice, rtime, self.origin);
    }

    pub(crate) fn emit_event(&mut self, ctx: &mut UaContext<'_>, event: CallEvent) {
        if matches!(self.elast_seq, Some(last) if last >= event.seq) {
            debug!("{} dropping out-of-order {} (last {:?})", self.id, event, self.elast_seq);
            return;
        }
        self.elast_seq = Some(event.seq);
        let _ = ctx.notify.send(Notification::Event { dialog: self.id, event });
    }

    pub(crate) fn emit_pending(&mut self, ctx: &mut UaContext<'_>) {
        while let Some(event) = self.equeue.pop_front() {
            self.emit_event(ctx, event);
        }
    }

    pub(crate) fn arm_at(&mut self, ctx: &mut UaContext<'_>, at: Instant, timer: DialogTimer) {
        self.cancel_timer(ctx, timer);
        let handle = ctx.sched.register_at(at, EngineTimer::Dialog(self.id, timer));
        *self.timers.slot(timer) = Some(handle);
    }

    pub(crate) fn arm_in(&mut self, ctx: &mut UaContext<'_>, delay: Duration, timer: DialogTimer) {
        self.cancel_timer(ctx, timer);
        let handle = ctx
            .sched
            .register(delay, Repeat::Once, EngineTimer::Dialog(self.id, timer));
        *self.timers.slot(timer) = Some(handle);
    }

    /// Cancel `timer`; true when it was armed
    pub(crate) fn cancel_timer(&mut self, ctx: &mut UaContext<'_>, timer: DialogTimer) -> bool {
        match self.timers.slot(timer).take() {
            Some(handle) => {
                ctx.sched.cancel(handle);
                true
            }
            None => false,
        }
    }

    pub(crate) fn is_armed(&self, timer: DialogTimer) -> bool {
        self.timers.get(timer).is_some()
    }

    /// Arm the single highest priority setup timer.
    ///
    /// Deadlines count from `rtime`. A no-progress or no-reply time that is
    /// not shorter than the timers below it is dropped, and no-reply only
    /// applies to outgoing calls when shorter than 32 seconds.
    pub(crate) fn arm_setup_timers(&mut self, ctx: &mut UaContext<'_>, rtime: Instant, uac: bool) {
        self.expire_at = self.expire_time.map(|t| rtime + t);
        if let Some(np) = self.no_progress_time {
            self.no_progress_at = Some(rtime + np);
            if matches!(self.expire_time, Some(e) if np >= e) {
                self.no_progress_time = None;
            }
        }
        let mut no_reply_at = None;
        if let Some(nr) = self.no_reply_time.filter(|_| uac) {
            if nr < Duration::from_secs(32) {
                no_reply_at = Some(rtime + nr);
                if matches!(self.expire_time, Some(e) if nr >= e)
                    || matches!(self.no_progress_time, Some(p) if nr >= p)
                {
                    self.no_reply_time = None;
                }
            } else {
                self.no_reply_time = None;
            }
        }
        if !uac {
            self.no_reply_time = None;
        }
        if let (Some(_), Some(at)) = (self.no_reply_time, no_reply_at) {
            self.arm_at(ctx, at, DialogTimer::NoReply);
        } else if let (Some(_), Some(at)) = (self.no_progress_time, self.no_progress_at) {
            self.arm_at(ctx, at, DialogTimer::NoProgress);
        } else if let Some(at) = self.expire_at {
            self.arm_at(ctx, at, DialogTimer::Expire);
        }
    }

    /// Arm the expire timer at its setup deadline, if there is one
    pub(crate) fn arm_expire(&mut self, ctx: &mut UaContext<'_>) {
        if let (Some(_), Some(at)) = (self.expire_time, self.expire_at) {
            self.arm_at(ctx, at, DialogTimer::Expire);
        }
    }

    pub(crate) fn start_credit_timer(&mut self, ctx: &mut UaContext<'_>, rtime: Instant) {
        if let Some(credit) = self.credit_time.take() {
            self.credit_times.insert(0, rtime + credit);
        }
        if let Some(&at) = self.credit_times.values().min() {
            self.arm_at(ctx, at, DialogTimer::Credit);
        }
    }

    pub(crate) fn cancel_credit_timer(&mut self, ctx: &mut UaContext<'_>) {
        self.cancel_timer(ctx, DialogTimer::Credit);
    }

    pub(crate) fn update_ua(&mut self, msg: &impl SipMessage) {
        if let Some(ua) = msg.user_agent() {
            self.remote_ua = Some(ua.to_string());
        }
    }

    /// User-Agent / Server value for messages of this leg
    pub(crate) fn user_agent<'a>(&'a self, ctx: &'a UaContext<'_>) -> Option<&'a str> {
        self.config.user_agent.as_deref().or(ctx.config.user_agent.as_deref())
    }

    /// SDP rewriter, unless hooks are off for this leg
    pub(crate) fn sdp_hook(&self, ctx: &UaContext<'_>) -> Option<Arc<dyn SdpRewriter>> {
        if self.sdp_hooks {
            ctx.sdp.cloned()
        } else {
            None
        }
    }

    /// Hand a local body to the rewriter when it asks for an update.
    ///
    /// Returns true when the event has been suspended.
    pub(crate) fn suspend_local(&self, ctx: &UaContext<'_>, body: Option<&MessageBody>, event: &CallEvent) -> bool {
        let Some(body) = body.filter(|b| b.needs_update) else {
            return false;
        };
        let Some(hook) = self.sdp_hook(ctx) else {
            return false;
        };
        let done = SdpCompletion::new(ctx.handle.clone(), self.id, SdpSide::Local, event.clone());
        hook.on_local_sdp_change(self.id, body.clone(), done);
        true
    }

    /// Record a received body, or hand it to the rewriter together with the
    /// event that reports it. The event is queued unless suspended.
    pub(crate) fn accept_remote(&mut self, ctx: &UaContext<'_>, body: Option<MessageBody>, event: CallEvent) {
        match body {
            Some(body) => match self.sdp_hook(ctx) {
                Some(hook) => {
                    let done = SdpCompletion::new(ctx.handle.clone(), self.id, SdpSide::Remote, event);
                    hook.on_remote_sdp_change(self.id, body, done);
                }
                None => {
                    self.remote_sdp = Some(body);
                    self.equeue.push_back(event);
                }
            },
            None => {
                self.remote_sdp = None;
                self.equeue.push_back(event);
            }
        }
    }

    /// Disconnect timestamp clamped to the setup time
    pub(crate) fn mark_disconnected(&mut self, ctx: &UaContext<'_>, rtime: Instant) {
        self.disconnect_ts = match self.setup_ts {
            Some(setup) if rtime < setup => Some(ctx.now()),
            _ => Some(rtime),
        };
    }
}
