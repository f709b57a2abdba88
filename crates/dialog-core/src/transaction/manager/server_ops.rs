use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use b2bua_sip_core::{generate_tag, HostPort, Method, Request, Response, SipMessage};

use super::{Incoming, RequestOutcome, TmEvent, TransactionManager};
use crate::errors::{DialogError, DialogResult};
use crate::manager::EngineTimer;
use crate::reactor::Scheduler;
use crate::transaction::cache::{CacheEntry, Checksum};
use crate::transaction::key::TransactionKey;
use crate::transaction::server::ServerTransaction;
use crate::transaction::state::{TransactionState, TxTimer};
use crate::transaction::TransactionId;

impl TransactionManager {
    pub(super) fn incoming_request(
        &mut self,
        sched: &mut Scheduler<EngineTimer>,
        mut req: Request,
        checksum: Checksum,
        source: HostPort,
        rtime: Instant,
    ) -> Incoming {
        if let Err(e) = req.validate() {
            debug!("invalid request from {}: {}", source, e);
            if let Ok(via) = req.top_via() {
                let resp = req.gen_response(400, "Bad Request", self.server_header.as_deref());
                self.transmit_cached(resp.to_bytes(), via.response_addr(), checksum);
            } else {
                self.cache.insert(checksum, CacheEntry::Swallow);
            }
            return Incoming::Consumed;
        }
        if let Err(e) = req.fix_top_via(&source) {
            debug!("can't update Via of request from {}: {}", source, e);
        }

        if self.is_looped(&req) {
            info!("loop detected for {} from {}", req.method, source);
            self.reply_stateless(&req, 482, "Loop Detected", checksum);
            return Incoming::Consumed;
        }

        let key = match TransactionKey::server(&req) {
            Ok(key) => key,
            Err(e) => {
                debug!("can't key request from {}: {}", source, e);
                if let Some(resp) = e.response_for(&req, self.server_header.as_deref()) {
                    if let Ok(via) = req.top_via() {
                        self.transmit_cached(resp.to_bytes(), via.response_addr(), checksum);
                        return Incoming::Consumed;
                    }
                }
                self.cache.insert(checksum, CacheEntry::Swallow);
                return Incoming::Consumed;
            }
        };

        if let Some(&tx) = self.server_keys.get(&key) {
            self.request_for_existing(sched, tx, req, checksum, rtime);
            return Incoming::Consumed;
        }

        match req.method {
            Method::Ack => {
                debug!("ACK {} does not match any transaction", key);
                self.cache.insert(checksum, CacheEntry::Swallow);
                return Incoming::Consumed;
            }
            Method::Cancel => {
                self.reply_stateless(&req, 481, "Call Leg/Transaction Does Not Exist", checksum);
                return Incoming::Consumed;
            }
            _ => {}
        }

        let tx = self.next_id();
        let address = match req.top_via() {
            Ok(via) => via.response_addr(),
            Err(_) => source,
        };
        let is_invite = req.method == Method::Invite;
        let mut t = ServerTransaction {
            id: tx,
            key: key.clone(),
            method: req.method.clone(),
            state: TransactionState::Trying,
            address,
            checksum,
            data: None,
            tout: self.timers.t1,
            needack: is_invite,
            r487: None,
            cancel_owner: None,
            noack_owner: None,
            ack_owner: None,
            timer_a: None,
            timer_d: None,
            timer_e: None,
            timer_f: None,
        };
        if is_invite {
            t.r487 = Some(req.gen_response(487, "Request Terminated", self.server_header.as_deref()));
            let expires = match req.expires() {
                Ok(Some(secs)) if secs > 0 => Duration::from_secs(secs as u64),
                _ => self.timers.invite_expires,
            };
            t.timer_e = Self::arm(sched, expires, tx, TxTimer::E);
        }
        debug!("new server {} {}", tx, key);
        self.server_keys.insert(key, tx);
        self.servers.insert(tx, t);
        self.cache.insert(checksum, CacheEntry::Swallow);
        Incoming::Request { tx, request: req, rtime }
    }

    /// Install what the consumer decided for a new server transaction.
    ///
    /// A transaction left without an answer and without timers is dropped.
    pub fn apply_outcome(
        &mut self,
        sched: &mut Scheduler<EngineTimer>,
        tx: TransactionId,
        outcome: Option<RequestOutcome>,
    ) {
        let Some(outcome) = outcome else {
            self.release_if_idle(sched, tx);
            return;
        };
        if let Some(t) = self.servers.get_mut(&tx) {
            t.cancel_owner = outcome.cancel;
            t.noack_owner = outcome.noack;
        }
        match outcome.response {
            Some(resp) => {
                if let Err(e) = self.send_response(sched, tx, resp, outcome.ack) {
                    debug!("can't answer {}: {}", tx, e);
                }
            }
            None => self.release_if_idle(sched, tx),
        }
    }

    fn release_if_idle(&mut self, sched: &mut Scheduler<EngineTimer>, tx: TransactionId) {
        let idle = self
            .servers
            .get(&tx)
            .map(|t| t.data.is_none() && !t.has_timers())
            .unwrap_or(false);
        if idle {
            self.remove_server(sched, tx);
        }
    }

    /// Change the dialog told about a CANCEL of this transaction
    pub fn set_cancel_owner(&mut self, tx: TransactionId, owner: Option<crate::dialog::DialogId>) {
        if let Some(t) = self.servers.get_mut(&tx) {
            t.cancel_owner = owner;
        }
    }

    /// Answer a server transaction.
    ///
    /// Provisional responses move it to Ringing. A final response completes
    /// it; for INVITE the transaction then waits for the ACK (re-keyed on
    /// the To tag) and retransmits until Timer D.
    pub fn send_response(
        &mut self,
        sched: &mut Scheduler<EngineTimer>,
        tx: TransactionId,
        resp: Response,
        ack_owner: Option<crate::dialog::DialogId>,
    ) -> DialogResult<()> {
        let t = self
            .servers
            .get(&tx)
            .ok_or(DialogError::TransactionNotFound(tx))?;
        if !matches!(t.state, TransactionState::Trying | TransactionState::Ringing) {
            return Err(DialogError::TransactionCompleted(tx));
        }
        self.answer(sched, tx, resp, ack_owner)
    }

    fn answer(
        &mut self,
        sched: &mut Scheduler<EngineTimer>,
        tx: TransactionId,
        mut resp: Response,
        ack_owner: Option<crate::dialog::DialogId>,
    ) -> DialogResult<()> {
        let code = resp.code();
        if code > 100 && resp.to_tag()?.is_none() {
            resp.set_to_tag(&generate_tag())?;
        }
        let timers = self.timers.clone();
        let t = self
            .servers
            .get_mut(&tx)
            .ok_or(DialogError::TransactionNotFound(tx))?;
        let data = resp.to_bytes();
        t.data = Some(data.clone());
        let (address, checksum) = (t.address.clone(), t.checksum);

        let mut remove = false;
        if code < 200 {
            t.state = TransactionState::Ringing;
            if code > 100 && !timers.provisional_retransmit.is_zero() {
                Self::disarm(sched, &mut t.timer_f);
                t.timer_f = Self::arm(sched, timers.provisional_retransmit, tx, TxTimer::F);
            }
        } else {
            t.state = TransactionState::Completed;
            Self::disarm(sched, &mut t.timer_e);
            Self::disarm(sched, &mut t.timer_f);
            if t.needack {
                t.ack_owner = ack_owner;
                t.timer_d = Self::arm(sched, timers.timer_d, tx, TxTimer::D);
                t.tout = timers.t1;
                t.timer_a = Self::arm(sched, t.tout, tx, TxTimer::A);
                let new_key = t.key.with_to_tag(resp.to_tag()?);
                let old_key = std::mem::replace(&mut t.key, new_key.clone());
                if self.server_keys.get(&old_key) == Some(&tx) {
                    self.server_keys.remove(&old_key);
                }
                self.server_keys.insert(new_key, tx);
            } else {
                remove = true;
            }
        }
        self.transmit_cached(data, address, checksum);
        if remove {
            self.remove_server(sched, tx);
        }
        Ok(())
    }

    fn request_for_existing(
        &mut self,
        sched: &mut Scheduler<EngineTimer>,
        tx: TransactionId,
        req: Request,
        checksum: Checksum,
        rtime: Instant,
    ) {
        let Some(t) = self.servers.get_mut(&tx) else {
            return;
        };
        if req.method == t.method {
            if let Some(data) = t.data.clone() {
                let address = t.address.clone();
                self.transmit_cached(data, address, checksum);
            } else {
                self.cache.insert(checksum, CacheEntry::Swallow);
            }
            return;
        }
        match req.method {
            Method::Cancel => {
                let pending = matches!(t.state, TransactionState::Trying | TransactionState::Ringing);
                self.reply_stateless(&req, 200, "OK", checksum);
                if pending {
                    self.cancel_server(sched, tx, rtime, Some(req));
                }
            }
            Method::Ack if t.state == TransactionState::Completed => {
                t.state = TransactionState::Confirmed;
                let owner = t.ack_owner;
                self.cache.insert(checksum, CacheEntry::Swallow);
                self.remove_server(sched, tx);
                if let Some(owner) = owner {
                    self.events.push_back(TmEvent::Ack { owner, request: req, rtime });
                }
            }
            _ => {
                self.cache.insert(checksum, CacheEntry::Swallow);
            }
        }
    }

    /// Answer 487 to a pending INVITE and tell its cancel owner
    fn cancel_server(
        &mut self,
        sched: &mut Scheduler<EngineTimer>,
        tx: TransactionId,
        rtime: Instant,
        request: Option<Request>,
    ) {
        let Some(t) = self.servers.get_mut(&tx) else {
            return;
        };
        let r487 = t.r487.take();
        let owner = t.cancel_owner.take();
        if let Some(resp) = r487 {
            if let Err(e) = self.answer(sched, tx, resp, None) {
                warn!("can't send 487 on {}: {}", tx, e);
            }
        }
        if let Some(owner) = owner {
            self.events.push_back(TmEvent::Cancel { owner, tx, request, rtime });
        }
    }

    /// Answer a request whose headers parsed but whose body did not.
    ///
    /// ACKs and requests too broken to address a response to are swallowed.
    pub(super) fn reject_malformed(&mut self, mut req: Request, detail: &str, checksum: Checksum, source: &HostPort) {
        if req.method == Method::Ack || req.validate().is_err() {
            self.cache.insert(checksum, CacheEntry::Swallow);
            return;
        }
        if let Err(e) = req.fix_top_via(source) {
            debug!("can't update Via of request from {}: {}", source, e);
        }
        self.reply_stateless(&req, 400, &format!("Bad Request - {}", detail), checksum);
    }

    fn reply_stateless(&mut self, req: &Request, code: u16, reason: &str, checksum: Checksum) {
        let resp = req.gen_response(code, reason, self.server_header.as_deref());
        match req.top_via() {
            Ok(via) => self.transmit_cached(resp.to_bytes(), via.response_addr(), checksum),
            Err(_) => self.cache.insert(checksum, CacheEntry::Swallow),
        }
    }

    /// A request carrying a Via branch of one of our client transactions
    /// has come back to us
    fn is_looped(&self, req: &Request) -> bool {
        let Ok(vias) = req.vias() else {
            return false;
        };
        vias.iter().any(|via| {
            TransactionKey::client_for_via(req, via)
                .map(|key| self.client_keys.contains_key(&key))
                .unwrap_or(false)
        })
    }

    pub(super) fn server_timer_a(&mut self, sched: &mut Scheduler<EngineTimer>, tx: TransactionId) {
        let Some(t) = self.servers.get_mut(&tx) else {
            return;
        };
        t.timer_a = None;
        if t.state != TransactionState::Completed {
            return;
        }
        t.tout *= 2;
        t.timer_a = Self::arm(sched, t.tout, tx, TxTimer::A);
        if let Some(data) = t.data.clone() {
            let address = t.address.clone();
            self.transmit(&data, &address);
        }
    }

    pub(super) fn server_timer_d(&mut self, sched: &mut Scheduler<EngineTimer>, tx: TransactionId) {
        let Some(t) = self.servers.get_mut(&tx) else {
            return;
        };
        t.timer_d = None;
        let owner = (t.state != TransactionState::Confirmed)
            .then_some(t.noack_owner)
            .flatten();
        debug!("{} Timer D expired in {} state", tx, t.state);
        self.remove_server(sched, tx);
        if let Some(owner) = owner {
            self.events.push_back(TmEvent::NoAck { owner, rtime: sched.now() });
        }
    }

    pub(super) fn server_timer_e(&mut self, sched: &mut Scheduler<EngineTimer>, tx: TransactionId) {
        let Some(t) = self.servers.get_mut(&tx) else {
            return;
        };
        t.timer_e = None;
        Self::disarm(sched, &mut t.timer_f);
        if !matches!(t.state, TransactionState::Trying | TransactionState::Ringing) {
            return;
        }
        if let Some(r487) = t.r487.as_mut() {
            r487.set_status(r487.status(), "Request Expired");
        }
        info!("{} expired before a final answer", tx);
        let now = sched.now();
        self.cancel_server(sched, tx, now, None);
    }

    pub(super) fn server_timer_f(&mut self, sched: &mut Scheduler<EngineTimer>, tx: TransactionId) {
        let interval = self.timers.provisional_retransmit;
        let Some(t) = self.servers.get_mut(&tx) else {
            return;
        };
        t.timer_f = None;
        if t.state != TransactionState::Ringing {
            return;
        }
        t.timer_f = Self::arm(sched, interval, tx, TxTimer::F);
        if let Some(data) = t.data.clone() {
            let address = t.address.clone();
            self.transmit(&data, &address);
        }
    }
}
