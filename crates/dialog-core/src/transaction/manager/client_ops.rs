use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, warn};

use b2bua_sip_core::{
    generate_branch, Address, Header, HeaderName, HostPort, Method, Request, Response, SipMessage,
};

use super::{ClientTxOptions, TmEvent, TransactionManager, TxOwner};
use crate::errors::{DialogError, DialogResult};
use crate::manager::EngineTimer;
use crate::reactor::Scheduler;
use crate::transaction::cache::{CacheEntry, Checksum};
use crate::transaction::client::ClientTransaction;
use crate::transaction::key::TransactionKey;
use crate::transaction::state::{TransactionState, TxTimer};
use crate::transaction::TransactionId;

impl TransactionManager {
    /// Send `req` to `target` as a new client transaction.
    ///
    /// INVITEs get a prepared CANCEL and ACK. When `owner` is set, Timer B
    /// expiry is reported to it as a synthesized 408.
    pub fn new_client_transaction(
        &mut self,
        sched: &mut Scheduler<EngineTimer>,
        req: Request,
        target: HostPort,
        owner: Option<TxOwner>,
        options: ClientTxOptions,
    ) -> DialogResult<TransactionId> {
        let key = TransactionKey::client(&req)?;
        if self.client_keys.contains_key(&key) {
            return Err(DialogError::DuplicateTransaction(key.to_string()));
        }
        let id = self.next_id();
        let is_invite = req.method == Method::Invite;
        let expires = if is_invite {
            match req.expires()? {
                Some(secs) if secs > 0 => Duration::from_secs(secs as u64),
                _ => self.timers.invite_expires,
            }
        } else {
            self.timers.timer_b
        };
        let r408 = owner.map(|_| {
            req.gen_response(408, "Request Timeout", self.server_header.as_deref())
        });
        let data = req.to_bytes();
        let tout = self.timers.t1;
        let t = ClientTransaction {
            id,
            key: key.clone(),
            method: req.method.clone(),
            state: TransactionState::Trying,
            owner,
            data: data.clone(),
            target: target.clone(),
            tout,
            expires,
            needack: is_invite,
            uack: is_invite && options.uack,
            ack: is_invite.then(|| req.gen_ack()),
            ack_target: None,
            ack_checksum: None,
            cancel: is_invite.then(|| req.gen_cancel()),
            cancel_pending: false,
            cancel_headers: Vec::new(),
            r408,
            timer_a: Self::arm(sched, tout, id, TxTimer::A),
            timer_b: Self::arm(sched, self.timers.timer_b, id, TxTimer::B),
            timer_c: None,
            timer_g: None,
        };
        debug!("new client {} {} -> {}", id, key, target);
        self.client_keys.insert(key, id);
        self.clients.insert(id, t);
        self.transmit(&data, &target);
        Ok(id)
    }

    /// Cancel a pending INVITE.
    ///
    /// With a provisional response already received the CANCEL goes out now,
    /// otherwise it is sent as soon as the first provisional arrives.
    pub fn cancel_transaction(
        &mut self,
        sched: &mut Scheduler<EngineTimer>,
        tx: TransactionId,
        extra_headers: Vec<Header>,
    ) -> DialogResult<()> {
        let t = self
            .clients
            .get_mut(&tx)
            .ok_or(DialogError::TransactionNotFound(tx))?;
        if t.cancel.is_none() {
            debug!("{} is not an INVITE, nothing to cancel", tx);
            return Ok(());
        }
        if t.state != TransactionState::Ringing {
            t.cancel_pending = true;
            t.cancel_headers = extra_headers;
            return Ok(());
        }
        self.send_cancel(sched, tx, extra_headers)
    }

    fn send_cancel(
        &mut self,
        sched: &mut Scheduler<EngineTimer>,
        tx: TransactionId,
        extra_headers: Vec<Header>,
    ) -> DialogResult<()> {
        let (mut cancel, target) = match self.clients.get(&tx) {
            Some(t) => match &t.cancel {
                Some(cancel) => (cancel.clone(), t.target.clone()),
                None => return Ok(()),
            },
            None => return Err(DialogError::TransactionNotFound(tx)),
        };
        cancel.headers.extend(extra_headers);
        self.new_client_transaction(sched, cancel, target, None, ClientTxOptions::default())?;
        Ok(())
    }

    /// Send the held ACK of a UACK transaction, optionally with a body
    pub fn send_ack(
        &mut self,
        sched: &mut Scheduler<EngineTimer>,
        tx: TransactionId,
        body: Option<(Bytes, String)>,
    ) -> DialogResult<()> {
        let t = self
            .clients
            .get_mut(&tx)
            .ok_or(DialogError::TransactionNotFound(tx))?;
        if t.state != TransactionState::Uack {
            debug!("{} is in {} state, no ACK to send", tx, t.state);
            return Ok(());
        }
        Self::disarm(sched, &mut t.timer_g);
        let (Some(mut ack), Some(target)) = (t.ack.take(), t.ack_target.take()) else {
            return Err(DialogError::TransactionCompleted(tx));
        };
        if let Some((content, content_type)) = body {
            ack.set_body(content, Some(&content_type));
        }
        let checksum = t.ack_checksum.take();
        t.state = TransactionState::Completed;
        t.timer_c = Self::arm(sched, self.timers.timer_c, tx, TxTimer::C);
        let data = ack.to_bytes();
        match checksum {
            Some(checksum) => self.transmit_cached(data, target, checksum),
            None => self.transmit(&data, &target),
        }
        Ok(())
    }

    pub(super) fn incoming_response(
        &mut self,
        sched: &mut Scheduler<EngineTimer>,
        resp: Response,
        checksum: Checksum,
        rtime: Instant,
    ) {
        let key = match TransactionKey::client_for_response(&resp) {
            Ok(key) => key,
            Err(e) => {
                debug!("dropping unmatchable response: {}", e);
                self.cache.insert(checksum, CacheEntry::Swallow);
                return;
            }
        };
        let Some(&tx) = self.client_keys.get(&key) else {
            debug!("no client transaction for response {}", key);
            self.cache.insert(checksum, CacheEntry::Swallow);
            return;
        };
        let code = resp.code();
        let mut send_cancel = None;
        let timer_c = self.timers.timer_c;
        let timer_g = self.timers.timer_g;
        let Some(t) = self.clients.get_mut(&tx) else {
            return;
        };
        if matches!(
            t.state,
            TransactionState::Completed | TransactionState::Terminated | TransactionState::Uack
        ) {
            return;
        }
        if t.state == TransactionState::Trying {
            Self::disarm(sched, &mut t.timer_a);
        }
        Self::disarm(sched, &mut t.timer_b);

        let mut ack_out = None;
        if code < 200 {
            self.cache.insert(checksum, CacheEntry::Swallow);
            if t.state == TransactionState::Trying {
                t.state = TransactionState::Ringing;
                if t.cancel_pending {
                    t.cancel_pending = false;
                    send_cancel = Some(std::mem::take(&mut t.cancel_headers));
                }
            }
            t.timer_b = Self::arm(sched, t.expires, tx, TxTimer::B);
        } else if t.needack {
            match build_ack(t, &resp) {
                Ok((ack, target)) => {
                    if (200..300).contains(&code) && t.uack {
                        t.state = TransactionState::Uack;
                        t.ack = Some(ack);
                        t.ack_target = Some(target);
                        t.ack_checksum = Some(checksum);
                        t.timer_g = Self::arm(sched, timer_g, tx, TxTimer::G);
                        self.cache.insert(checksum, CacheEntry::Swallow);
                    } else {
                        t.state = TransactionState::Completed;
                        t.timer_c = Self::arm(sched, timer_c, tx, TxTimer::C);
                        ack_out = Some((ack.to_bytes(), target));
                    }
                }
                Err(e) => {
                    warn!("can't build ACK for {}: {}", tx, e);
                    t.state = TransactionState::Completed;
                    t.timer_c = Self::arm(sched, timer_c, tx, TxTimer::C);
                    self.cache.insert(checksum, CacheEntry::Swallow);
                }
            }
        } else {
            t.state = TransactionState::Completed;
            t.timer_c = Self::arm(sched, timer_c, tx, TxTimer::C);
            self.cache.insert(checksum, CacheEntry::Swallow);
        }
        let owner = t.owner;

        if let Some((data, target)) = ack_out {
            self.transmit_cached(data, target, checksum);
        }
        if let Some(headers) = send_cancel {
            if let Err(e) = self.send_cancel(sched, tx, headers) {
                warn!("deferred CANCEL for {} failed: {}", tx, e);
            }
        }
        if let Some(owner) = owner {
            self.events.push_back(TmEvent::Response { owner, tx, response: resp, rtime });
        }
    }

    pub(super) fn client_timer_a(&mut self, sched: &mut Scheduler<EngineTimer>, tx: TransactionId) {
        let Some(t) = self.clients.get_mut(&tx) else {
            return;
        };
        t.timer_a = None;
        if t.state != TransactionState::Trying {
            return;
        }
        t.tout *= 2;
        t.timer_a = Self::arm(sched, t.tout, tx, TxTimer::A);
        let (data, target) = (t.data.clone(), t.target.clone());
        self.transmit(&data, &target);
    }

    pub(super) fn client_timer_b(&mut self, sched: &mut Scheduler<EngineTimer>, tx: TransactionId) {
        let timer_c = self.timers.timer_c;
        let Some(t) = self.clients.get_mut(&tx) else {
            return;
        };
        t.timer_b = None;
        Self::disarm(sched, &mut t.timer_a);
        debug!("{} timed out in {} state", tx, t.state);
        t.state = TransactionState::Terminated;
        t.timer_c = Self::arm(sched, timer_c, tx, TxTimer::C);
        if let (Some(owner), Some(response)) = (t.owner, t.r408.take()) {
            let rtime = sched.now();
            self.events.push_back(TmEvent::Response { owner, tx, response, rtime });
        }
    }

    pub(super) fn client_timer_g(&mut self, tx: TransactionId) {
        if let Some(t) = self.clients.get_mut(&tx) {
            t.timer_g = None;
            if t.state == TransactionState::Uack {
                warn!(
                    "ACK for {} has not been sent in {:?} after a 2xx",
                    tx, self.timers.timer_g
                );
            }
        }
    }
}

/// ACK for a final response and where to send it.
///
/// A 2xx ACK is a new transaction routed along the dialog's route set; a
/// non-2xx ACK reuses the INVITE's branch and destination.
fn build_ack(t: &ClientTransaction, resp: &Response) -> DialogResult<(Request, HostPort)> {
    let mut ack = t
        .ack
        .clone()
        .ok_or(DialogError::TransactionCompleted(t.id))?;
    let mut to = ack.to_address()?;
    if let Some(tag) = resp.to_tag()? {
        to.set_tag(tag);
    }
    ack.headers.set(HeaderName::To, to.to_string());

    if !resp.status().is_success() {
        return Ok((ack, t.target.clone()));
    }

    let mut rtarget = match resp.first_contact()? {
        Some(contact) => contact.uri,
        None => ack.uri.clone(),
    };
    let mut routes: Vec<Address> = resp.record_routes()?.into_iter().rev().collect();
    let target = if let Some(first) = routes.first() {
        if first.uri.is_loose_routing() {
            first.uri.host_port()
        } else {
            routes.push(Address::new(rtarget.clone()));
            rtarget = routes.remove(0).uri.stripped();
            rtarget.host_port()
        }
    } else {
        rtarget.host_port()
    };
    ack.uri = rtarget;
    ack.headers.remove(&HeaderName::Route);
    for route in &routes {
        ack.headers.append(HeaderName::Route, route.to_string());
    }
    let mut via = ack.top_via()?;
    via.set_branch(generate_branch());
    ack.set_top_via(&via);
    Ok((ack, target))
}
