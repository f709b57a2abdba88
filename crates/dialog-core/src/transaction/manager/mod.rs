//! Transaction manager
//!
//! Owns every live transaction, the retransmission cache and the transport
//! handle. Callers hand it raw datagrams through [`TransactionManager::handle_incoming`]
//! and pick up owner notifications with [`TransactionManager::pop_event`].
//! Nothing here calls back into dialogs directly; owners are plain ids so
//! that the manager can be borrowed independently of the dialogs it serves.

mod client_ops;
mod server_ops;
mod types;

pub use types::{ClientTxOptions, Incoming, RequestOutcome, TmEvent, TxOwner};

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, trace, warn};

use b2bua_infra_common::logging::SIP_WIRE_TARGET;
use b2bua_sip_core::{parse_message, Error as SipError, HostPort, Message};
use b2bua_sip_transport::Transport;

use super::cache::{CacheEntry, Checksum, RetransmitCache};
use super::client::ClientTransaction;
use super::key::TransactionKey;
use super::server::ServerTransaction;
use super::state::{TransactionState, TxTimer};
use super::TransactionId;
use crate::config::{EngineConfig, TimerSettings};
use crate::dialog::DialogId;
use crate::manager::EngineTimer;
use crate::reactor::{Repeat, Scheduler, TimerHandle};

/// Datagrams shorter than this are keepalive noise
const MIN_DATAGRAM_SIZE: usize = 32;

pub struct TransactionManager {
    transport: Arc<dyn Transport>,
    timers: TimerSettings,
    server_header: Option<String>,
    next_id: u64,
    client_keys: HashMap<TransactionKey, TransactionId>,
    server_keys: HashMap<TransactionKey, TransactionId>,
    clients: HashMap<TransactionId, ClientTransaction>,
    servers: HashMap<TransactionId, ServerTransaction>,
    cache: RetransmitCache,
    consumers: HashMap<String, Vec<DialogId>>,
    events: VecDeque<TmEvent>,
    purge_timer: Option<TimerHandle>,
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("clients", &self.clients.len())
            .field("servers", &self.servers.len())
            .field("cache", &self.cache.len())
            .finish()
    }
}

impl TransactionManager {
    /// Create the manager and arm the periodic cache rotation
    pub fn new(
        transport: Arc<dyn Transport>,
        config: &EngineConfig,
        sched: &mut Scheduler<EngineTimer>,
    ) -> Self {
        let purge_timer = sched.register(
            config.timers.cache_rotation,
            Repeat::Forever,
            EngineTimer::CachePurge,
        );
        TransactionManager {
            transport,
            timers: config.timers.clone(),
            server_header: config.user_agent.clone(),
            next_id: 0,
            client_keys: HashMap::new(),
            server_keys: HashMap::new(),
            clients: HashMap::new(),
            servers: HashMap::new(),
            cache: RetransmitCache::new(),
            consumers: HashMap::new(),
            events: VecDeque::new(),
            purge_timer: Some(purge_timer),
        }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Our address as written into Via and Contact
    pub fn local_addr(&self) -> HostPort {
        self.transport.sip_addr()
    }

    pub fn server_header(&self) -> Option<&str> {
        self.server_header.as_deref()
    }

    /// Feed one received datagram through the transaction layer
    pub fn handle_incoming(
        &mut self,
        sched: &mut Scheduler<EngineTimer>,
        data: &[u8],
        source: HostPort,
        rtime: Instant,
    ) -> Incoming {
        if data.len() < MIN_DATAGRAM_SIZE {
            trace!("ignoring {} byte datagram from {}", data.len(), source);
            return Incoming::Consumed;
        }
        let checksum = Checksum::of(data);
        if let Some(entry) = self.cache.lookup(&checksum) {
            if let CacheEntry::Reply { data, destination } = entry.clone() {
                debug!("retransmission from {}, replaying cached answer", source);
                self.transmit(&data, &destination);
            } else {
                trace!("retransmission from {} ignored", source);
            }
            return Incoming::Consumed;
        }
        debug!(
            target: SIP_WIRE_TARGET,
            "RECEIVED message from {}:\n{}",
            source,
            String::from_utf8_lossy(data)
        );
        match parse_message(data) {
            Ok(Message::Response(resp)) => {
                self.incoming_response(sched, resp, checksum, rtime);
                Incoming::Consumed
            }
            Ok(Message::Request(req)) => self.incoming_request(sched, req, checksum, source, rtime),
            Err(SipError::BadBody { request, detail }) => {
                warn!("malformed {} from {}: {}", request.method, source, detail);
                self.reject_malformed(*request, &detail, checksum, &source);
                Incoming::Consumed
            }
            Err(e) => {
                warn!("can't parse SIP message from {}: {}", source, e);
                self.cache.insert(checksum, CacheEntry::Swallow);
                Incoming::Consumed
            }
        }
    }

    /// Dispatch a transaction timer
    pub fn on_timer(&mut self, sched: &mut Scheduler<EngineTimer>, tx: TransactionId, timer: TxTimer) {
        if self.clients.contains_key(&tx) {
            match timer {
                TxTimer::A => self.client_timer_a(sched, tx),
                TxTimer::B => self.client_timer_b(sched, tx),
                TxTimer::C => self.remove_client(sched, tx),
                TxTimer::G => self.client_timer_g(tx),
                other => warn!("unexpected timer {:?} for client {}", other, tx),
            }
        } else if self.servers.contains_key(&tx) {
            match timer {
                TxTimer::A => self.server_timer_a(sched, tx),
                TxTimer::D => self.server_timer_d(sched, tx),
                TxTimer::E => self.server_timer_e(sched, tx),
                TxTimer::F => self.server_timer_f(sched, tx),
                other => warn!("unexpected timer {:?} for server {}", other, tx),
            }
        } else {
            trace!("timer {:?} for gone transaction {}", timer, tx);
        }
    }

    /// Start a new generation of the retransmission cache
    pub fn rotate_cache(&mut self) {
        self.cache.rotate();
    }

    /// Stop cache rotation and forget every transaction
    pub fn shutdown(&mut self, sched: &mut Scheduler<EngineTimer>) {
        if let Some(handle) = self.purge_timer.take() {
            sched.cancel(handle);
        }
        let clients: Vec<TransactionId> = self.clients.keys().copied().collect();
        for tx in clients {
            self.remove_client(sched, tx);
        }
        let servers: Vec<TransactionId> = self.servers.keys().copied().collect();
        for tx in servers {
            self.remove_server(sched, tx);
        }
        self.events.clear();
    }

    pub fn pop_event(&mut self) -> Option<TmEvent> {
        self.events.pop_front()
    }

    pub fn has_events(&self) -> bool {
        !self.events.is_empty()
    }

    pub fn client(&self, tx: TransactionId) -> Option<&ClientTransaction> {
        self.clients.get(&tx)
    }

    pub fn server(&self, tx: TransactionId) -> Option<&ServerTransaction> {
        self.servers.get(&tx)
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn server_count(&self) -> usize {
        self.servers.len()
    }

    pub fn client_state(&self, tx: TransactionId) -> Option<TransactionState> {
        self.clients.get(&tx).map(|t| t.state)
    }

    pub fn server_state(&self, tx: TransactionId) -> Option<TransactionState> {
        self.servers.get(&tx).map(|t| t.state)
    }

    /// Register `dialog` as a consumer of in-dialog requests for `call_id`
    pub fn reg_consumer(&mut self, call_id: &str, dialog: DialogId) {
        let list = self.consumers.entry(call_id.to_string()).or_default();
        if !list.contains(&dialog) {
            list.push(dialog);
        }
    }

    pub fn unreg_consumer(&mut self, call_id: &str, dialog: DialogId) {
        if let Some(list) = self.consumers.get_mut(call_id) {
            list.retain(|d| *d != dialog);
            if list.is_empty() {
                self.consumers.remove(call_id);
            }
        }
    }

    pub fn consumers(&self, call_id: &str) -> &[DialogId] {
        self.consumers.get(call_id).map(Vec::as_slice).unwrap_or(&[])
    }

    fn next_id(&mut self) -> TransactionId {
        self.next_id += 1;
        TransactionId(self.next_id)
    }

    fn transmit(&self, data: &Bytes, destination: &HostPort) {
        debug!(
            target: SIP_WIRE_TARGET,
            "SENDING message to {}:\n{}",
            destination,
            String::from_utf8_lossy(data)
        );
        if let Err(e) = self.transport.send_datagram(data.clone(), destination) {
            warn!("failed to send to {}: {}", destination, e);
        }
    }

    /// Send and remember the datagram as the answer to `checksum`
    fn transmit_cached(&mut self, data: Bytes, destination: HostPort, checksum: Checksum) {
        self.transmit(&data, &destination);
        self.cache.insert(checksum, CacheEntry::Reply { data, destination });
    }

    fn arm(
        sched: &mut Scheduler<EngineTimer>,
        delay: Duration,
        tx: TransactionId,
        timer: TxTimer,
    ) -> Option<TimerHandle> {
        Some(sched.register(delay, Repeat::Once, EngineTimer::Transaction(tx, timer)))
    }

    fn disarm(sched: &mut Scheduler<EngineTimer>, slot: &mut Option<TimerHandle>) {
        if let Some(handle) = slot.take() {
            sched.cancel(handle);
        }
    }

    fn remove_client(&mut self, sched: &mut Scheduler<EngineTimer>, tx: TransactionId) {
        if let Some(mut t) = self.clients.remove(&tx) {
            for slot in t.timers_mut() {
                Self::disarm(sched, slot);
            }
            if self.client_keys.get(&t.key) == Some(&tx) {
                self.client_keys.remove(&t.key);
            }
            trace!("client {} removed", tx);
        }
    }

    fn remove_server(&mut self, sched: &mut Scheduler<EngineTimer>, tx: TransactionId) {
        if let Some(mut t) = self.servers.remove(&tx) {
            for slot in t.timers_mut() {
                Self::disarm(sched, slot);
            }
            if self.server_keys.get(&t.key) == Some(&tx) {
                self.server_keys.remove(&t.key);
            }
            trace!("server {} removed", tx);
        }
    }
}

#[cfg(test)]
mod tests;
