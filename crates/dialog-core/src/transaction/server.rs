use std::time::Duration;

use bytes::Bytes;

use b2bua_sip_core::{HostPort, Method, Response};

use super::cache::Checksum;
use super::key::TransactionKey;
use super::state::TransactionState;
use super::TransactionId;
use crate::dialog::DialogId;
use crate::reactor::TimerHandle;

/// An incoming request waiting for, or retransmitting, its answer
#[derive(Debug)]
pub struct ServerTransaction {
    pub(crate) id: TransactionId,
    pub(crate) key: TransactionKey,
    pub(crate) method: Method,
    pub(crate) state: TransactionState,
    /// Response destination from the top Via
    pub(crate) address: HostPort,
    /// Digest of the request datagram; its cache entry follows our answers
    pub(crate) checksum: Checksum,
    /// Last response sent
    pub(crate) data: Option<Bytes>,
    pub(crate) tout: Duration,
    pub(crate) needack: bool,
    /// Sent on CANCEL or expiry of a pending INVITE
    pub(crate) r487: Option<Response>,
    pub(crate) cancel_owner: Option<DialogId>,
    pub(crate) noack_owner: Option<DialogId>,
    pub(crate) ack_owner: Option<DialogId>,
    pub(crate) timer_a: Option<TimerHandle>,
    pub(crate) timer_d: Option<TimerHandle>,
    pub(crate) timer_e: Option<TimerHandle>,
    pub(crate) timer_f: Option<TimerHandle>,
}

impl ServerTransaction {
    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn key(&self) -> &TransactionKey {
        &self.key
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn address(&self) -> &HostPort {
        &self.address
    }

    pub(crate) fn has_timers(&self) -> bool {
        self.timer_a.is_some()
            || self.timer_d.is_some()
            || self.timer_e.is_some()
            || self.timer_f.is_some()
    }

    pub(crate) fn timers_mut(&mut self) -> [&mut Option<TimerHandle>; 4] {
        [&mut self.timer_a, &mut self.timer_d, &mut self.timer_e, &mut self.timer_f]
    }
}
