use std::time::Duration;

use bytes::Bytes;

use b2bua_sip_core::{Header, HostPort, Method, Request, Response};

use super::cache::Checksum;
use super::key::TransactionKey;
use super::manager::TxOwner;
use super::state::TransactionState;
use super::TransactionId;
use crate::reactor::TimerHandle;

/// An outgoing request and everything needed to finish it
#[derive(Debug)]
pub struct ClientTransaction {
    pub(crate) id: TransactionId,
    pub(crate) key: TransactionKey,
    pub(crate) method: Method,
    pub(crate) state: TransactionState,
    pub(crate) owner: Option<TxOwner>,
    pub(crate) data: Bytes,
    pub(crate) target: HostPort,
    /// Current Timer A interval
    pub(crate) tout: Duration,
    /// Timer B value once a provisional response arrived
    pub(crate) expires: Duration,
    pub(crate) needack: bool,
    /// ACK to a 2xx is sent by the owner through `send_ack`
    pub(crate) uack: bool,
    pub(crate) ack: Option<Request>,
    pub(crate) ack_target: Option<HostPort>,
    pub(crate) ack_checksum: Option<Checksum>,
    pub(crate) cancel: Option<Request>,
    pub(crate) cancel_pending: bool,
    pub(crate) cancel_headers: Vec<Header>,
    pub(crate) r408: Option<Response>,
    pub(crate) timer_a: Option<TimerHandle>,
    pub(crate) timer_b: Option<TimerHandle>,
    pub(crate) timer_c: Option<TimerHandle>,
    pub(crate) timer_g: Option<TimerHandle>,
}

impl ClientTransaction {
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

    pub fn target(&self) -> &HostPort {
        &self.target
    }

    pub fn owner(&self) -> Option<TxOwner> {
        self.owner
    }

    pub(crate) fn timers_mut(&mut self) -> [&mut Option<TimerHandle>; 4] {
        [&mut self.timer_a, &mut self.timer_b, &mut self.timer_c, &mut self.timer_g]
    }
}
