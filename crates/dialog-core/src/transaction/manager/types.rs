use std::time::Instant;

use b2bua_sip_core::{Request, Response};

use crate::dialog::DialogId;
use crate::transaction::TransactionId;

/// Who receives the responses of a client transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxOwner {
    /// A request sent by the dialog state machine
    Dialog(DialogId),
    /// An in-dialog re-INVITE keepalive
    Keepalive(DialogId),
    /// A REFER sent on disconnect
    Refer(DialogId),
}

impl TxOwner {
    pub fn dialog(&self) -> DialogId {
        match self {
            TxOwner::Dialog(id) | TxOwner::Keepalive(id) | TxOwner::Refer(id) => *id,
        }
    }
}

/// Options for a new client transaction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientTxOptions {
    /// Hold the ACK to a 2xx until [`super::TransactionManager::send_ack`]
    pub uack: bool,
}

/// Notification queued by the transaction manager for its owners
#[derive(Debug, Clone)]
pub enum TmEvent {
    /// A response (or synthesized 408) for a client transaction
    Response {
        owner: TxOwner,
        tx: TransactionId,
        response: Response,
        rtime: Instant,
    },
    /// A pending INVITE server transaction was cancelled or expired
    Cancel {
        owner: DialogId,
        tx: TransactionId,
        request: Option<Request>,
        rtime: Instant,
    },
    /// ACK for a final response we sent
    Ack {
        owner: DialogId,
        request: Request,
        rtime: Instant,
    },
    /// Timer D fired without an ACK
    NoAck { owner: DialogId, rtime: Instant },
}

/// What became of an incoming datagram
#[derive(Debug)]
pub enum Incoming {
    /// Absorbed by the transaction layer
    Consumed,
    /// A new server transaction whose request needs a consumer
    Request {
        tx: TransactionId,
        request: Request,
        rtime: Instant,
    },
}

/// Consumer's answer to a new server transaction
#[derive(Debug, Default)]
pub struct RequestOutcome {
    pub response: Option<Response>,
    /// Dialog notified if the request is cancelled
    pub cancel: Option<DialogId>,
    /// Dialog notified if the final response is never ACKed
    pub noack: Option<DialogId>,
    /// Dialog notified when the ACK arrives
    pub ack: Option<DialogId>,
}
