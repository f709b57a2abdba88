//! # RFC 3261 transaction layer
//!
//! Client and server transactions over an unreliable datagram transport,
//! owned by a [`TransactionManager`] that runs on the reactor thread.
//!
//! ## Matching
//!
//! - Client transactions are keyed by Call-ID, From tag, CSeq number and
//!   method and top Via branch; responses are matched on the same fields.
//! - Server transactions are keyed by Call-ID, From tag, CSeq number and
//!   top Via branch. The method is not part of the key, so a CANCEL finds
//!   the INVITE it targets.
//! - Once a final response to an INVITE is sent, the server transaction is
//!   re-keyed on the To tag instead of the branch, which is how the ACK
//!   (whose branch differs for 2xx) finds it.
//!
//! ## Timers
//!
//! | Timer | Side   | Meaning                                              |
//! |-------|--------|------------------------------------------------------|
//! | A     | both   | retransmit request / final response, interval doubles |
//! | B     | client | no final response: synthesize 408                     |
//! | C     | client | linger after completion, then drop                   |
//! | D     | server | wait for ACK to a final INVITE response              |
//! | E     | server | INVITE expired (Expires): answer 487                  |
//! | F     | server | retransmit provisional responses                     |
//! | G     | client | manual ACK not sent in time (warning only)           |
//!
//! ## Retransmission cache
//!
//! Every datagram handled is remembered by MD5 digest in a two generation
//! [`RetransmitCache`]. A repeat of a known datagram is either ignored or
//! answered with the cached reply without reaching any transaction.

pub mod cache;
pub mod client;
pub mod key;
pub mod manager;
pub mod server;
pub mod state;

pub use cache::{CacheEntry, Checksum, RetransmitCache};
pub use client::ClientTransaction;
pub use key::TransactionKey;
pub use manager::{ClientTxOptions, Incoming, RequestOutcome, TmEvent, TransactionManager, TxOwner};
pub use server::ServerTransaction;
pub use state::{TransactionState, TxTimer};

use std::fmt;

/// Arena index of a live transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(pub(crate) u64);

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx#{}", self.0)
    }
}
