pub mod channel;
pub mod udp;

use std::fmt;
use std::net::SocketAddr;
use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;

use b2bua_sip_core::HostPort;

use crate::error::Result;

/// Largest datagram handed to the socket
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Events emitted by a transport
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A datagram arrived
    DatagramReceived {
        data: Bytes,
        source: SocketAddr,
        /// Receive time, used for event timestamps upstream
        received_at: Instant,
    },
    /// A socket error that did not stop the transport
    Error { error: String },
    /// The receive loop has terminated
    Closed,
}

/// A datagram transport as seen by the transaction engine
///
/// `send_datagram` must not block: implementations queue the write and
/// report delivery failures through logging only.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Bound socket address
    fn local_addr(&self) -> Result<SocketAddr>;

    /// Address advertised in Via and Contact headers
    fn sip_addr(&self) -> HostPort;

    /// Queue a datagram for `destination`
    fn send_datagram(&self, data: Bytes, destination: &HostPort) -> Result<()>;

    /// Stop receiving and sending
    async fn close(&self) -> Result<()>;

    fn is_closed(&self) -> bool;
}
