//! Datagram transport for the b2bua SIP stack
//!
//! The transaction engine hands serialized messages to a [`Transport`]
//! together with a [`HostPort`](b2bua_sip_core::HostPort) destination and
//! never waits for the write. Received datagrams are delivered raw, with
//! their source address and receive time, as [`TransportEvent`]s; parsing
//! and duplicate suppression are the engine's job.
//!
//! Two implementations are provided:
//!
//! - [`UdpTransport`]: a UDP socket with a reader task and a sender task
//! - [`ChannelTransport`]: an in-memory transport that records what was
//!   sent, for driving the engine in tests

pub mod error;
pub mod transport;

pub use error::{Error, Result};
pub use transport::channel::{ChannelTransport, SentDatagram};
pub use transport::udp::UdpTransport;
pub use transport::{Transport, TransportEvent};

/// Bind a UDP transport to the specified address
pub async fn bind_udp(
    addr: std::net::SocketAddr,
) -> Result<(UdpTransport, tokio::sync::mpsc::Receiver<TransportEvent>)> {
    UdpTransport::bind(addr, None, None).await
}

/// Re-export of common types for easier use
pub mod prelude {
    pub use crate::{bind_udp, ChannelTransport, Error, Result, Transport, TransportEvent, UdpTransport};
}
