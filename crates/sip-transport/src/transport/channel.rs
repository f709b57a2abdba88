//! In-memory transport that records outbound datagrams

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use b2bua_sip_core::HostPort;

use crate::error::{Error, Result};
use crate::transport::Transport;

/// A datagram captured by [`ChannelTransport`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentDatagram {
    pub data: Bytes,
    pub destination: HostPort,
}

/// Transport that keeps every sent datagram in memory
///
/// Cloning shares the same record, so a test can keep one handle while
/// the engine owns another.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    sip_addr: HostPort,
    sent: Arc<Mutex<Vec<SentDatagram>>>,
    closed: Arc<AtomicBool>,
}

impl ChannelTransport {
    pub fn new(sip_addr: HostPort) -> Self {
        ChannelTransport {
            sip_addr,
            sent: Arc::new(Mutex::new(Vec::new())),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Remove and return everything sent so far
    pub fn take_sent(&self) -> Vec<SentDatagram> {
        std::mem::take(&mut *self.sent.lock())
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    fn local_addr(&self) -> Result<SocketAddr> {
        self.sip_addr
            .socket_addr()
            .ok_or_else(|| Error::ResolveFailed(self.sip_addr.to_string()))
    }

    fn sip_addr(&self) -> HostPort {
        self.sip_addr.clone()
    }

    fn send_datagram(&self, data: Bytes, destination: &HostPort) -> Result<()> {
        if self.is_closed() {
            return Err(Error::TransportClosed);
        }
        self.sent.lock().push(SentDatagram { data, destination: destination.clone() });
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_and_drains() {
        let transport = ChannelTransport::new(HostPort::new("192.0.2.1", 5060));
        let peer = HostPort::new("192.0.2.9", 5062);
        transport.send_datagram(Bytes::from_static(b"one"), &peer).unwrap();
        let handle = transport.clone();
        handle.send_datagram(Bytes::from_static(b"two"), &peer).unwrap();

        let sent = transport.take_sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].data, Bytes::from_static(b"two"));
        assert_eq!(transport.sent_count(), 0);

        transport.close().await.unwrap();
        assert!(matches!(
            handle.send_datagram(Bytes::new(), &peer),
            Err(Error::TransportClosed)
        ));
    }
}
