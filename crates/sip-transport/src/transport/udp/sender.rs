use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::net::UdpSocket;
use tracing::{debug, trace};

use b2bua_sip_core::HostPort;

use crate::error::{Error, Result};

/// Resolves destinations and writes datagrams to the shared socket
pub struct UdpSender {
    socket: Arc<UdpSocket>,
    resolved: DashMap<HostPort, SocketAddr>,
}

impl UdpSender {
    pub fn new(socket: Arc<UdpSocket>) -> Self {
        UdpSender { socket, resolved: DashMap::new() }
    }

    /// Resolve a destination, caching name lookups
    pub async fn resolve(&self, destination: &HostPort) -> Result<SocketAddr> {
        if let Some(addr) = destination.socket_addr() {
            return Ok(addr);
        }
        if let Some(addr) = self.resolved.get(destination) {
            return Ok(*addr);
        }
        let addr = tokio::net::lookup_host((destination.host.as_str(), destination.port))
            .await
            .map_err(|_| Error::ResolveFailed(destination.to_string()))?
            .next()
            .ok_or_else(|| Error::ResolveFailed(destination.to_string()))?;
        debug!("Resolved {} to {}", destination, addr);
        self.resolved.insert(destination.clone(), addr);
        Ok(addr)
    }

    pub async fn send(&self, data: &Bytes, destination: &HostPort) -> Result<()> {
        let addr = self.resolve(destination).await?;
        let sent = self.socket.send_to(data, addr).await?;
        trace!("Sent {} bytes to {}", sent, addr);
        Ok(())
    }
}
