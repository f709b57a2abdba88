mod sender;

pub use sender::UdpSender;

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, error, info, warn};

use b2bua_sip_core::HostPort;

use crate::error::{Error, Result};
use crate::transport::{Transport, TransportEvent, MAX_DATAGRAM_SIZE};

// Default channel capacity
const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// UDP transport for SIP messages
///
/// One task reads the socket and emits [`TransportEvent::DatagramReceived`];
/// another drains the outbound queue filled by [`Transport::send_datagram`].
#[derive(Clone)]
pub struct UdpTransport {
    inner: Arc<UdpTransportInner>,
}

struct UdpTransportInner {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    sip_addr: HostPort,
    closed: AtomicBool,
    shutdown: Notify,
    outbound_tx: mpsc::UnboundedSender<(Bytes, HostPort)>,
}

impl UdpTransport {
    /// Bind a UDP socket and start the reader and sender tasks.
    ///
    /// `advertised` overrides the address put into Via and Contact headers,
    /// which is needed when binding to a wildcard address.
    pub async fn bind(
        addr: SocketAddr,
        advertised: Option<HostPort>,
        channel_capacity: Option<usize>,
    ) -> Result<(Self, mpsc::Receiver<TransportEvent>)> {
        let capacity = channel_capacity.unwrap_or(DEFAULT_CHANNEL_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(capacity);

        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| Error::BindFailed(addr, e))?;
        let local_addr = socket.local_addr()?;
        info!("SIP UDP transport bound to {}", local_addr);

        let sip_addr = advertised.unwrap_or_else(|| {
            if local_addr.ip().is_unspecified() {
                warn!("Bound to wildcard address {}, advertising it as is", local_addr);
            }
            HostPort::from(local_addr)
        });

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let transport = UdpTransport {
            inner: Arc::new(UdpTransportInner {
                socket: Arc::new(socket),
                local_addr,
                sip_addr,
                closed: AtomicBool::new(false),
                shutdown: Notify::new(),
                outbound_tx,
            }),
        };

        transport.spawn_receive_loop(events_tx);
        transport.spawn_send_loop(outbound_rx);

        Ok((transport, events_rx))
    }

    // Spawns a task to receive packets from the UDP socket
    fn spawn_receive_loop(&self, events_tx: mpsc::Sender<TransportEvent>) {
        let inner = self.inner.clone();

        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
            while !inner.closed.load(Ordering::Relaxed) {
                let result = tokio::select! {
                    res = inner.socket.recv_from(&mut buf) => res,
                    _ = inner.shutdown.notified() => break,
                };

                match result {
                    Ok((len, source)) => {
                        debug!("Received {} bytes from {}", len, source);
                        let event = TransportEvent::DatagramReceived {
                            data: Bytes::copy_from_slice(&buf[..len]),
                            source,
                            received_at: Instant::now(),
                        };
                        if let Err(e) = events_tx.send(event).await {
                            error!("Error sending event: {}", e);
                            break;
                        }
                    }
                    Err(e) => {
                        if inner.closed.load(Ordering::Relaxed) {
                            break;
                        }
                        error!("Error receiving UDP packet: {}", e);
                        let _ = events_tx
                            .send(TransportEvent::Error { error: format!("Error receiving packet: {}", e) })
                            .await;
                    }
                }
            }

            let _ = events_tx.send(TransportEvent::Closed).await;
            info!("UDP receive loop terminated");
        });
    }

    // Spawns a task that writes queued datagrams
    fn spawn_send_loop(&self, mut outbound_rx: mpsc::UnboundedReceiver<(Bytes, HostPort)>) {
        let sender = UdpSender::new(self.inner.socket.clone());
        let inner = self.inner.clone();

        tokio::spawn(async move {
            loop {
                let next = tokio::select! {
                    next = outbound_rx.recv() => next,
                    _ = inner.shutdown.notified() => None,
                };
                let Some((data, destination)) = next else { break };
                if inner.closed.load(Ordering::Relaxed) {
                    break;
                }
                if let Err(e) = sender.send(&data, &destination).await {
                    warn!("Failed to send {} bytes to {}: {}", data.len(), destination, e);
                }
            }
            debug!("UDP send loop terminated");
        });
    }
}

#[async_trait::async_trait]
impl Transport for UdpTransport {
    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.inner.local_addr)
    }

    fn sip_addr(&self) -> HostPort {
        self.inner.sip_addr.clone()
    }

    fn send_datagram(&self, data: Bytes, destination: &HostPort) -> Result<()> {
        if self.is_closed() {
            return Err(Error::TransportClosed);
        }
        if data.len() > MAX_DATAGRAM_SIZE {
            return Err(Error::MessageTooLarge(data.len()));
        }
        self.inner
            .outbound_tx
            .send((data, destination.clone()))
            .map_err(|_| Error::TransportClosed)
    }

    async fn close(&self) -> Result<()> {
        self.inner.closed.store(true, Ordering::Relaxed);
        self.inner.shutdown.notify_waiters();
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for UdpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UdpTransport({})", self.inner.local_addr)
    }
}
