//! The engine driven by its event loop over a real UDP socket

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use serial_test::serial;
use tokio::net::UdpSocket;
use tokio::time::timeout;

use b2bua_dialog_core::config::EngineConfig;
use b2bua_dialog_core::events::EventKind;
use b2bua_dialog_core::manager::forward_transport_events;
use b2bua_dialog_core::reactor::EventLoop;
use b2bua_dialog_core::DialogManager;
use b2bua_sip_core::prelude::*;
use b2bua_sip_transport::Transport;

async fn recv_message(socket: &UdpSocket) -> anyhow::Result<Message> {
    let mut buf = vec![0u8; 65_535];
    let (n, _) = timeout(Duration::from_secs(2), socket.recv_from(&mut buf))
        .await
        .context("no answer from the engine")??;
    Ok(parse_message(&buf[..n])?)
}

fn request_from(peer: SocketAddr, method: Method) -> Request {
    let host = HostPort::from(peer);
    RequestBuilder::new(method, "sip:bob@127.0.0.1".parse().unwrap())
        .via(Via::udp(&host, generate_branch()))
        .from("<sip:alice@127.0.0.1>;tag=e2e".parse().unwrap())
        .to("<sip:bob@127.0.0.1>".parse().unwrap())
        .call_id(generate_call_id(Some("127.0.0.1")))
        .cseq(1)
        .contact(Some(Address::new(Uri::sip(Some("alice"), "127.0.0.1", Some(peer.port())))))
        .build()
}

#[tokio::test]
#[serial]
async fn test_incoming_invite_over_udp() -> anyhow::Result<()> {
    let (transport, transport_rx) = b2bua_sip_transport::bind_udp("127.0.0.1:0".parse()?).await?;
    let engine_addr = transport.local_addr()?;

    let mut event_loop = EventLoop::new(Duration::from_millis(20));
    let (mut manager, mut notifications) =
        DialogManager::new(EngineConfig::default(), Arc::new(transport), event_loop.handle());
    forward_transport_events(transport_rx, event_loop.handle());

    let peer = UdpSocket::bind("127.0.0.1:0").await?;
    let peer_addr = peer.local_addr()?;

    let exchange = async {
        let options = request_from(peer_addr, Method::Options);
        peer.send_to(&options.to_bytes(), engine_addr).await?;
        let Message::Response(resp) = recv_message(&peer).await? else {
            bail!("expected a response to OPTIONS");
        };
        assert_eq!(resp.code(), 501);

        let invite = request_from(peer_addr, Method::Invite);
        peer.send_to(&invite.to_bytes(), engine_addr).await?;
        let Message::Response(trying) = recv_message(&peer).await? else {
            bail!("expected 100 Trying");
        };
        assert_eq!(trying.code(), 100);
        assert_eq!(trying.call_id()?, invite.call_id()?);

        let notification = timeout(Duration::from_secs(2), notifications.recv())
            .await?
            .context("notification channel closed")?;
        match notification.event().map(|e| &e.kind) {
            Some(EventKind::Try(data)) => assert_eq!(data.calling.as_deref(), Some("alice")),
            other => bail!("expected Try, got {:?}", other),
        }
        Ok::<(), anyhow::Error>(())
    };

    tokio::select! {
        result = exchange => result,
        _ = event_loop.run(&mut manager, Some(Duration::from_secs(5))) => {
            bail!("event loop stopped before the exchange finished")
        }
    }
}
