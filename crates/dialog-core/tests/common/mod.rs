//! Shared harness for the dialog integration tests
//!
//! The engine runs against an in-memory transport and the scheduler's
//! virtual clock; the tests play the remote user agent by hand.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc::UnboundedReceiver;

use b2bua_dialog_core::config::{EngineConfig, UaConfig};
use b2bua_dialog_core::events::{CallEvent, EventKind, LegNotice, Notification, StatusData, TryData};
use b2bua_dialog_core::reactor::EventLoop;
use b2bua_dialog_core::sdp::MessageBody;
use b2bua_dialog_core::{DialogId, DialogManager};
use b2bua_sip_core::prelude::*;
use b2bua_sip_transport::ChannelTransport;

pub const OFFER: &str = "v=0\r\n\
o=- 1 1 IN IP4 192.0.2.1\r\n\
s=-\r\n\
c=IN IP4 192.0.2.1\r\n\
t=0 0\r\n\
m=audio 4000 RTP/AVP 0\r\n";

pub const ANSWER: &str = "v=0\r\n\
o=- 2 2 IN IP4 192.0.2.9\r\n\
s=-\r\n\
c=IN IP4 192.0.2.9\r\n\
t=0 0\r\n\
m=audio 6000 RTP/AVP 0\r\n";

pub fn local_addr() -> HostPort {
    HostPort::new("192.0.2.1", 5060)
}

pub fn peer() -> HostPort {
    HostPort::new("192.0.2.9", 5062)
}

pub fn peer_socket() -> SocketAddr {
    "192.0.2.9:5062".parse().unwrap()
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("b2bua_dialog_core=debug,sip_wire=debug")
        .with_test_writer()
        .try_init();
}

/// A datagram the engine sent, parsed
#[derive(Debug)]
pub struct Sent {
    pub message: Message,
    pub destination: HostPort,
}

impl Sent {
    pub fn request(&self) -> Option<&Request> {
        match &self.message {
            Message::Request(r) => Some(r),
            Message::Response(_) => None,
        }
    }

    pub fn response(&self) -> Option<&Response> {
        match &self.message {
            Message::Response(r) => Some(r),
            Message::Request(_) => None,
        }
    }
}

pub struct TestEngine {
    pub manager: DialogManager,
    pub notifications: UnboundedReceiver<Notification>,
    pub transport: ChannelTransport,
    pub event_loop: EventLoop<DialogManager>,
}

impl TestEngine {
    pub fn new(config: EngineConfig) -> Self {
        init_tracing();
        let transport = ChannelTransport::new(local_addr());
        let event_loop = EventLoop::new(Duration::from_secs(1));
        let (manager, notifications) =
            DialogManager::new(config, Arc::new(transport.clone()), event_loop.handle());
        TestEngine { manager, notifications, transport, event_loop }
    }

    pub fn with_defaults() -> Self {
        Self::new(EngineConfig::default())
    }

    /// Deliver raw bytes as if they came from the peer
    pub fn deliver(&mut self, data: Bytes) {
        let now = self.manager.now();
        self.manager.handle_incoming(&data, peer_socket(), now);
    }

    pub fn deliver_request(&mut self, req: &Request) {
        self.deliver(req.to_bytes());
    }

    pub fn deliver_response(&mut self, resp: &Response) {
        self.deliver(resp.to_bytes());
    }

    pub fn advance(&mut self, by: Duration) -> usize {
        self.manager.advance(by)
    }

    /// Run jobs marshaled onto the loop, such as SDP completions
    pub fn run_pending(&mut self) -> usize {
        self.event_loop.run_pending(&mut self.manager)
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.transport
            .take_sent()
            .into_iter()
            .map(|d| Sent {
                message: parse_message(&d.data).expect("engine sent an unparsable datagram"),
                destination: d.destination,
            })
            .collect()
    }

    pub fn sent_requests(&self) -> Vec<Request> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s.message {
                Message::Request(r) => Some(r),
                Message::Response(_) => None,
            })
            .collect()
    }

    pub fn sent_responses(&self) -> Vec<Response> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s.message {
                Message::Response(r) => Some(r),
                Message::Request(_) => None,
            })
            .collect()
    }

    pub fn notifications(&mut self) -> Vec<Notification> {
        let mut out = Vec::new();
        while let Ok(n) = self.notifications.try_recv() {
            out.push(n);
        }
        out
    }

    pub fn now(&self) -> std::time::Instant {
        self.manager.now()
    }

    pub fn event(&self, kind: EventKind) -> CallEvent {
        CallEvent::new(kind, self.now())
    }

    /// Start an outgoing call from alice to bob; returns the leg and the INVITE
    pub fn place_call(&mut self, config: UaConfig, body: Option<MessageBody>) -> (DialogId, Request) {
        let id = self.manager.create_dialog(config, peer());
        let data = TryData {
            calling: Some("alice".to_string()),
            called: Some("bob".to_string()),
            body,
            ..TryData::default()
        };
        self.manager.recv_event(id, self.event(EventKind::Try(data))).unwrap();
        let invite = self
            .sent_requests()
            .into_iter()
            .find(|r| r.method == Method::Invite)
            .expect("no INVITE sent");
        (id, invite)
    }

    /// Outgoing call answered with 200 and [`ANSWER`]
    pub fn connected_call(&mut self, config: UaConfig) -> (DialogId, Request) {
        let (id, invite) = self.place_call(config, Some(MessageBody::sdp(OFFER)));
        self.deliver_response(&answer(&invite, 200, Some(ANSWER)));
        self.transport.take_sent();
        self.notifications();
        (id, invite)
    }

    /// Incoming call from carol to bob; returns the leg and the INVITE
    pub fn incoming_call(&mut self, body: Option<&str>) -> (DialogId, Request) {
        let invite = peer_invite(body);
        self.deliver_request(&invite);
        let id = self
            .manager
            .dialog_ids()
            .into_iter()
            .find(|id| self.manager.dialog(*id).map(|d| d.call_id()) == invite.call_id().ok())
            .expect("no dialog created for INVITE");
        (id, invite)
    }

    /// Incoming call answered by the application and ACKed by the peer
    pub fn answered_call(&mut self) -> (DialogId, Request, Response) {
        let (id, invite) = self.incoming_call(Some(OFFER));
        let status = StatusData::new(200, "OK").with_body(Some(MessageBody::sdp(ANSWER)));
        self.manager.recv_event(id, self.event(EventKind::Connect(status))).unwrap();
        let ok = self
            .sent_responses()
            .into_iter()
            .find(|r| r.code() == 200)
            .expect("no 200 sent");
        self.deliver_request(&ack_for(&invite, &ok));
        self.transport.take_sent();
        self.notifications();
        (id, invite, ok)
    }
}

/// The peer's answer to a request we sent
pub fn answer(req: &Request, code: u16, body: Option<&str>) -> Response {
    let mut resp = req.gen_response(code, "", None);
    if code > 100 {
        resp.set_to_tag("peer1").unwrap();
    }
    if (200..300).contains(&code) || code == 180 {
        resp.headers.append(HeaderName::Contact, "<sip:bob@192.0.2.9:5062>");
    }
    if let Some(body) = body {
        resp.set_body(Bytes::from(body.to_string()), Some("application/sdp"));
    }
    resp
}

/// Out-of-dialog INVITE from the peer
pub fn peer_invite(body: Option<&str>) -> Request {
    let mut builder = RequestBuilder::new(Method::Invite, "sip:bob@192.0.2.1:5060".parse().unwrap())
        .via(Via::udp(&peer(), generate_branch()))
        .from("\"Carol\" <sip:carol@192.0.2.9>;tag=c1".parse().unwrap())
        .to("<sip:bob@192.0.2.1>".parse().unwrap())
        .call_id(generate_call_id(Some("192.0.2.9")))
        .cseq(1)
        .contact(Some("<sip:carol@192.0.2.9:5062>".parse().unwrap()))
        .user_agent(Some("softphone/1.0".to_string()));
    if let Some(body) = body {
        builder = builder.body(Bytes::from(body.to_string()), "application/sdp");
    }
    builder.build()
}

/// In-dialog request from the peer on the dialog set up by `invite`/`ok`
pub fn peer_request(invite: &Request, ok: &Response, method: Method, cseq: u32) -> Request {
    let mut req = invite.gen_request(method, Some(cseq));
    req.headers.set(HeaderName::To, ok.to_address().unwrap().to_string());
    req
}

/// ACK for a 2xx the engine sent to `invite`
pub fn ack_for(invite: &Request, ok: &Response) -> Request {
    peer_request(invite, ok, Method::Ack, invite.cseq().unwrap().seq)
}

pub fn events(notifications: &[Notification]) -> Vec<&CallEvent> {
    notifications.iter().filter_map(Notification::event).collect()
}

pub fn notices(notifications: &[Notification]) -> Vec<LegNotice> {
    notifications.iter().filter_map(Notification::notice).collect()
}

pub fn event_names(notifications: &[Notification]) -> Vec<&'static str> {
    events(notifications).into_iter().map(CallEvent::name).collect()
}
