use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use b2bua_sip_core::prelude::*;
use b2bua_sip_transport::ChannelTransport;

use super::*;
use crate::config::EngineConfig;
use crate::dialog::DialogId;
use crate::errors::DialogError;
use crate::manager::EngineTimer;
use crate::reactor::Scheduler;

struct Harness {
    tm: TransactionManager,
    sched: Scheduler<EngineTimer>,
    transport: ChannelTransport,
}

fn local() -> HostPort {
    HostPort::new("192.0.2.1", 5060)
}

fn peer() -> HostPort {
    HostPort::new("192.0.2.9", 5062)
}

fn harness() -> Harness {
    let transport = ChannelTransport::new(local());
    let mut sched = Scheduler::new();
    let tm = TransactionManager::new(Arc::new(transport.clone()), &EngineConfig::default(), &mut sched);
    Harness { tm, sched, transport }
}

/// INVITE as sent by `via_host`
fn invite(via_host: &HostPort) -> Request {
    RequestBuilder::new(Method::Invite, "sip:bob@192.0.2.9:5062".parse().unwrap())
        .via(Via::udp(via_host, generate_branch()))
        .from("<sip:alice@192.0.2.1>;tag=a1".parse().unwrap())
        .to("<sip:bob@192.0.2.9>".parse().unwrap())
        .call_id(generate_call_id(None))
        .cseq(200)
        .contact(Some("<sip:alice@192.0.2.1:5060>".parse().unwrap()))
        .build()
}

impl Harness {
    fn advance(&mut self, by: Duration) {
        self.sched.advance(by);
        while let Some((_, timer)) = self.sched.pop_due() {
            match timer {
                EngineTimer::Transaction(tx, t) => self.tm.on_timer(&mut self.sched, tx, t),
                EngineTimer::CachePurge => self.tm.rotate_cache(),
                EngineTimer::Dialog(..) => {}
            }
        }
    }

    fn receive(&mut self, data: &Bytes) -> Incoming {
        let now = self.sched.now();
        self.tm.handle_incoming(&mut self.sched, data, peer(), now)
    }

    fn send_invite(&mut self, owner: Option<TxOwner>, uack: bool) -> (TransactionId, Request) {
        let req = invite(&local());
        let tx = self
            .tm
            .new_client_transaction(&mut self.sched, req.clone(), peer(), owner, ClientTxOptions { uack })
            .unwrap();
        (tx, req)
    }

    fn sent(&self) -> Vec<Message> {
        self.transport
            .take_sent()
            .into_iter()
            .map(|d| parse_message(&d.data).unwrap())
            .collect()
    }

    fn events(&mut self) -> Vec<TmEvent> {
        std::iter::from_fn(|| self.tm.pop_event()).collect()
    }
}

fn codes(messages: &[Message]) -> Vec<u16> {
    messages
        .iter()
        .filter_map(|m| match m {
            Message::Response(r) => Some(r.code()),
            Message::Request(_) => None,
        })
        .collect()
}

fn methods(messages: &[Message]) -> Vec<Method> {
    messages
        .iter()
        .filter_map(|m| match m {
            Message::Request(r) => Some(r.method.clone()),
            Message::Response(_) => None,
        })
        .collect()
}

fn answered(req: &Request, code: u16, to_tag: &str) -> Response {
    let mut resp = req.gen_response(code, "", None);
    resp.set_to_tag(to_tag).unwrap();
    resp
}

#[test]
fn test_duplicate_client_key_is_rejected() {
    let mut h = harness();
    let (first, req) = h.send_invite(None, false);
    let (second, _) = h.send_invite(None, false);
    assert_ne!(first, second);

    let err = h
        .tm
        .new_client_transaction(&mut h.sched, req, peer(), None, ClientTxOptions::default())
        .unwrap_err();
    assert!(matches!(err, DialogError::DuplicateTransaction(_)));
    assert_eq!(h.tm.client_count(), 2);
}

#[test]
fn test_request_retransmitted_until_provisional() {
    let mut h = harness();
    let (tx, req) = h.send_invite(None, false);
    assert_eq!(h.transport.sent_count(), 1);

    h.advance(Duration::from_millis(500));
    assert_eq!(h.transport.sent_count(), 2);
    h.advance(Duration::from_secs(1));
    assert_eq!(h.transport.sent_count(), 3);
    h.transport.take_sent();

    h.receive(&req.gen_response(100, "", None).to_bytes());
    assert_eq!(h.tm.client_state(tx), Some(TransactionState::Ringing));
    h.advance(Duration::from_secs(8));
    assert_eq!(h.transport.sent_count(), 0);
}

#[test]
fn test_timer_b_reports_408_and_timer_c_drops() {
    let mut h = harness();
    let owner = TxOwner::Dialog(DialogId::new());
    let (tx, _) = h.send_invite(Some(owner), false);

    h.advance(Duration::from_secs(33));
    let events = h.events();
    assert_eq!(events.len(), 1);
    match &events[0] {
        TmEvent::Response { owner: o, tx: t, response, .. } => {
            assert_eq!(*o, owner);
            assert_eq!(*t, tx);
            assert_eq!(response.code(), 408);
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert_eq!(h.tm.client_state(tx), Some(TransactionState::Terminated));

    h.advance(Duration::from_secs(33));
    assert_eq!(h.tm.client_state(tx), None);
}

#[test]
fn test_cancel_waits_for_provisional() {
    let mut h = harness();
    let (tx, req) = h.send_invite(None, false);
    h.transport.take_sent();

    h.tm
        .cancel_transaction(&mut h.sched, tx, vec![Header::new(HeaderName::Reason, "SIP;cause=487")])
        .unwrap();
    assert_eq!(h.transport.sent_count(), 0);

    h.receive(&answered(&req, 180, "b1").to_bytes());
    let sent = h.sent();
    assert_eq!(methods(&sent), vec![Method::Cancel]);
    if let Message::Request(cancel) = &sent[0] {
        assert_eq!(cancel.header(&HeaderName::Reason), Some("SIP;cause=487"));
        assert_eq!(cancel.top_via().unwrap().branch(), req.top_via().unwrap().branch());
    }
}

#[test]
fn test_2xx_ack_follows_contact_and_is_replayed() {
    let mut h = harness();
    let owner = TxOwner::Dialog(DialogId::new());
    let (tx, req) = h.send_invite(Some(owner), false);
    h.transport.take_sent();

    let mut ok = answered(&req, 200, "b1");
    ok.headers.append(HeaderName::Contact, "<sip:bob@192.0.2.20:5070>");
    let data = ok.to_bytes();
    h.receive(&data);

    let sent = h.transport.take_sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].destination, HostPort::new("192.0.2.20", 5070));
    let ack = match parse_message(&sent[0].data).unwrap() {
        Message::Request(ack) => ack,
        other => panic!("expected ACK, got {:?}", other),
    };
    assert_eq!(ack.method, Method::Ack);
    assert_eq!(ack.to_address().unwrap().tag(), Some("b1"));
    assert_ne!(ack.top_via().unwrap().branch(), req.top_via().unwrap().branch());
    assert_eq!(h.tm.client_state(tx), Some(TransactionState::Completed));
    assert_eq!(h.events().len(), 1);

    // a retransmitted 200 gets the same ACK without reaching the owner
    h.receive(&data);
    let again = h.transport.take_sent();
    assert_eq!(again.len(), 1);
    assert_eq!(again[0].data, sent[0].data);
    assert!(h.events().is_empty());
}

#[test]
fn test_uack_holds_ack_until_released() {
    let mut h = harness();
    let (tx, req) = h.send_invite(Some(TxOwner::Dialog(DialogId::new())), true);
    h.transport.take_sent();

    h.receive(&answered(&req, 200, "b1").to_bytes());
    assert_eq!(h.tm.client_state(tx), Some(TransactionState::Uack));
    assert_eq!(h.transport.sent_count(), 0);

    let body = Bytes::from_static(b"v=0\r\no=- 1 1 IN IP4 192.0.2.1\r\n");
    h.tm
        .send_ack(&mut h.sched, tx, Some((body.clone(), "application/sdp".to_string())))
        .unwrap();
    let sent = h.sent();
    assert_eq!(methods(&sent), vec![Method::Ack]);
    if let Message::Request(ack) = &sent[0] {
        assert_eq!(ack.body(), &body);
    }
    assert_eq!(h.tm.client_state(tx), Some(TransactionState::Completed));
}

#[test]
fn test_non_2xx_is_acked_on_the_invite_branch() {
    let mut h = harness();
    let (_, req) = h.send_invite(Some(TxOwner::Dialog(DialogId::new())), true);
    h.transport.take_sent();

    h.receive(&answered(&req, 486, "b1").to_bytes());
    let sent = h.sent();
    assert_eq!(methods(&sent), vec![Method::Ack]);
    if let Message::Request(ack) = &sent[0] {
        assert_eq!(ack.top_via().unwrap().branch(), req.top_via().unwrap().branch());
    }
}

#[test]
fn test_server_retransmission_replays_last_answer() {
    let mut h = harness();
    let data = invite(&peer()).to_bytes();
    let (tx, request) = match h.receive(&data) {
        Incoming::Request { tx, request, .. } => (tx, request),
        Incoming::Consumed => panic!("new INVITE was consumed"),
    };
    let ringing = request.gen_response(180, "Ringing", None);
    h.tm.apply_outcome(
        &mut h.sched,
        tx,
        Some(RequestOutcome { response: Some(ringing), ..Default::default() }),
    );
    let first = h.transport.take_sent();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].destination, peer());

    assert!(matches!(h.receive(&data), Incoming::Consumed));
    let replay = h.transport.take_sent();
    assert_eq!(replay.len(), 1);
    assert_eq!(replay[0].data, first[0].data);
    assert_eq!(h.tm.server_state(tx), Some(TransactionState::Ringing));
}

#[test]
fn test_cancel_sends_487_and_notifies_owner() {
    let mut h = harness();
    let owner = DialogId::new();
    let req = invite(&peer());
    let tx = match h.receive(&req.to_bytes()) {
        Incoming::Request { tx, .. } => tx,
        Incoming::Consumed => panic!("new INVITE was consumed"),
    };
    h.tm.apply_outcome(
        &mut h.sched,
        tx,
        Some(RequestOutcome {
            response: Some(req.gen_response(100, "Trying", None)),
            cancel: Some(owner),
            ..Default::default()
        }),
    );
    h.transport.take_sent();

    h.receive(&req.gen_cancel().to_bytes());
    let mut sent = codes(&h.sent());
    sent.sort_unstable();
    assert_eq!(sent, vec![200, 487]);

    let events = h.events();
    assert!(matches!(
        events.as_slice(),
        [TmEvent::Cancel { owner: o, request: Some(_), .. }] if *o == owner
    ));
    assert_eq!(h.tm.server_state(tx), Some(TransactionState::Completed));
}

#[test]
fn test_unmatched_cancel_gets_481() {
    let mut h = harness();
    h.receive(&invite(&peer()).gen_cancel().to_bytes());
    assert_eq!(codes(&h.sent()), vec![481]);
    assert_eq!(h.tm.server_count(), 0);
}

#[test]
fn test_looped_request_gets_482() {
    let mut h = harness();
    let (_, req) = h.send_invite(None, false);
    h.transport.take_sent();

    assert!(matches!(h.receive(&req.to_bytes()), Incoming::Consumed));
    assert_eq!(codes(&h.sent()), vec![482]);
    assert_eq!(h.tm.server_count(), 0);
}

#[test]
fn test_missing_ack_reported_after_timer_d() {
    let mut h = harness();
    let owner = DialogId::new();
    let req = invite(&peer());
    let tx = match h.receive(&req.to_bytes()) {
        Incoming::Request { tx, .. } => tx,
        Incoming::Consumed => panic!("new INVITE was consumed"),
    };
    h.tm.apply_outcome(
        &mut h.sched,
        tx,
        Some(RequestOutcome {
            response: Some(req.gen_response(200, "OK", None)),
            noack: Some(owner),
            ..Default::default()
        }),
    );
    assert_eq!(h.transport.take_sent().len(), 1);

    h.advance(Duration::from_millis(500));
    assert_eq!(h.transport.take_sent().len(), 1);

    h.advance(Duration::from_secs(33));
    assert!(matches!(
        h.events().as_slice(),
        [TmEvent::NoAck { owner: o, .. }] if *o == owner
    ));
    assert_eq!(h.tm.server_state(tx), None);
}

#[test]
fn test_ack_matches_completed_invite_by_to_tag() {
    let mut h = harness();
    let owner = DialogId::new();
    let req = invite(&peer());
    let tx = match h.receive(&req.to_bytes()) {
        Incoming::Request { tx, .. } => tx,
        Incoming::Consumed => panic!("new INVITE was consumed"),
    };
    h.tm.apply_outcome(
        &mut h.sched,
        tx,
        Some(RequestOutcome {
            response: Some(answered(&req, 200, "b2")),
            ack: Some(owner),
            noack: Some(owner),
            ..Default::default()
        }),
    );
    h.transport.take_sent();

    // 2xx ACK is a new transaction with its own branch
    let mut ack = req.gen_request(Method::Ack, None);
    let mut to = ack.to_address().unwrap();
    to.set_tag("b2");
    ack.headers.set(HeaderName::To, to.to_string());
    h.receive(&ack.to_bytes());

    assert!(matches!(
        h.events().as_slice(),
        [TmEvent::Ack { owner: o, .. }] if *o == owner
    ));
    assert_eq!(h.tm.server_state(tx), None);

    h.advance(Duration::from_secs(40));
    assert!(h.events().is_empty());
}

#[test]
fn test_short_datagrams_are_ignored() {
    let mut h = harness();
    assert!(matches!(h.receive(&Bytes::from_static(b"\r\n\r\n")), Incoming::Consumed));
    assert_eq!(h.transport.sent_count(), 0);
}

#[test]
fn test_request_with_bad_body_gets_400() {
    let mut h = harness();
    let req = invite(&peer());
    let raw = String::from_utf8(req.to_bytes().to_vec()).unwrap();
    let raw = raw.replace("Content-Length: 0", "Content-Length: 900") + "v=0\r\no=- 1 1 IN IP4 x\r\n";
    let data = Bytes::from(raw);

    assert!(matches!(h.receive(&data), Incoming::Consumed));
    let sent = h.transport.take_sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].destination, peer());
    let Message::Response(resp) = parse_message(&sent[0].data).unwrap() else {
        panic!("expected a response");
    };
    assert_eq!(resp.code(), 400);
    assert!(resp.reason.starts_with("Bad Request - "));
    assert_eq!(resp.call_id().unwrap(), req.call_id().unwrap());
    assert!(h.events().is_empty());

    // a retransmission gets the same answer from the cache
    h.receive(&data);
    let again = h.transport.take_sent();
    assert_eq!(again.len(), 1);
    assert_eq!(again[0].data, sent[0].data);
}

#[test]
fn test_ack_with_bad_body_is_dropped() {
    let mut h = harness();
    let mut ack = invite(&peer());
    ack.method = Method::Ack;
    let raw = String::from_utf8(ack.to_bytes().to_vec()).unwrap().replace("Content-Length: 0", "Content-Length: 64");
    h.receive(&Bytes::from(raw));
    assert_eq!(h.transport.sent_count(), 0);
}
