//! Incoming call legs and out-of-dialog request handling

mod common;

use std::time::Instant;

use bytes::Bytes;

use b2bua_dialog_core::events::{EventKind, FailData, LegNotice, StatusData};
use b2bua_dialog_core::sdp::MessageBody;
use b2bua_dialog_core::{RequestDisposition, UaState};
use b2bua_sip_core::prelude::*;

use common::*;

const NEW_OFFER: &str = "v=0\r\n\
o=- 1 2 IN IP4 192.0.2.9\r\n\
s=-\r\n\
c=IN IP4 192.0.2.9\r\n\
t=0 0\r\n\
m=audio 7000 RTP/AVP 8\r\n";

fn codes(responses: &[Response]) -> Vec<u16> {
    responses.iter().map(Response::code).collect()
}

fn out_of_dialog(method: Method, to: &str) -> Request {
    RequestBuilder::new(method, "sip:bob@192.0.2.1:5060".parse().unwrap())
        .via(Via::udp(&peer(), generate_branch()))
        .from("<sip:carol@192.0.2.9>;tag=c7".parse().unwrap())
        .to(to.parse().unwrap())
        .call_id(generate_call_id(Some("192.0.2.9")))
        .cseq(1)
        .build()
}

#[test]
fn test_incoming_call_answered_and_released() {
    let mut engine = TestEngine::with_defaults();
    let (id, invite) = engine.incoming_call(Some(OFFER));

    let trying = engine.sent_responses();
    assert_eq!(codes(&trying), vec![100]);
    assert!(trying[0].to_tag().unwrap().is_none());

    let n = engine.notifications();
    let event = events(&n)[0];
    match &event.kind {
        EventKind::Try(data) => {
            assert_eq!(data.calling.as_deref(), Some("carol"));
            assert_eq!(data.calling_name.as_deref(), Some("Carol"));
            assert_eq!(data.called.as_deref(), Some("bob"));
            assert_eq!(data.call_id.as_deref(), invite.call_id().ok());
            assert_eq!(&data.body.as_ref().unwrap().content[..], OFFER.as_bytes());
        }
        other => panic!("expected Try, got {:?}", other),
    }
    let dialog = engine.manager.dialog(id).unwrap();
    assert_eq!(dialog.state(), UaState::UasTrying);
    assert_eq!(dialog.remote_user_agent(), Some("softphone/1.0"));
    let local_tag = dialog.local_tag().to_string();

    engine.manager.recv_event(id, engine.event(EventKind::Ring(None))).unwrap();
    let ringing = engine.sent_responses();
    assert_eq!(codes(&ringing), vec![180]);
    assert_eq!(ringing[0].to_tag().unwrap().as_deref(), Some(local_tag.as_str()));
    assert!(ringing[0].header(&HeaderName::Contact).is_some());
    assert_eq!(notices(&engine.notifications()), vec![LegNotice::Ringing { code: 180 }]);
    assert_eq!(engine.manager.dialog(id).unwrap().state(), UaState::UasRinging);

    let status = StatusData::new(200, "OK").with_body(Some(MessageBody::sdp(ANSWER)));
    engine.manager.recv_event(id, engine.event(EventKind::Connect(status))).unwrap();
    let ok = engine.sent_responses().remove(0);
    assert_eq!(ok.code(), 200);
    assert_eq!(&ok.body()[..], ANSWER.as_bytes());
    assert_eq!(notices(&engine.notifications()), vec![LegNotice::Connected]);

    // the ACK completes the INVITE without any further output
    engine.deliver_request(&ack_for(&invite, &ok));
    assert!(engine.sent().is_empty());
    assert!(engine.notifications().is_empty());

    engine.deliver_request(&peer_request(&invite, &ok, Method::Bye, 2));
    assert_eq!(codes(&engine.sent_responses()), vec![200]);
    let n = engine.notifications();
    assert_eq!(event_names(&n), vec!["Disconnect"]);
    assert_eq!(notices(&n), vec![LegNotice::Disconnected { code: None }]);
    assert_eq!(engine.manager.dialog(id).unwrap().state(), UaState::Disconnected);
}

#[test]
fn test_cancel_terminates_pending_invite() {
    let mut engine = TestEngine::with_defaults();
    let (id, invite) = engine.incoming_call(Some(OFFER));
    engine.manager.recv_event(id, engine.event(EventKind::Ring(None))).unwrap();
    engine.transport.take_sent();
    engine.notifications();

    let mut cancel = invite.gen_cancel();
    cancel.headers.append(HeaderName::Reason, "Q.850;cause=31");
    engine.deliver_request(&cancel);

    let mut sent = codes(&engine.sent_responses());
    sent.sort_unstable();
    assert_eq!(sent, vec![200, 487]);
    let n = engine.notifications();
    let disconnect = events(&n)[0];
    assert!(matches!(disconnect.kind, EventKind::Disconnect(None)));
    assert_eq!(disconnect.reason.as_deref(), Some("Q.850;cause=31"));
    assert_eq!(notices(&n), vec![LegNotice::Disconnected { code: None }]);
    assert_eq!(engine.manager.dialog(id).unwrap().state(), UaState::Disconnected);
}

#[test]
fn test_rejected_incoming_call() {
    let mut engine = TestEngine::with_defaults();
    let (id, _) = engine.incoming_call(None);
    engine.transport.take_sent();

    let fail = EventKind::Fail(Some(FailData::new(486, "Busy Here")));
    engine
        .manager
        .recv_event(id, engine.event(fail).with_reason(Some("Q.850;cause=17".to_string())))
        .unwrap();
    let rejected = engine.sent_responses();
    assert_eq!(codes(&rejected), vec![486]);
    assert_eq!(rejected[0].header(&HeaderName::Reason), Some("Q.850;cause=17"));
    assert!(rejected[0].to_tag().unwrap().is_some());
    assert_eq!(engine.manager.dialog(id).unwrap().state(), UaState::Failed);
}

#[test]
fn test_bye_while_ringing_terminates_invite() {
    let mut engine = TestEngine::with_defaults();
    let (id, invite) = engine.incoming_call(Some(OFFER));
    engine.manager.recv_event(id, engine.event(EventKind::Ring(None))).unwrap();
    let ringing = engine.sent_responses().pop().unwrap();
    engine.notifications();

    engine.deliver_request(&peer_request(&invite, &ringing, Method::Bye, 2));
    let mut sent = codes(&engine.sent_responses());
    sent.sort_unstable();
    assert_eq!(sent, vec![200, 487]);
    assert_eq!(event_names(&engine.notifications()), vec!["Disconnect"]);
    assert_eq!(engine.manager.dialog(id).unwrap().state(), UaState::Disconnected);
}

#[test]
fn test_stale_cseq_is_refused() {
    let mut engine = TestEngine::with_defaults();
    let (_, invite, ok) = engine.answered_call();

    engine.deliver_request(&peer_request(&invite, &ok, Method::Info, 1));
    assert_eq!(codes(&engine.sent_responses()), vec![500]);
    assert!(engine.notifications().is_empty());

    let mut info = peer_request(&invite, &ok, Method::Info, 2);
    info.set_body(Bytes::from_static(b"Signal=5\r\n"), Some("application/dtmf-relay"));
    engine.deliver_request(&info);
    assert_eq!(codes(&engine.sent_responses()), vec![200]);
    let n = engine.notifications();
    match &events(&n)[0].kind {
        EventKind::Info(Some(body)) => {
            assert_eq!(body.content_type, "application/dtmf-relay");
            assert_eq!(&body.content[..], b"Signal=5\r\n");
        }
        other => panic!("expected Info, got {:?}", other),
    }
}

#[test]
fn test_reinvite_with_same_session_is_answered_locally() {
    let mut engine = TestEngine::with_defaults();
    let (id, invite, ok) = engine.answered_call();

    let mut reinvite = peer_request(&invite, &ok, Method::Invite, 2);
    reinvite.set_body(Bytes::from_static(OFFER.as_bytes()), Some("application/sdp"));
    engine.deliver_request(&reinvite);

    let responses = engine.sent_responses();
    assert_eq!(codes(&responses), vec![100, 200]);
    assert_eq!(&responses[1].body()[..], ANSWER.as_bytes());
    assert!(engine.notifications().is_empty());
    assert_eq!(engine.manager.dialog(id).unwrap().state(), UaState::Connected);
}

#[test]
fn test_reinvite_with_new_session_waits_for_application() {
    let mut engine = TestEngine::with_defaults();
    let (id, invite, ok) = engine.answered_call();

    let mut reinvite = peer_request(&invite, &ok, Method::Invite, 2);
    reinvite.set_body(Bytes::from_static(NEW_OFFER.as_bytes()), Some("application/sdp"));
    engine.deliver_request(&reinvite);

    assert_eq!(codes(&engine.sent_responses()), vec![100]);
    let n = engine.notifications();
    match &events(&n)[0].kind {
        EventKind::Update(Some(body)) => assert_eq!(&body.content[..], NEW_OFFER.as_bytes()),
        other => panic!("expected Update, got {:?}", other),
    }
    assert_eq!(engine.manager.dialog(id).unwrap().state(), UaState::UasUpdating);

    // a second offer while the first is pending
    let mut glare = peer_request(&invite, &ok, Method::Invite, 3);
    glare.set_body(Bytes::from_static(OFFER.as_bytes()), Some("application/sdp"));
    engine.deliver_request(&glare);
    assert_eq!(codes(&engine.sent_responses()), vec![491]);

    let status = StatusData::new(200, "OK").with_body(Some(MessageBody::sdp(ANSWER)));
    engine.manager.recv_event(id, engine.event(EventKind::Connect(status))).unwrap();
    assert_eq!(codes(&engine.sent_responses()), vec![200]);
    let dialog = engine.manager.dialog(id).unwrap();
    assert_eq!(dialog.state(), UaState::Connected);
    assert_eq!(&dialog.remote_sdp().unwrap().content[..], NEW_OFFER.as_bytes());
}

#[test]
fn test_reinvite_without_body_is_treated_as_hold() {
    let mut engine = TestEngine::with_defaults();
    let (id, invite, ok) = engine.answered_call();

    engine.deliver_request(&peer_request(&invite, &ok, Method::Invite, 2));
    let n = engine.notifications();
    match &events(&n)[0].kind {
        EventKind::Update(Some(body)) => {
            let sdp = String::from_utf8_lossy(&body.content).to_string();
            assert!(sdp.contains("0.0.0.0") || sdp.contains("a=sendonly"), "{}", sdp);
        }
        other => panic!("expected Update, got {:?}", other),
    }
    assert_eq!(engine.manager.dialog(id).unwrap().state(), UaState::UasUpdating);
}

#[test]
fn test_out_of_dialog_requests_use_default_policy() {
    let mut engine = TestEngine::with_defaults();

    engine.deliver_request(&out_of_dialog(Method::Notify, "<sip:bob@192.0.2.1>"));
    assert_eq!(codes(&engine.sent_responses()), vec![200]);

    engine.deliver_request(&out_of_dialog(Method::Extension("PING".to_string()), "<sip:bob@192.0.2.1>"));
    assert_eq!(codes(&engine.sent_responses()), vec![200]);

    engine.deliver_request(&out_of_dialog(Method::Options, "<sip:bob@192.0.2.1>"));
    assert_eq!(codes(&engine.sent_responses()), vec![501]);

    engine.deliver_request(&out_of_dialog(Method::Info, "<sip:bob@192.0.2.1>;tag=gone"));
    assert_eq!(codes(&engine.sent_responses()), vec![481]);

    assert_eq!(engine.manager.dialog_count(), 0);
    assert!(engine.notifications().is_empty());
}

#[test]
fn test_request_handler_runs_before_default_policy() {
    let mut engine = TestEngine::with_defaults();
    engine.manager.set_request_handler(|req: &Request, _rtime: Instant| {
        let from = req.from_address().ok().and_then(|a| a.uri.user);
        match (&req.method, from.as_deref()) {
            (Method::Invite, Some("mallory")) => {
                RequestDisposition::Respond(req.gen_response(403, "Forbidden", None))
            }
            (Method::Options, _) => RequestDisposition::Respond(req.gen_response(200, "OK", None)),
            _ => RequestDisposition::Default,
        }
    });

    engine.deliver_request(&out_of_dialog(Method::Options, "<sip:bob@192.0.2.1>"));
    assert_eq!(codes(&engine.sent_responses()), vec![200]);

    let mut spam = peer_invite(Some(OFFER));
    spam.headers.set(HeaderName::From, "<sip:mallory@192.0.2.66>;tag=m1");
    engine.deliver_request(&spam);
    assert_eq!(codes(&engine.sent_responses()), vec![403]);
    assert_eq!(engine.manager.dialog_count(), 0);

    let (id, _) = engine.incoming_call(Some(OFFER));
    assert_eq!(engine.manager.dialog(id).unwrap().state(), UaState::UasTrying);
}

#[test]
fn test_bodyless_update_without_local_session_is_answered_locally() {
    let mut engine = TestEngine::with_defaults();
    let (id, invite) = engine.incoming_call(None);
    engine.manager.recv_event(id, engine.event(EventKind::Connect(StatusData::new(200, "OK")))).unwrap();
    let ok = engine
        .sent_responses()
        .into_iter()
        .find(|r| r.code() == 200)
        .expect("no 200 sent");
    assert!(ok.body().is_empty());
    engine.deliver_request(&ack_for(&invite, &ok));
    engine.transport.take_sent();
    engine.notifications();
    assert_eq!(engine.manager.dialog(id).unwrap().state(), UaState::Connected);

    engine.manager.recv_event(id, engine.event(EventKind::Update(None))).unwrap();
    assert!(engine.sent().is_empty());
    assert_eq!(event_names(&engine.notifications()), vec!["Connect"]);
    assert_eq!(engine.manager.dialog(id).unwrap().state(), UaState::Connected);
}
