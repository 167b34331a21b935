//! Protocol tests for a single channel driven by a scripted frontend.
//!
//! The frontend end of an in-memory pair records everything the channel
//! sends and answers by hand, so each test controls exactly when and in
//! which order callbacks arrive.

use std::cell::RefCell;
use std::rc::Rc;

use comm_bridge::{Channel, ChannelConfig, ChannelError, Envelope, MemoryEnd, QueryId, Transport};
use futures::future::join_all;
use serde_json::{Value, json};

type Inbox = Rc<RefCell<Vec<Value>>>;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn sent(seen: &Inbox) -> Vec<Envelope> {
    seen.borrow()
        .iter()
        .map(|m| Envelope::from_message(m).unwrap())
        .collect()
}

fn identifier(envelope: &Envelope) -> QueryId {
    serde_json::from_value(envelope.data["identifier"].clone()).unwrap()
}

fn callback(frontend: &MemoryEnd, data: Value) {
    frontend
        .send(json!({"command": "callback", "data": data}))
        .unwrap();
}

#[tokio::test]
async fn test_each_query_gets_its_own_reply() {
    init_tracing();
    let channel = Channel::new("w#0", ChannelConfig::default());
    let (frontend, backend) = MemoryEnd::pair("w-a");
    let seen = frontend.capture();
    channel.connect(Rc::new(backend)).unwrap();

    let payloads: Vec<Value> = (0..20).map(|n| json!({"n": n})).collect();
    let mut queries: Vec<_> = payloads.iter().map(|p| Box::pin(channel.query(p))).collect();
    for query in &mut queries {
        assert!(futures::poll!(query.as_mut()).is_pending());
    }
    assert_eq!(channel.pending_count(), 20);

    // Answer newest first, echoing each request's own payload.
    for envelope in sent(&seen).iter().rev() {
        let n = envelope.data["data"]["n"].clone();
        callback(&frontend, json!({"identifier": identifier(envelope), "value": n}));
    }

    let results = join_all(queries).await;
    for (n, result) in results.into_iter().enumerate() {
        assert_eq!(result.unwrap(), json!(n));
    }
    assert_eq!(channel.pending_count(), 0);
}

#[tokio::test]
async fn test_identifiers_are_unique_on_the_wire() {
    init_tracing();
    let channel = Channel::new("w#0", ChannelConfig::default());
    let (frontend, backend) = MemoryEnd::pair("w-a");
    let seen = frontend.capture();
    channel.connect(Rc::new(backend)).unwrap();

    let payload = json!(null);
    let mut queries: Vec<_> = (0..50).map(|_| Box::pin(channel.query(&payload))).collect();
    for query in &mut queries {
        assert!(futures::poll!(query.as_mut()).is_pending());
    }

    let mut ids: Vec<String> = sent(&seen).iter().map(|e| identifier(e).to_string()).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 50);
}

#[tokio::test]
async fn test_stray_callbacks_cause_no_cross_talk() {
    init_tracing();
    let channel = Channel::new("w#0", ChannelConfig::default());
    let (frontend, backend) = MemoryEnd::pair("w-a");
    let seen = frontend.capture();
    channel.connect(Rc::new(backend)).unwrap();

    let payload = json!("real");
    let mut query = Box::pin(channel.query(&payload));
    assert!(futures::poll!(query.as_mut()).is_pending());

    for _ in 0..5 {
        callback(&frontend, json!({"identifier": QueryId::random(), "value": "stray"}));
    }
    callback(&frontend, json!({"identifier": "not-a-token", "value": "stray"}));
    assert!(futures::poll!(query.as_mut()).is_pending());
    assert_eq!(channel.pending_count(), 1);

    let id = identifier(&sent(&seen)[0]);
    callback(&frontend, json!({"identifier": id, "value": "mine"}));
    assert_eq!(query.await.unwrap(), json!("mine"));
}

#[tokio::test]
async fn test_mixed_traffic_before_connect_keeps_issue_order() {
    init_tracing();
    let channel = Channel::new("w#0", ChannelConfig::default());
    let (first, question, last) = (json!("first"), json!("question"), json!("last"));

    let mut call_first = Box::pin(channel.send("call", &first));
    let mut query = Box::pin(channel.query(&question));
    let mut call_last = Box::pin(channel.send("call", &last));
    assert!(futures::poll!(call_first.as_mut()).is_pending());
    assert!(futures::poll!(query.as_mut()).is_pending());
    assert!(futures::poll!(call_last.as_mut()).is_pending());

    let (frontend, backend) = MemoryEnd::pair("w-a");
    let seen = frontend.capture();
    assert!(seen.borrow().is_empty());
    channel.connect(Rc::new(backend)).unwrap();

    call_first.await.unwrap();
    call_last.await.unwrap();

    let envelopes = sent(&seen);
    let actions: Vec<_> = envelopes.iter().map(|e| e.action.as_str()).collect();
    assert_eq!(actions, vec!["call", "query", "call"]);
    assert_eq!(envelopes[0].data, first);
    assert_eq!(envelopes[1].data["data"], question);
    assert_eq!(envelopes[2].data, last);

    callback(&frontend, json!({"identifier": identifier(&envelopes[1]), "value": 42}));
    assert_eq!(query.await.unwrap(), json!(42));
}

#[tokio::test]
async fn test_cancelled_query_is_never_resurrected() {
    init_tracing();
    let channel = Channel::new("w#0", ChannelConfig::default());
    let (frontend, backend) = MemoryEnd::pair("w-a");
    let seen = frontend.capture();
    channel.connect(Rc::new(backend)).unwrap();

    let payload = json!("slow");
    let mut query = Box::pin(channel.query(&payload));
    assert!(futures::poll!(query.as_mut()).is_pending());
    let id = identifier(&sent(&seen)[0]);
    drop(query);

    let cancels: Vec<_> = sent(&seen)
        .into_iter()
        .filter(|e| e.action == "cancel")
        .collect();
    assert_eq!(cancels.len(), 1);
    assert_eq!(identifier(&cancels[0]), id);

    callback(&frontend, json!({"identifier": id, "value": "late"}));
    callback(&frontend, json!({"identifier": id, "error": "late"}));
    assert_eq!(channel.pending_count(), 0);

    // The channel keeps working.
    let next = json!("next");
    let mut query = Box::pin(channel.query(&next));
    assert!(futures::poll!(query.as_mut()).is_pending());
    let next_id = identifier(sent(&seen).last().unwrap());
    assert_ne!(next_id, id);
    callback(&frontend, json!({"identifier": next_id, "value": "fresh"}));
    assert_eq!(query.await.unwrap(), json!("fresh"));
}

#[tokio::test]
async fn test_second_connect_fails_and_first_binding_survives() {
    init_tracing();
    let channel = Channel::new("w#0", ChannelConfig::default());
    let (frontend, backend) = MemoryEnd::pair("w-a");
    let seen = frontend.capture();
    channel.connect(Rc::new(backend)).unwrap();

    let (intruder, intruder_backend) = MemoryEnd::pair("w-b");
    let intruder_seen = intruder.capture();
    assert!(matches!(
        channel.connect(Rc::new(intruder_backend)),
        Err(ChannelError::AlreadyConnected { .. })
    ));

    channel.send("call", &json!({"x": 1})).await.unwrap();
    assert_eq!(seen.borrow().len(), 1);
    assert!(intruder_seen.borrow().is_empty());
}
