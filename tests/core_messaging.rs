//! 主题路由器测试

mod common;

use std::sync::Arc;

use agent_testbus::{headers, Headers, HarnessError, TopicRouter};
use parking_lot::Mutex;
use serde_json::{json, Value};

type Seen = Arc<Mutex<Vec<String>>>;

fn seen() -> Seen {
    Arc::new(Mutex::new(Vec::new()))
}

#[test]
fn test_publish_reaches_only_matching_subscriptions() {
    common::setup();
    let router = TopicRouter::new();
    let all = router.watch("devices/[^/]+/all").unwrap();
    let other = router.watch("other/").unwrap();

    router.publish("devices/campus1/all", Headers::new(), json!(1), "");
    router.publish("other/topic", Headers::new(), json!(2), "");
    router.publish("devices/campus1/sub/all", Headers::new(), json!(3), "");

    let topics: Vec<String> = all.received_messages().into_iter().map(|m| m.topic).collect();
    assert_eq!(topics, vec!["devices/campus1/all"]);
    assert_eq!(other.received_count(), 1);
}

#[test]
fn test_literal_pattern_matches_as_prefix() {
    let router = TopicRouter::new();
    let achannel = router.watch("achannel").unwrap();
    let bnnel = router.watch("bnnel").unwrap();

    router.publish("achannel", Headers::new(), json!("This is stuff sent through"), "");
    router.publish("bnnel", Headers::new(), json!("Second topic"), "");
    router.publish("bnnel/foobar", Headers::new(), json!("Third message"), "");

    assert_eq!(achannel.received_count(), 1);
    assert_eq!(bnnel.received_count(), 2);
}

#[test]
fn test_empty_pattern_matches_everything() {
    let router = TopicRouter::new();
    let everything = router.watch("").unwrap();

    router.publish("a", Headers::new(), Value::Null, "");
    router.publish("b/c", Headers::new(), Value::Null, "");

    assert_eq!(everything.received_count(), 2);
}

#[test]
fn test_invalid_pattern_is_rejected() {
    let router = TopicRouter::new();

    let err = router.watch("devices/[").unwrap_err();
    assert!(matches!(err, HarnessError::InvalidPattern { ref pattern, .. } if pattern == "devices/["));
    assert_eq!(router.subscription_count(), 0);
}

#[test]
fn test_history_grows_once_per_publish() {
    let router = TopicRouter::new();

    router.publish("nobody/listens", Headers::new(), json!("x"), "");
    assert_eq!(router.message_count(), 1);

    router.watch("t").unwrap();
    router.watch("t").unwrap();
    router.watch("t").unwrap();
    router.publish("t", Headers::new(), json!("y"), "");
    assert_eq!(router.message_count(), 2);

    let sequences: Vec<u64> = router.published_messages().iter().map(|m| m.sequence).collect();
    assert_eq!(sequences, vec![1, 2]);
}

#[test]
fn test_delivery_follows_registration_order() {
    let router = TopicRouter::new();
    let order = seen();

    for name in ["first", "second", "third"] {
        let order = order.clone();
        router
            .subscribe("heartbeat", move |_, _, _, _| {
                order.lock().push(name.to_string());
                Ok(())
            })
            .unwrap();
    }

    router.publish("heartbeat", Headers::new(), Value::Null, "");

    assert_eq!(*order.lock(), vec!["first", "second", "third"]);
}

#[test]
fn test_failing_subscriber_does_not_block_others() {
    common::setup();
    let router = TopicRouter::new();
    let delivered = seen();

    let failing = router
        .subscribe("alerts", |_, _, _, _| Err(anyhow::anyhow!("boom")))
        .unwrap();
    let sink = delivered.clone();
    router
        .subscribe("alerts", move |topic, _, _, _| {
            sink.lock().push(topic.to_string());
            Ok(())
        })
        .unwrap();

    let message = router.publish("alerts/fire", Headers::new(), json!("hot"), "");

    assert_eq!(*delivered.lock(), vec!["alerts/fire"]);
    let failures = router.delivery_failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].subscription, failing.id());
    assert_eq!(failures[0].sequence, message.sequence);
    assert!(failures[0].reason.contains("boom"));
    assert!(matches!(failures[0].to_error(), HarnessError::SubscriberCallback { .. }));
}

#[test]
fn test_panicking_subscriber_is_isolated() {
    let router = TopicRouter::new();
    let delivered = seen();

    router
        .subscribe("alerts", |_, _, _, _| panic!("subscriber exploded"))
        .unwrap();
    let sink = delivered.clone();
    router
        .subscribe("alerts", move |topic, _, _, _| {
            sink.lock().push(topic.to_string());
            Ok(())
        })
        .unwrap();

    router.publish("alerts", Headers::new(), Value::Null, "");

    assert_eq!(delivered.lock().len(), 1);
    assert!(router.delivery_failures()[0].reason.contains("subscriber exploded"));
}

#[test]
fn test_callback_receives_message_fields() {
    let router = TopicRouter::new();
    let captured: Arc<Mutex<Option<(String, Headers, Value, String)>>> = Arc::new(Mutex::new(None));
    let sink = captured.clone();
    router
        .subscribe("weather", move |topic, headers, payload, bus| {
            *sink.lock() = Some((topic.to_string(), headers.clone(), payload.clone(), bus.to_string()));
            Ok(())
        })
        .unwrap();

    router.publish(
        "weather/today",
        headers([("sender", json!("station")), ("units", json!("C"))]),
        json!({"temp": 21}),
        "internal",
    );

    let (topic, headers, payload, bus) = captured.lock().clone().unwrap();
    assert_eq!(topic, "weather/today");
    assert_eq!(headers.keys().collect::<Vec<_>>(), vec!["sender", "units"]);
    assert_eq!(payload, json!({"temp": 21}));
    assert_eq!(bus, "internal");
}

#[test]
fn test_subscriber_view_reset_keeps_history() {
    let router = TopicRouter::new();
    let watcher = router.watch("t").unwrap();

    router.publish("t", Headers::new(), json!(1), "");
    assert!(router.reset_subscriber_view(watcher.id()));

    assert_eq!(watcher.received_count(), 0);
    assert_eq!(router.subscriber_view(watcher.id()), Some(Vec::new()));
    assert_eq!(router.message_count(), 1);
}

#[test]
fn test_clear_history_keeps_sequence_counter() {
    let router = TopicRouter::new();
    router.publish("t", Headers::new(), Value::Null, "");
    router.publish("t", Headers::new(), Value::Null, "");

    router.clear_history();
    let next = router.publish("t", Headers::new(), Value::Null, "");

    assert_eq!(router.message_count(), 1);
    assert_eq!(next.sequence, 3);
}

#[test]
fn test_unsubscribe_and_clear_all() {
    let router = TopicRouter::new();
    let a = router.watch("t").unwrap();
    let b = router.watch("t").unwrap();

    assert!(router.unsubscribe(a.id()));
    assert!(!router.unsubscribe(a.id()));
    router.publish("t", Headers::new(), Value::Null, "");

    assert_eq!(a.received_count(), 0);
    assert_eq!(b.received_count(), 1);

    router.clear_all();
    assert_eq!(router.subscription_count(), 0);
    assert!(router.subscriber_view(b.id()).is_none());
}

#[test]
fn test_subscriber_may_publish_reentrantly() {
    let router = Arc::new(TopicRouter::new());
    let echoes = router.watch("echo").unwrap();

    let inner = Arc::clone(&router);
    router
        .subscribe("ping", move |_, _, payload, bus| {
            inner.publish("echo", Headers::new(), payload.clone(), bus);
            Ok(())
        })
        .unwrap();

    router.publish("ping", Headers::new(), json!("hello"), "");

    assert_eq!(echoes.received_messages()[0].payload, json!("hello"));
    assert_eq!(router.message_count(), 2);
}
