use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use wsmux::testing::{Script, ScriptedConnector, ScriptedLink};
use wsmux::{Client, Notice, ReconnectConfig, Subscription, TransportConfig};

fn config(interval_secs: u64, max_attempts: u32) -> TransportConfig {
    TransportConfig {
        reconnect: ReconnectConfig::new(Duration::from_secs(interval_secs), max_attempts),
        ..Default::default()
    }
}

fn start(
    fallback: Script,
    interval_secs: u64,
    max_attempts: u32,
) -> (
    Client,
    ScriptedConnector,
    tokio::sync::mpsc::UnboundedReceiver<ScriptedLink>,
) {
    let (connector, links) = ScriptedConnector::new(fallback);
    let (client, _driver) = Client::spawn(
        config(interval_secs, max_attempts),
        Arc::new(connector.clone()),
    )
    .unwrap();
    (client, connector, links)
}

async fn wait_for_notice(notices: &mut Subscription<Notice>, wanted: impl Fn(&Notice) -> bool) -> Notice {
    loop {
        let notice = notices.recv().await.expect("notice stream ended");
        if wanted(&notice) {
            return notice;
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_connect_and_receive_greeting() {
    let (client, _connector, mut links) = start(Script::Open, 5, 3);
    let mut status = client.status_changes();
    let mut greetings = client.on("greeting");

    client.connect("ws://host/sess").unwrap();
    let link = links.recv().await.unwrap();
    assert_eq!(link.endpoint().as_str(), "ws://host/sess");
    assert_eq!(status.recv().await, Some(true));

    link.push(r#"{"tag":"greeting","message":{"n":1}}"#);
    assert_eq!(greetings.recv().await, Some(json!({"n": 1})));
    assert!(client.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_schedule_against_unreachable_endpoint() {
    let (client, connector, mut links) = start(Script::Refuse, 5, 3);
    connector.script([Script::Open]);
    let mut status = client.status_changes();
    let mut notices = client.notices();

    client.connect("ws://host/sess").unwrap();
    let link = links.recv().await.unwrap();
    assert_eq!(status.recv().await, Some(true));

    let dropped_at = Instant::now();
    link.fail("network unreachable");
    assert_eq!(status.recv().await, Some(false));

    let exhausted = wait_for_notice(&mut notices, |notice| {
        matches!(notice, Notice::ReconnectExhausted { .. })
    })
    .await;
    assert_eq!(exhausted, Notice::ReconnectExhausted { attempts: 3 });

    sleep(Duration::from_secs(60)).await;

    let offsets: Vec<u64> = connector.dials()[1..]
        .iter()
        .map(|dial| (dial.at - dropped_at).as_secs())
        .collect();
    assert_eq!(offsets, vec![5, 10, 15]);
    assert_eq!(status.try_recv(), None);
    assert!(!client.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_stops_once_open() {
    let (client, connector, mut links) = start(Script::Refuse, 5, 10);
    connector.script([Script::Open, Script::Refuse, Script::Open]);
    let mut status = client.status_changes();

    client.connect("ws://host/sess").unwrap();
    let first = links.recv().await.unwrap();
    assert_eq!(status.recv().await, Some(true));

    first.close(Some(1006), Some("abnormal"));
    assert_eq!(status.recv().await, Some(false));

    let mut second = links.recv().await.unwrap();
    assert_eq!(status.recv().await, Some(true));
    assert_eq!(connector.dial_count(), 3);

    sleep(Duration::from_secs(120)).await;
    assert_eq!(connector.dial_count(), 3);

    client.send("auth", &json!({"user_name": "bob"}));
    let frame: Value = serde_json::from_str(&second.next_sent().await.unwrap()).unwrap();
    assert_eq!(frame, json!({"tag": "auth", "message": {"user_name": "bob"}}));
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_suppresses_reconnect() {
    let (client, connector, mut links) = start(Script::Open, 5, 3);
    let mut status = client.status_changes();

    client.connect("ws://host/sess").unwrap();
    let link = links.recv().await.unwrap();
    assert_eq!(status.recv().await, Some(true));

    client.disconnect();
    assert_eq!(status.recv().await, Some(false));

    sleep(Duration::from_secs(60)).await;
    assert_eq!(connector.dial_count(), 1);
    assert!(link.is_discarded());
    assert!(!client.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_send_while_disconnected_is_dropped_with_notice() {
    let (client, _connector, mut links) = start(Script::Open, 5, 3);
    let mut notices = client.notices();

    client.send("auth", &json!({"user_name": "bob"}));
    match notices.recv().await {
        Some(Notice::SendDropped { tag, .. }) => assert_eq!(tag, "auth"),
        other => panic!("unexpected notice {other:?}"),
    }

    client.connect("ws://host/sess").unwrap();
    let mut link = links.recv().await.unwrap();
    assert!(client.wait_connected().await);

    client.send("move", &json!({"x": 1}));
    let frame: Value = serde_json::from_str(&link.next_sent().await.unwrap()).unwrap();
    assert_eq!(frame, json!({"tag": "move", "message": {"x": 1}}));
    assert!(link.sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_manual_connect_replaces_socket() {
    let (client, connector, mut links) = start(Script::Open, 5, 3);
    let mut greetings = client.on("greeting");

    client.connect("ws://first/sess").unwrap();
    let first = links.recv().await.unwrap();
    client.connect("ws://second/sess").unwrap();
    let second = links.recv().await.unwrap();
    assert_eq!(second.endpoint().as_str(), "ws://second/sess");

    sleep(Duration::from_millis(1)).await;
    assert!(first.is_discarded());
    assert!(!second.is_discarded());

    first.push(r#"{"tag":"greeting","message":"stale"}"#);
    second.push(r#"{"tag":"greeting","message":"fresh"}"#);
    assert_eq!(greetings.recv().await, Some(json!("fresh")));
    assert_eq!(connector.dial_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_error_envelopes_reach_error_stream_only() {
    let (client, _connector, mut links) = start(Script::Open, 5, 3);
    let mut auth_errors = client.on("auth-error");
    let mut errors = client.on_error();

    client.connect("ws://host/sess").unwrap();
    let link = links.recv().await.unwrap();
    link.push(r#"{"tag":"auth-error","error":"wrong name admin","data":null}"#);

    let error = errors.recv().await.unwrap();
    assert_eq!(error.tag, "auth-error");
    assert_eq!(error.error, "wrong name admin");
    assert_eq!(auth_errors.try_recv(), None);
}

#[tokio::test(start_paused = true)]
async fn test_unsubscribe_leaves_other_subscribers() {
    let (client, _connector, mut links) = start(Script::Open, 5, 3);
    let first = client.on("state");
    let mut second = client.on("state");

    client.connect("ws://host/sess").unwrap();
    let link = links.recv().await.unwrap();

    first.unsubscribe();
    link.push(r#"{"tag":"state","message":{"turn":2}}"#);
    assert_eq!(second.recv().await, Some(json!({"turn": 2})));
}

#[derive(Debug, Deserialize, PartialEq)]
struct AuthOk {
    user_name: String,
    user_id: u64,
}

#[tokio::test(start_paused = true)]
async fn test_typed_subscription() {
    let (client, _connector, mut links) = start(Script::Open, 5, 3);
    let mut auth = client.on("auth-ok");

    client.connect("ws://host/sess").unwrap();
    let link = links.recv().await.unwrap();
    link.push(r#"{"tag":"auth-ok","message":{"user_name":"bob","user_id":42}}"#);

    let user: AuthOk = auth.recv_as().await.unwrap().unwrap();
    assert_eq!(
        user,
        AuthOk {
            user_name: "bob".to_string(),
            user_id: 42
        }
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_subscribe_while_connected_sees_next_frame() {
    let (client, _connector, mut links) = start(Script::Open, 5, 3);
    client.connect("ws://host/sess").unwrap();
    let link = links.recv().await.unwrap();
    assert!(client.wait_connected().await);

    for turn in 0..200 {
        let mut state = client.on("state");
        link.push(format!(r#"{{"tag":"state","message":{turn}}}"#));
        let received = tokio::time::timeout(Duration::from_secs(1), state.recv())
            .await
            .unwrap_or_else(|_| panic!("frame {turn} never reached the new subscriber"));
        assert_eq!(received, Some(json!(turn)));
    }
}

#[tokio::test(start_paused = true)]
async fn test_socket_task_ending_silently_counts_as_lost() {
    let (client, connector, mut links) = start(Script::Open, 5, 3);
    let mut status = client.status_changes();
    let mut notices = client.notices();

    client.connect("ws://host/sess").unwrap();
    let link = links.recv().await.unwrap();
    assert_eq!(status.recv().await, Some(true));

    drop(link);
    assert_eq!(status.recv().await, Some(false));
    match wait_for_notice(&mut notices, |notice| matches!(notice, Notice::ConnectionFailed { .. })).await {
        Notice::ConnectionFailed { error } => {
            assert!(error.to_string().contains("socket task ended"), "{error}")
        }
        other => panic!("unexpected notice {other:?}"),
    }
    assert!(!client.is_connected());

    let _reconnected = links.recv().await.unwrap();
    assert_eq!(status.recv().await, Some(true));
    assert_eq!(connector.dial_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_server_close_reported_once() {
    let (client, connector, mut links) = start(Script::Refuse, 5, 3);
    connector.script([Script::Open]);
    let mut notices = client.notices();

    client.connect("ws://host/sess").unwrap();
    let link = links.recv().await.unwrap();
    assert!(client.wait_connected().await);

    link.close(Some(1000), Some("bye"));
    wait_for_notice(&mut notices, |notice| matches!(notice, Notice::ConnectionFailed { .. })).await;
    wait_for_notice(&mut notices, |notice| matches!(notice, Notice::ReconnectScheduled { .. })).await;

    sleep(Duration::from_millis(1)).await;
    let extra: Vec<Notice> = std::iter::from_fn(|| notices.try_recv())
        .filter(|notice| matches!(notice, Notice::ConnectionFailed { .. }))
        .collect();
    assert!(extra.is_empty(), "{extra:?}");
}
