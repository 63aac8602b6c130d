use std::sync::{Arc, Mutex};
use std::time::Duration;

use muppet_peer::{
    connect, connect_with_config, ChannelConfig, ChannelError, ChannelListeners, ChannelRegistry,
    ChannelState, MemoryNetwork, PeerChannel, Role, StateCallback,
};
use muppet_proto::MuppetMessage;
use muppet_signal::MemoryRelay;
use serde_json::{json, Value};

const ROOM: &str = "session-1:ui";

fn config(client: &str) -> ChannelConfig {
    ChannelConfig::new(client, "http://relay.test")
}

async fn wait_until(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::timeout(Duration::from_secs(2), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    });
    if deadline.await.is_err() {
        panic!("timed out waiting for {what}");
    }
}

/// Connect `left` first and `right` second, and wait for both to open.
async fn open_pair(relay: &MemoryRelay, network: &MemoryNetwork) -> (PeerChannel, PeerChannel) {
    let left = connect(relay, Arc::new(network.clone()), ROOM, &config("left"))
        .await
        .expect("left should connect");
    wait_until("left to create the room", || relay.room_size(ROOM) == 1).await;

    let right = connect(relay, Arc::new(network.clone()), ROOM, &config("right"))
        .await
        .expect("right should connect");
    wait_until("both channels to open", || left.is_open() && right.is_open()).await;
    (left, right)
}

type Recorded = Arc<Mutex<Vec<MuppetMessage>>>;

fn recorder() -> (
    Recorded,
    impl Fn(&PeerChannel, &MuppetMessage) + Send + Sync + 'static,
) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    (seen, move |_: &PeerChannel, msg: &MuppetMessage| {
        sink.lock().unwrap().push(msg.clone())
    })
}

#[tokio::test]
async fn first_joiner_creates_and_second_answers() {
    let relay = MemoryRelay::new();
    let network = MemoryNetwork::new();
    let (left, right) = open_pair(&relay, &network).await;

    assert_eq!(left.role(), Some(Role::Creator));
    assert_eq!(right.role(), Some(Role::Joiner));
    assert_eq!(network.data_channels_created(), 1);
    assert_eq!(left.room(), ROOM);
    assert_eq!(relay.participant_count(), 2);
}

#[tokio::test]
async fn roles_follow_join_order_not_client_name() {
    let relay = MemoryRelay::new();
    let network = MemoryNetwork::new();

    let right = connect(&relay, Arc::new(network.clone()), ROOM, &config("right"))
        .await
        .unwrap();
    wait_until("right to create the room", || relay.room_size(ROOM) == 1).await;
    let left = connect(&relay, Arc::new(network.clone()), ROOM, &config("left"))
        .await
        .unwrap();
    wait_until("both channels to open", || left.is_open() && right.is_open()).await;

    assert_eq!(right.role(), Some(Role::Creator));
    assert_eq!(left.role(), Some(Role::Joiner));
    assert_eq!(network.data_channels_created(), 1);
}

#[tokio::test]
async fn queued_messages_collapse_to_latest_per_class() {
    let relay = MemoryRelay::new();
    let network = MemoryNetwork::new();

    let left = connect(&relay, Arc::new(network.clone()), ROOM, &config("left"))
        .await
        .unwrap();
    assert!(!left.send_to("STATE", json!({"state": "A"}), "right", None));
    assert!(!left.send_to("STATE", json!({"state": "B"}), "right", None));
    assert!(!left.send("DONE", Value::Null));
    assert_eq!(left.queued_messages(), 2);

    wait_until("left to create the room", || relay.room_size(ROOM) == 1).await;
    let right = connect(&relay, Arc::new(network.clone()), ROOM, &config("right"))
        .await
        .unwrap();
    let (states, on_state) = recorder();
    right.on("left.STATE", on_state);
    let (done, on_done) = recorder();
    right.on("left.DONE", on_done);

    wait_until("queued messages to arrive", || !done.lock().unwrap().is_empty()).await;
    let states = states.lock().unwrap();
    assert_eq!(states.len(), 1);
    assert_eq!(states[0].event["state"], "B");
    assert_eq!(left.queued_messages(), 0);
}

#[tokio::test]
async fn broadcasts_reach_matching_listeners_in_order() {
    let relay = MemoryRelay::new();
    let (left, right) = open_pair(&relay, &MemoryNetwork::new()).await;

    let order = Arc::new(Mutex::new(Vec::new()));
    for (class, tag) in [("*", "wild-1"), ("*", "wild-2"), ("left.CLICK", "click")] {
        let order = order.clone();
        right.on(class, move |_, _| order.lock().unwrap().push(tag));
    }

    assert!(left.send("CLICK", json!({"x": 1})));
    wait_until("fan-out", || order.lock().unwrap().len() == 3).await;
    assert_eq!(*order.lock().unwrap(), vec!["wild-1", "wild-2", "click"]);

    assert!(left.send("SCROLL", json!({})));
    wait_until("wildcard-only fan-out", || order.lock().unwrap().len() == 5).await;
}

#[tokio::test]
async fn request_resolves_with_correlated_response() {
    let relay = MemoryRelay::new();
    let (left, right) = open_pair(&relay, &MemoryNetwork::new()).await;

    right.on("left.GET_STATE", |ch, msg| {
        ch.respond(msg, "STATE", json!({"value": 42}));
    });
    let (broadcasts, on_any) = recorder();
    left.on("*", on_any);

    let response = left
        .request("GET_STATE", json!({}), "right")
        .await
        .expect("request should resolve");

    assert_eq!(response.event_class, "right.STATE");
    assert_eq!(response.event["value"], 42);
    assert!(response.request_id.is_some());
    assert!(broadcasts.lock().unwrap().is_empty());
    assert_eq!(left.pending_requests(), 0);
}

#[tokio::test]
async fn unrelated_broadcast_does_not_resolve_request() {
    let relay = MemoryRelay::new();
    let (left, right) = open_pair(&relay, &MemoryNetwork::new()).await;

    right.on("left.SLOW", |ch, msg| {
        ch.send("NOISE", json!({}));
        ch.respond(msg, "SLOW_DONE", json!("ok"));
    });
    let (noise, on_noise) = recorder();
    left.on("right.NOISE", on_noise);

    let response = left
        .request_with_timeout("SLOW", json!({}), "right", Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(response.event, json!("ok"));
    assert_eq!(noise.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn request_times_out_and_late_response_is_a_broadcast() {
    let relay = MemoryRelay::new();
    let (left, right) = open_pair(&relay, &MemoryNetwork::new()).await;

    let (requests, on_request) = recorder();
    right.on("left.IGNORED", on_request);
    let (late, on_late) = recorder();
    left.on("*", on_late);

    let err = left
        .request_with_timeout("IGNORED", json!({}), "right", Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(matches!(err, ChannelError::RequestTimeout(_)));
    assert_eq!(left.pending_requests(), 0);

    wait_until("request to reach right", || !requests.lock().unwrap().is_empty()).await;
    let request = requests.lock().unwrap()[0].clone();
    assert!(right.respond(&request, "TOO_LATE", json!({})));

    wait_until("late response dispatch", || !late.lock().unwrap().is_empty()).await;
    assert_eq!(late.lock().unwrap()[0].event_class, "right.TOO_LATE");
}

#[tokio::test]
async fn request_before_open_fails_fast() {
    let relay = MemoryRelay::new();
    let left = connect(&relay, Arc::new(MemoryNetwork::new()), ROOM, &config("left"))
        .await
        .unwrap();

    let err = left.request("GET", json!({}), "right").await.unwrap_err();
    assert!(matches!(err, ChannelError::NotOpen(_)));
    assert_eq!(left.queued_messages(), 0);
}

#[tokio::test]
async fn close_is_idempotent_and_reaches_the_peer() {
    let relay = MemoryRelay::new();
    let (left, right) = open_pair(&relay, &MemoryNetwork::new()).await;

    left.close();
    left.close();
    assert_eq!(left.state(), ChannelState::Closed);
    assert!(!left.send("AFTER", json!({})));

    wait_until("right to observe the close", || !right.is_open()).await;
    wait_until("relay to drop left", || relay.room_size(ROOM) <= 1).await;
}

#[tokio::test]
async fn close_rejects_outstanding_requests() {
    let relay = MemoryRelay::new();
    let (left, _right) = open_pair(&relay, &MemoryNetwork::new()).await;

    let requester = left.clone();
    let pending = tokio::spawn(async move {
        requester
            .request_with_timeout("NEVER", json!({}), "right", Duration::from_secs(30))
            .await
    });
    wait_until("request registration", || left.pending_requests() == 1).await;

    left.close();
    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(err, ChannelError::Closed));
}

#[tokio::test]
async fn third_participant_never_opens() {
    let relay = MemoryRelay::new();
    let network = MemoryNetwork::new();
    let (_left, _right) = open_pair(&relay, &network).await;

    let extra = connect(&relay, Arc::new(network.clone()), ROOM, &config("extra"))
        .await
        .expect("connect returns the handle even when the room is full");
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(!extra.is_open());
    assert_eq!(extra.role(), None);
    assert_eq!(relay.room_size(ROOM), 2);
    assert_eq!(network.data_channels_created(), 1);
}

#[tokio::test]
async fn unreachable_relay_is_a_signal_error() {
    let relay = MemoryRelay::new();
    relay.set_unreachable(true);
    let err = connect(&relay, Arc::new(MemoryNetwork::new()), ROOM, &config("left"))
        .await
        .unwrap_err();
    assert!(matches!(err, ChannelError::Signal(_)));
}

#[tokio::test]
async fn state_callback_reports_open() {
    let relay = MemoryRelay::new();
    let network = MemoryNetwork::new();
    let states = Arc::new(Mutex::new(Vec::new()));
    let sink = states.clone();
    let callback: StateCallback = Arc::new(move |state| sink.lock().unwrap().push(state));

    let left = connect_with_config(
        &relay,
        Arc::new(network.clone()),
        ROOM,
        &config("left"),
        Some(callback),
    )
    .await
    .unwrap();
    wait_until("room creation", || relay.room_size(ROOM) == 1).await;
    let _right = connect(&relay, Arc::new(network), ROOM, &config("right"))
        .await
        .unwrap();

    wait_until("open notification", || {
        states.lock().unwrap().contains(&ChannelState::Open)
    })
    .await;
    assert!(left.is_open());
}

#[tokio::test]
async fn registries_pair_channels_by_session_and_name() {
    let relay = MemoryRelay::new();
    let network = MemoryNetwork::new();
    let left = ChannelRegistry::new(relay.clone(), network.clone(), config("left"));
    let right = ChannelRegistry::new(relay.clone(), network, config("right"));

    let (pings, on_ping) = recorder();
    let left_channels = left
        .connect_all(
            "s1",
            vec![
                ("state".to_string(), ChannelListeners::new()),
                ("chat".to_string(), ChannelListeners::new()),
            ],
        )
        .await
        .unwrap();
    wait_until("rooms to be created", || {
        relay.room_size("s1:state") == 1 && relay.room_size("s1:chat") == 1
    })
    .await;
    let right_channels = right
        .connect_all(
            "s1",
            vec![("chat".to_string(), ChannelListeners::new().on("left.PING", on_ping))],
        )
        .await
        .unwrap();

    let left_chat = left_channels["chat"].clone();
    let right_chat = right_channels["chat"].clone();
    wait_until("chat channels to open", || left_chat.is_open() && right_chat.is_open()).await;
    assert!(!left_channels["state"].is_open());

    assert!(left_chat.send("PING", json!({})));
    wait_until("ping delivery", || pings.lock().unwrap().len() == 1).await;

    left.close_all().await;
    right.close_all().await;
    assert!(!left_chat.is_open());
}
