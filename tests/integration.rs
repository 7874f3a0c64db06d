//! Integration tests for thingwire.
//!
//! These drive a full server over the loopback transport: router,
//! registry, observation manager, and response mapping working together.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde_json::{json, Value};

use thingwire::codec::{MEDIA_TYPE_JSON, MEDIA_TYPE_TD};
use thingwire::response::Status;
use thingwire::runtime::{InteractionError, StateMap, ThingRuntime};
use thingwire::thing::{ActionAffordance, PropertyAffordance};
use thingwire::transport::{loopback, InboundRequest, LoopbackConnector};
use thingwire::{ExposedThing, Server};

const POLL: Duration = Duration::from_millis(10);

/// A lamp with a writable `on`, a read-only `serial`, a `toggle` action,
/// and `overheated`/`flickered` events.
fn lamp(runtime: Arc<StateMap>) -> ExposedThing {
    ExposedThing::new("urn:dev:ops:lamp-1", "Lamp", runtime)
        .property("on", PropertyAffordance::default())
        .property("serial", PropertyAffordance::read_only())
        .action(
            "toggle",
            ActionAffordance {
                has_input: false,
                has_output: true,
            },
        )
        .event("overheated")
        .event("flickered")
}

fn lamp_runtime() -> Arc<StateMap> {
    Arc::new(
        StateMap::new()
            .with_property("on", json!(false))
            .with_property("serial", json!("A123"))
            .with_action("toggle", |_| Ok(Some(json!("toggled")))),
    )
}

fn start_lamp_server() -> (LoopbackConnector, Server, Arc<StateMap>) {
    let runtime = lamp_runtime();
    let (connector, listener) = loopback(16);
    let server = Server::builder()
        .poll_interval(POLL)
        .expose(lamp(runtime.clone()))
        .start(listener);
    (connector, server, runtime)
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

/// One-shot read returns Content with the serialized current value.
#[tokio::test]
async fn test_one_shot_property_read() {
    let (connector, _server, _runtime) = start_lamp_server();

    let mut stream = connector
        .send(InboundRequest::get("/lamp/properties/on"))
        .await
        .unwrap();

    let frame = stream.next_frame().await.unwrap();
    assert_eq!(frame.status, Some(Status::Content));
    assert_eq!(frame.content_format(), Some(MEDIA_TYPE_JSON));
    assert_eq!(frame.payload, Bytes::from_static(b"false"));

    let closing = stream.next_frame().await.unwrap();
    assert!(closing.last);
}

/// PUT writes through to the runtime; the follow-up read sees the value.
#[tokio::test]
async fn test_write_then_read() {
    let (connector, _server, runtime) = start_lamp_server();

    let mut put = connector
        .send(InboundRequest::put(
            "/lamp/properties/on",
            Bytes::from_static(b"true"),
        ))
        .await
        .unwrap();
    let frame = put.next_frame().await.unwrap();
    assert_eq!(frame.status, Some(Status::Changed));
    assert!(frame.payload.is_empty());

    assert_eq!(runtime.read_property("on").await.unwrap(), json!(true));

    let mut get = connector
        .send(InboundRequest::get("/lamp/properties/on"))
        .await
        .unwrap();
    let frame = get.next_frame().await.unwrap();
    assert_eq!(frame.status, Some(Status::Content));
    assert_eq!(frame.payload, Bytes::from_static(b"true"));
}

/// The description document is served with the description media type.
#[tokio::test]
async fn test_thing_description() {
    let (connector, _server, _runtime) = start_lamp_server();

    let mut stream = connector.send(InboundRequest::get("/lamp")).await.unwrap();
    let frame = stream.next_frame().await.unwrap();

    assert_eq!(frame.status, Some(Status::Content));
    assert_eq!(frame.content_format(), Some(MEDIA_TYPE_TD));

    let description: Value = serde_json::from_slice(&frame.payload).unwrap();
    assert_eq!(description["id"], "urn:dev:ops:lamp-1");
    assert_eq!(description["title"], "Lamp");
    assert!(description["properties"]["on"].is_object());
    assert!(description["events"]["overheated"].is_object());
}

/// The listing enumerates all things across discoverable addresses.
#[tokio::test]
async fn test_listing() {
    let (connector, server, _runtime) = start_lamp_server();
    server.expose(
        ExposedThing::new("urn:dev:ops:sensor-1", "Sensor", Arc::new(StateMap::new()))
            .property("level", PropertyAffordance::read_only()),
    );

    let mut stream = connector.send(InboundRequest::get("/")).await.unwrap();
    let frame = stream.next_frame().await.unwrap();

    assert_eq!(frame.status, Some(Status::Content));
    let uris: Vec<String> = serde_json::from_slice(&frame.payload).unwrap();
    assert_eq!(uris.len(), 2);
    assert!(uris.iter().any(|uri| uri.ends_with("/lamp")));
    assert!(uris.iter().any(|uri| uri.ends_with("/sensor")));
}

/// Writes to a read-only property are rejected up front.
#[tokio::test]
async fn test_read_only_property_rejects_write() {
    let (connector, _server, runtime) = start_lamp_server();

    let mut stream = connector
        .send(InboundRequest::put(
            "/lamp/properties/serial",
            Bytes::from_static(b"\"B999\""),
        ))
        .await
        .unwrap();

    let frame = stream.next_frame().await.unwrap();
    assert_eq!(frame.status, Some(Status::BadRequest));
    // The stored value is untouched.
    assert_eq!(runtime.read_property("serial").await.unwrap(), json!("A123"));
}

/// An unsupported content-format short-circuits with 4.15.
#[tokio::test]
async fn test_unsupported_media_type() {
    let (connector, _server, runtime) = start_lamp_server();

    let mut stream = connector
        .send(
            InboundRequest::put("/lamp/properties/on", Bytes::from_static(b"<on/>"))
                .content_format("text/xml"),
        )
        .await
        .unwrap();

    let frame = stream.next_frame().await.unwrap();
    assert_eq!(frame.status, Some(Status::UnsupportedMediaType));
    assert_eq!(runtime.read_property("on").await.unwrap(), json!(false));
}

/// Unknown things and affordances answer 4.04.
#[tokio::test]
async fn test_not_found() {
    let (connector, _server, _runtime) = start_lamp_server();

    for path in ["/toaster", "/lamp/properties/nope", "/lamp/a/b/c"] {
        let mut stream = connector.send(InboundRequest::get(path)).await.unwrap();
        let frame = stream.next_frame().await.unwrap();
        assert_eq!(frame.status, Some(Status::NotFound), "for {}", path);
    }
}

/// Action invocation returns serialized output with 2.05.
#[tokio::test]
async fn test_action_invoke_with_output() {
    let (connector, _server, _runtime) = start_lamp_server();

    let mut stream = connector
        .send(InboundRequest::post("/lamp/actions/toggle", Bytes::new()))
        .await
        .unwrap();

    let frame = stream.next_frame().await.unwrap();
    assert_eq!(frame.status, Some(Status::Content));
    assert_eq!(frame.payload, Bytes::from_static(b"\"toggled\""));
}

/// Action input failures map to 4.00.
#[tokio::test]
async fn test_action_bad_input() {
    let runtime = Arc::new(StateMap::new().with_action("dim", |input| {
        input
            .and_then(|v| v.as_u64())
            .map(|_| None)
            .ok_or_else(|| InteractionError::BadInput("expected integer".to_string()))
    }));
    let (connector, listener) = loopback(16);
    let _server = Server::builder()
        .expose(
            ExposedThing::new("urn:dev:ops:dimmer-1", "Dimmer", runtime)
                .action("dim", ActionAffordance::default()),
        )
        .start(listener);

    let mut stream = connector
        .send(InboundRequest::post(
            "/dimmer/actions/dim",
            Bytes::from_static(b"\"bright\""),
        ))
        .await
        .unwrap();

    let frame = stream.next_frame().await.unwrap();
    assert_eq!(frame.status, Some(Status::BadRequest));
}

/// A property observation delivers notifications with non-decreasing
/// sequence numbers at the configured cadence, and nothing after a
/// disconnect.
#[tokio::test]
async fn test_property_observation_lifecycle() {
    let (connector, server, _runtime) = start_lamp_server();

    let mut stream = connector
        .send(InboundRequest::get("/lamp/properties/on").observe_register())
        .await
        .unwrap();

    let mut last_seq = 0;
    for _ in 0..4 {
        let frame = stream.next_frame().await.unwrap();
        assert_eq!(frame.status, Some(Status::Content));
        let seq = frame.observe_seq().expect("notification carries sequence");
        assert!(seq > last_seq, "sequence must increase: {} -> {}", last_seq, seq);
        last_seq = seq;
    }

    stream.disconnect();
    wait_until(|| server.observations().active_count() == 0).await;

    // Drain anything that was in flight at disconnect time; then silence.
    while stream.try_next_frame().is_some() {}
    tokio::time::sleep(POLL * 5).await;
    assert!(stream.try_next_frame().is_none());
}

/// Event observation: ack first, then one notification per callback,
/// sequence starting at 1.
#[tokio::test]
async fn test_event_observation_push() {
    let (connector, server, runtime) = start_lamp_server();

    let mut stream = connector
        .send(InboundRequest::get("/lamp/events/overheated").observe_register())
        .await
        .unwrap();

    // The compensating empty ack precedes the listener registration.
    let ack = stream.next_frame().await.unwrap();
    assert_eq!(ack.status, None);
    assert!(ack.payload.is_empty());

    wait_until(|| runtime.listener_count("overheated") == 1).await;
    assert_eq!(runtime.emit_event("overheated", json!({"temperature": 105})), 1);

    let frame = stream.next_frame().await.unwrap();
    assert_eq!(frame.status, Some(Status::Content));
    assert_eq!(frame.observe_seq(), Some(1));
    assert_eq!(
        serde_json::from_slice::<Value>(&frame.payload).unwrap(),
        json!({"temperature": 105})
    );

    assert_eq!(server.observations().active_count(), 1);
}

/// Two event subscriptions are independent: disconnecting one leaves the
/// other's stream and sequence numbers untouched.
#[tokio::test]
async fn test_independent_event_subscriptions() {
    let (connector, server, runtime) = start_lamp_server();

    let mut stream_a = connector
        .send(InboundRequest::get("/lamp/events/overheated").observe_register())
        .await
        .unwrap();
    let ack_a = stream_a.next_frame().await.unwrap();
    assert_eq!(ack_a.status, None);
    wait_until(|| runtime.listener_count("overheated") == 1).await;

    let mut stream_b = connector
        .send(InboundRequest::get("/lamp/events/flickered").observe_register())
        .await
        .unwrap();
    let ack_b = stream_b.next_frame().await.unwrap();
    assert_eq!(ack_b.status, None);
    wait_until(|| runtime.listener_count("flickered") == 1).await;

    runtime.emit_event("flickered", json!(1));
    assert_eq!(stream_b.next_frame().await.unwrap().observe_seq(), Some(1));

    stream_a.disconnect();
    wait_until(|| server.observations().active_count() == 1).await;
    assert_eq!(runtime.listener_count("overheated"), 0);

    runtime.emit_event("flickered", json!(2));
    let frame = stream_b.next_frame().await.unwrap();
    assert_eq!(frame.observe_seq(), Some(2));
    assert_eq!(runtime.emit_event("overheated", json!(120)), 0);
}

/// Reading an event without observe is 4.00; cancelling is 5.01.
#[tokio::test]
async fn test_event_observe_edge_cases() {
    let (connector, _server, _runtime) = start_lamp_server();

    let mut plain = connector
        .send(InboundRequest::get("/lamp/events/overheated"))
        .await
        .unwrap();
    assert_eq!(
        plain.next_frame().await.unwrap().status,
        Some(Status::BadRequest)
    );

    let mut cancel = connector
        .send(InboundRequest::get("/lamp/events/overheated").observe_deregister())
        .await
        .unwrap();
    assert_eq!(
        cancel.next_frame().await.unwrap().status,
        Some(Status::NotImplemented)
    );
}

/// destroy removes exactly the thing with that id; destroying again (or
/// an unknown id) reports false and changes nothing.
#[tokio::test]
async fn test_destroy_semantics() {
    let (connector, server, _runtime) = start_lamp_server();
    server.expose(
        ExposedThing::new("urn:dev:ops:sensor-1", "Sensor", Arc::new(StateMap::new()))
            .property("level", PropertyAffordance::read_only()),
    );

    assert!(!server.destroy("urn:unknown"));
    assert_eq!(server.list().len(), 2);

    assert!(server.destroy("urn:dev:ops:lamp-1"));
    assert!(!server.destroy("urn:dev:ops:lamp-1"));

    let mut stream = connector.send(InboundRequest::get("/")).await.unwrap();
    let frame = stream.next_frame().await.unwrap();
    let uris: Vec<String> = serde_json::from_slice(&frame.payload).unwrap();
    assert_eq!(uris.len(), 1);
    assert!(uris[0].ends_with("/sensor"));

    let mut gone = connector.send(InboundRequest::get("/lamp")).await.unwrap();
    assert_eq!(gone.next_frame().await.unwrap().status, Some(Status::NotFound));
}

/// Destroying a thing reaps its live subscriptions.
#[tokio::test]
async fn test_destroy_terminates_subscriptions() {
    let (connector, server, _runtime) = start_lamp_server();

    let mut stream = connector
        .send(InboundRequest::get("/lamp/properties/on").observe_register())
        .await
        .unwrap();
    stream.next_frame().await.unwrap();
    wait_until(|| server.observations().active_count() == 1).await;

    assert!(server.destroy("urn:dev:ops:lamp-1"));
    wait_until(|| server.observations().active_count() == 0).await;
}

/// The full Lamp walkthrough: description, write, read, observe an event,
/// one callback, one notification with sequence 1.
#[tokio::test]
async fn test_lamp_end_to_end() {
    let (connector, _server, runtime) = start_lamp_server();

    let mut description = connector.send(InboundRequest::get("/lamp")).await.unwrap();
    let frame = description.next_frame().await.unwrap();
    assert_eq!(frame.status, Some(Status::Content));
    let td: Value = serde_json::from_slice(&frame.payload).unwrap();
    assert_eq!(td["title"], "Lamp");

    let mut put = connector
        .send(InboundRequest::put(
            "/lamp/properties/on",
            Bytes::from_static(b"true"),
        ))
        .await
        .unwrap();
    assert_eq!(put.next_frame().await.unwrap().status, Some(Status::Changed));

    let mut get = connector
        .send(InboundRequest::get("/lamp/properties/on"))
        .await
        .unwrap();
    let frame = get.next_frame().await.unwrap();
    assert_eq!(frame.status, Some(Status::Content));
    assert_eq!(frame.payload, Bytes::from_static(b"true"));

    let mut events = connector
        .send(InboundRequest::get("/lamp/events/overheated").observe_register())
        .await
        .unwrap();
    let ack = events.next_frame().await.unwrap();
    assert_eq!(ack.status, None);
    wait_until(|| runtime.listener_count("overheated") == 1).await;

    assert_eq!(runtime.emit_event("overheated", json!(105)), 1);
    let notification = events.next_frame().await.unwrap();
    assert_eq!(notification.status, Some(Status::Content));
    assert_eq!(notification.observe_seq(), Some(1));
    assert_eq!(notification.payload, Bytes::from_static(b"105"));

    // Exactly one notification for exactly one callback.
    tokio::time::sleep(POLL * 3).await;
    assert!(events.try_next_frame().is_none());
}
