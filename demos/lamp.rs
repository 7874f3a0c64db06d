//! Lamp - a thing server driven over the loopback transport.
//!
//! This demo demonstrates:
//! - Exposing a thing with a writable property, an action, and an event
//! - One-shot reads/writes through the router
//! - A property observation and an event observation side by side
//!
//! Run with:
//!
//! ```sh
//! cargo run --example lamp
//! ```

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde_json::json;
use thingwire::runtime::{InteractionError, StateMap};
use thingwire::thing::{ActionAffordance, PropertyAffordance};
use thingwire::transport::{loopback, InboundRequest};
use thingwire::{ExposedThing, Server};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "thingwire=debug".into()),
        )
        .init();

    let runtime = Arc::new(
        StateMap::new()
            .with_property("on", json!(false))
            .with_action("toggle", |_input| {
                // A real device would flip its relay here.
                Ok(Some(json!("toggled")))
            })
            .with_action("dim", |input| {
                let level = input
                    .and_then(|v| v.as_u64())
                    .ok_or_else(|| InteractionError::BadInput("expected 0-100".to_string()))?;
                Ok(Some(json!(level.min(100))))
            }),
    );

    let lamp = ExposedThing::new("urn:dev:ops:lamp-1", "Lamp", runtime.clone())
        .property("on", PropertyAffordance::default())
        .action(
            "toggle",
            ActionAffordance {
                has_input: false,
                has_output: true,
            },
        )
        .action(
            "dim",
            ActionAffordance {
                has_input: true,
                has_output: true,
            },
        )
        .event("overheated");

    let (connector, listener) = loopback(16);
    let server = Server::builder()
        .poll_interval(Duration::from_millis(500))
        .expose(lamp)
        .start(listener);

    println!("things: {:?}", server.list());

    // One-shot read.
    let mut read = connector
        .send(InboundRequest::get("/lamp/properties/on"))
        .await
        .expect("send");
    let frame = read.next_frame().await.expect("response");
    println!(
        "GET /lamp/properties/on -> {:?} {}",
        frame.status,
        String::from_utf8_lossy(&frame.payload)
    );

    // Turn it on.
    let mut write = connector
        .send(InboundRequest::put(
            "/lamp/properties/on",
            Bytes::from_static(b"true"),
        ))
        .await
        .expect("send");
    let frame = write.next_frame().await.expect("response");
    println!("PUT /lamp/properties/on true -> {:?}", frame.status);

    // Invoke an action.
    let mut invoke = connector
        .send(InboundRequest::post(
            "/lamp/actions/dim",
            Bytes::from_static(b"80"),
        ))
        .await
        .expect("send");
    let frame = invoke.next_frame().await.expect("response");
    println!(
        "POST /lamp/actions/dim 80 -> {:?} {}",
        frame.status,
        String::from_utf8_lossy(&frame.payload)
    );

    // Observe the property: a notification every poll interval.
    let mut observed = connector
        .send(InboundRequest::get("/lamp/properties/on").observe_register())
        .await
        .expect("send");
    for _ in 0..3 {
        let frame = observed.next_frame().await.expect("notification");
        println!(
            "  property notification seq={:?} payload={}",
            frame.observe_seq(),
            String::from_utf8_lossy(&frame.payload)
        );
    }

    // Observe the event and trigger it from the runtime side.
    let mut events = connector
        .send(InboundRequest::get("/lamp/events/overheated").observe_register())
        .await
        .expect("send");
    let ack = events.next_frame().await.expect("ack");
    assert!(ack.status.is_none());
    tokio::time::sleep(Duration::from_millis(50)).await;

    runtime.emit_event("overheated", json!({"temperature": 105}));
    let frame = events.next_frame().await.expect("notification");
    println!(
        "  event notification seq={:?} payload={}",
        frame.observe_seq(),
        String::from_utf8_lossy(&frame.payload)
    );

    // Disconnect both observers and shut down.
    observed.disconnect();
    events.disconnect();
    drop(connector);
    server.wait_for_shutdown().await;
    println!("done");
}
