//! # thingwire
//!
//! Resource router and observation state machine for CoAP-style thing
//! servers.
//!
//! A *thing* exposes three kinds of affordances: readable/writable
//! **properties**, invokable **actions**, and subscribable **events**.
//! This crate maps that capability model onto protocol method semantics
//! (GET/PUT/POST), response status codes, and an observe/cancel handshake,
//! and manages the lifecycle of many concurrent, independently cancellable
//! notification streams.
//!
//! ## Architecture
//!
//! - **Transport boundary** (`transport`): decoded requests in, response
//!   frames out, one stream per exchange with a finish/disconnect signal
//! - **Router** (`router`): path grammar + content-type admission + dispatch
//! - **Observation manager** (`observe`): per-subscription state machines
//!   for property polling and event push
//! - **Registry** (`registry`): slug → thing map, forms, listing
//!
//! ## Example
//!
//! ```ignore
//! use thingwire::{ExposedThing, Server};
//! use thingwire::runtime::StateMap;
//! use thingwire::thing::PropertyAffordance;
//! use thingwire::transport::loopback;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let runtime = Arc::new(StateMap::new().with_property("on", false.into()));
//!     let lamp = ExposedThing::new("urn:dev:lamp-1", "Lamp", runtime)
//!         .property("on", PropertyAffordance::default())
//!         .event("overheated");
//!
//!     let (connector, listener) = loopback(16);
//!     let server = Server::builder().expose(lamp).start(listener);
//!     // drive `connector` with requests...
//!     server.wait_for_shutdown().await;
//! }
//! ```

use std::future::Future;
use std::pin::Pin;

pub mod codec;
pub mod error;
pub mod observe;
pub mod registry;
pub mod response;
pub mod router;
pub mod runtime;
pub mod server;
pub mod thing;
pub mod transport;

pub use error::ThingwireError;
pub use registry::ThingRegistry;
pub use router::ResourceRouter;
pub use server::{Server, ServerBuilder};
pub use thing::ExposedThing;

/// Boxed future used by the object-safe traits at the crate's seams
/// ([`runtime::ThingRuntime`], [`transport::ResponseSink`],
/// [`transport::Listener`]).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
