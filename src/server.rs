//! Server builder and accept loop.
//!
//! The [`ServerBuilder`] wires the codec registry, address discovery, and
//! observation config together, exposes the initial set of things, and
//! starts the accept loop over a bound [`Listener`]. Binding itself (and
//! so bind failures) belongs to the transport constructor; everything
//! after a successful start is non-fatal and logged.
//!
//! # Example
//!
//! ```ignore
//! use thingwire::Server;
//! use thingwire::transport::loopback;
//!
//! let (connector, listener) = loopback(16);
//! let server = Server::builder()
//!     .poll_interval(std::time::Duration::from_millis(500))
//!     .expose(lamp)
//!     .start(listener);
//!
//! // drive `connector`...
//! server.wait_for_shutdown().await;
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, Semaphore};

use crate::codec::CodecRegistry;
use crate::observe::{ObservationManager, ObserveConfig};
use crate::registry::{AddressDiscovery, StaticAddresses, ThingRegistry};
use crate::router::ResourceRouter;
use crate::thing::ExposedThing;
use crate::transport::Listener;

/// Default maximum concurrently handled exchanges.
pub const DEFAULT_MAX_CONCURRENT_EXCHANGES: usize = 256;

/// Server tuning knobs.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Exchanges handled concurrently; beyond this, inbound requests are
    /// dropped with a warning.
    pub max_concurrent_exchanges: usize,
    /// Observation settings.
    pub observe: ObserveConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_exchanges: DEFAULT_MAX_CONCURRENT_EXCHANGES,
            observe: ObserveConfig::default(),
        }
    }
}

/// Builder for configuring and starting a thing server.
pub struct ServerBuilder {
    config: ServerConfig,
    codecs: CodecRegistry,
    discovery: Arc<dyn AddressDiscovery>,
    things: Vec<ExposedThing>,
}

impl ServerBuilder {
    /// Create a builder with default codecs and a localhost address.
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
            codecs: CodecRegistry::new(),
            discovery: Arc::new(StaticAddresses(vec!["localhost:5683".to_string()])),
            things: Vec::new(),
        }
    }

    /// Set the property polling cadence.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.observe.poll_interval = interval;
        self
    }

    /// Set the concurrent exchange cap.
    pub fn max_concurrent_exchanges(mut self, limit: usize) -> Self {
        self.config.max_concurrent_exchanges = limit;
        self
    }

    /// Replace the codec registry.
    pub fn codecs(mut self, codecs: CodecRegistry) -> Self {
        self.codecs = codecs;
        self
    }

    /// Set the address discovery source used for forms and listings.
    pub fn discovery(mut self, discovery: Arc<dyn AddressDiscovery>) -> Self {
        self.discovery = discovery;
        self
    }

    /// Expose a thing when the server starts.
    pub fn expose(mut self, thing: ExposedThing) -> Self {
        self.things.push(thing);
        self
    }

    /// Start the accept loop over a bound listener.
    pub fn start<L: Listener>(self, listener: L) -> Server {
        Server::start(self, listener)
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A running thing server.
pub struct Server {
    registry: Arc<ThingRegistry>,
    observations: Arc<ObservationManager>,
    shutdown_rx: oneshot::Receiver<()>,
}

impl Server {
    /// Create a server builder.
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    fn start<L: Listener>(builder: ServerBuilder, mut listener: L) -> Server {
        let codecs = Arc::new(builder.codecs);
        let offered = codecs.offered().iter().map(|s| s.to_string()).collect();
        let registry = Arc::new(ThingRegistry::new(builder.discovery, offered));
        let observations = Arc::new(ObservationManager::new(
            builder.config.observe.clone(),
            Arc::clone(&codecs),
        ));

        for thing in builder.things {
            registry.expose(thing);
        }

        let router = Arc::new(ResourceRouter::new(
            Arc::clone(&registry),
            codecs,
            Arc::clone(&observations),
        ));
        let semaphore = Arc::new(Semaphore::new(builder.config.max_concurrent_exchanges));

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok(Some(exchange)) => {
                        let permit = match semaphore.clone().try_acquire_owned() {
                            Ok(permit) => permit,
                            Err(_) => {
                                tracing::warn!(
                                    path = %exchange.request.path,
                                    "exchange capacity reached, dropping request"
                                );
                                continue;
                            }
                        };
                        let router = Arc::clone(&router);
                        tokio::spawn(async move {
                            // Permit is held until this exchange completes.
                            let _permit = permit;
                            router.handle(exchange).await;
                        });
                    }
                    Ok(None) => break,
                    Err(err) => {
                        tracing::error!(%err, "accept loop error");
                        break;
                    }
                }
            }
            let _ = shutdown_tx.send(());
        });

        Server {
            registry,
            observations,
            shutdown_rx,
        }
    }

    /// Expose another thing on a running server. Returns the assigned
    /// slug.
    pub fn expose(&self, thing: ExposedThing) -> String {
        self.registry.expose(thing)
    }

    /// Remove the thing with the given id and terminate every
    /// subscription on it. Returns whether a removal occurred.
    pub fn destroy(&self, thing_id: &str) -> bool {
        match self.registry.destroy(thing_id) {
            Some(slug) => {
                let reaped = self.observations.terminate_thing(&slug);
                if reaped > 0 {
                    tracing::debug!(slug = %slug, reaped, "terminated subscriptions of destroyed thing");
                }
                true
            }
            None => false,
        }
    }

    /// All registered things as fully qualified URIs.
    pub fn list(&self) -> Vec<String> {
        self.registry.list()
    }

    /// The registry behind this server.
    pub fn registry(&self) -> &Arc<ThingRegistry> {
        &self.registry
    }

    /// The observation manager behind this server.
    pub fn observations(&self) -> &Arc<ObservationManager> {
        &self.observations
    }

    /// Block until the transport shuts down, then terminate all remaining
    /// subscriptions.
    pub async fn wait_for_shutdown(self) {
        let _ = self.shutdown_rx.await;
        self.observations.terminate_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::StateMap;
    use crate::thing::PropertyAffordance;
    use crate::transport::{loopback, InboundRequest};
    use serde_json::json;

    fn lamp(id: &str, title: &str) -> ExposedThing {
        ExposedThing::new(
            id,
            title,
            Arc::new(StateMap::new().with_property("on", json!(false))),
        )
        .property("on", PropertyAffordance::default())
    }

    #[test]
    fn test_builder_configuration() {
        let builder = Server::builder()
            .poll_interval(Duration::from_millis(250))
            .max_concurrent_exchanges(8);

        assert_eq!(builder.config.observe.poll_interval, Duration::from_millis(250));
        assert_eq!(builder.config.max_concurrent_exchanges, 8);
    }

    #[test]
    fn test_builder_default() {
        let builder = ServerBuilder::default();
        assert_eq!(
            builder.config.max_concurrent_exchanges,
            DEFAULT_MAX_CONCURRENT_EXCHANGES
        );
        assert!(builder.things.is_empty());
    }

    #[tokio::test]
    async fn test_server_serves_exposed_things() {
        let (connector, listener) = loopback(4);
        let server = Server::builder().expose(lamp("urn:1", "Lamp")).start(listener);

        let mut stream = connector.send(InboundRequest::get("/")).await.unwrap();
        let frame = stream.next_frame().await.unwrap();
        let uris: Vec<String> = serde_json::from_slice(&frame.payload).unwrap();
        assert_eq!(uris.len(), 1);
        assert!(uris[0].ends_with("/lamp"));

        drop(server);
    }

    #[tokio::test]
    async fn test_expose_and_destroy_on_running_server() {
        let (_connector, listener) = loopback(4);
        let server = Server::builder().start(listener);

        let slug = server.expose(lamp("urn:1", "Lamp"));
        assert_eq!(slug, "lamp");
        assert_eq!(server.list().len(), 1);

        assert!(server.destroy("urn:1"));
        assert!(!server.destroy("urn:1"));
        assert!(server.list().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_on_transport_close() {
        let (connector, listener) = loopback(4);
        let server = Server::builder().start(listener);

        drop(connector);
        server.wait_for_shutdown().await;
    }
}
