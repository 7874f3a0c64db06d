//! Thing runtime boundary - where capability behavior lives.
//!
//! The router and observation manager never touch property storage,
//! validation, or action execution directly; they call through
//! [`ThingRuntime`]. The trait is object-safe ([`BoxFuture`] returns) so a
//! thing can carry its runtime as `Arc<dyn ThingRuntime>`.
//!
//! [`StateMap`] is an in-memory implementation backing tests and demos:
//! plain per-property storage, closures for actions, and channel fan-out
//! for events.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::BoxFuture;

/// Failure modes of a capability call.
///
/// The router maps these onto response statuses: `NotFound` → 4.04,
/// `ReadOnly`/`BadInput` → 4.00, `Internal` → 5.00.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InteractionError {
    /// The named affordance does not exist (or no longer exists).
    #[error("no such interaction: {0}")]
    NotFound(String),

    /// Write refused by a read-only property.
    #[error("property is read-only: {0}")]
    ReadOnly(String),

    /// Input failed validation or had the wrong shape.
    #[error("invalid input: {0}")]
    BadInput(String),

    /// Unhandled failure inside the runtime.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Listener handed to [`ThingRuntime::subscribe_event`]; the runtime sends
/// each event occurrence through it.
pub type EventSink = mpsc::UnboundedSender<Value>;

/// Capability surface of one thing.
///
/// All calls are asynchronous; a slow runtime suspends only the exchange
/// (or subscription tick) that called it.
pub trait ThingRuntime: Send + Sync {
    /// Read the current value of a property.
    fn read_property(&self, name: &str) -> BoxFuture<'_, Result<Value, InteractionError>>;

    /// Write a new value to a property.
    fn write_property(
        &self,
        name: &str,
        value: Value,
    ) -> BoxFuture<'_, Result<(), InteractionError>>;

    /// Invoke an action with optional input, yielding optional output.
    fn invoke_action(
        &self,
        name: &str,
        input: Option<Value>,
    ) -> BoxFuture<'_, Result<Option<Value>, InteractionError>>;

    /// Register a listener for an event's occurrence stream.
    fn subscribe_event(
        &self,
        name: &str,
        listener: EventSink,
    ) -> BoxFuture<'_, Result<(), InteractionError>>;

    /// Drop dead listeners for an event. Idempotent: unsubscribing with no
    /// live registration is a no-op.
    fn unsubscribe_event(&self, name: &str) -> BoxFuture<'_, ()>;
}

/// Lock a mutex, recovering the guard if a panicking holder poisoned it.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Action behavior stored in a [`StateMap`].
pub type ActionFn =
    Box<dyn Fn(Option<Value>) -> Result<Option<Value>, InteractionError> + Send + Sync>;

/// In-memory [`ThingRuntime`]: property values in a map, actions as
/// closures, event listeners fanned out per event name.
#[derive(Default)]
pub struct StateMap {
    properties: Mutex<HashMap<String, Value>>,
    actions: HashMap<String, ActionFn>,
    listeners: Mutex<HashMap<String, Vec<EventSink>>>,
}

impl StateMap {
    /// Create an empty state map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a property with an initial value.
    pub fn with_property(self, name: &str, initial: Value) -> Self {
        lock(&self.properties).insert(name.to_string(), initial);
        self
    }

    /// Add an action backed by a closure.
    pub fn with_action<F>(mut self, name: &str, action: F) -> Self
    where
        F: Fn(Option<Value>) -> Result<Option<Value>, InteractionError> + Send + Sync + 'static,
    {
        self.actions.insert(name.to_string(), Box::new(action));
        self
    }

    /// Deliver an event occurrence to all live listeners of `name`.
    /// Returns how many listeners received it.
    pub fn emit_event(&self, name: &str, data: Value) -> usize {
        let mut listeners = lock(&self.listeners);
        let Some(sinks) = listeners.get_mut(name) else {
            return 0;
        };
        // Closed listeners are pruned as they are discovered.
        sinks.retain(|sink| !sink.is_closed());
        let mut delivered = 0;
        for sink in sinks.iter() {
            if sink.send(data.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Number of live listeners currently registered for `name`.
    pub fn listener_count(&self, name: &str) -> usize {
        let listeners = lock(&self.listeners);
        listeners
            .get(name)
            .map(|sinks| sinks.iter().filter(|s| !s.is_closed()).count())
            .unwrap_or(0)
    }
}

impl ThingRuntime for StateMap {
    fn read_property(&self, name: &str) -> BoxFuture<'_, Result<Value, InteractionError>> {
        let result = lock(&self.properties)
            .get(name)
            .cloned()
            .ok_or_else(|| InteractionError::NotFound(name.to_string()));
        Box::pin(async move { result })
    }

    fn write_property(
        &self,
        name: &str,
        value: Value,
    ) -> BoxFuture<'_, Result<(), InteractionError>> {
        let result = {
            let mut properties = lock(&self.properties);
            match properties.get_mut(name) {
                Some(slot) => {
                    *slot = value;
                    Ok(())
                }
                None => Err(InteractionError::NotFound(name.to_string())),
            }
        };
        Box::pin(async move { result })
    }

    fn invoke_action(
        &self,
        name: &str,
        input: Option<Value>,
    ) -> BoxFuture<'_, Result<Option<Value>, InteractionError>> {
        let result = match self.actions.get(name) {
            Some(action) => action(input),
            None => Err(InteractionError::NotFound(name.to_string())),
        };
        Box::pin(async move { result })
    }

    fn subscribe_event(
        &self,
        name: &str,
        listener: EventSink,
    ) -> BoxFuture<'_, Result<(), InteractionError>> {
        lock(&self.listeners)
            .entry(name.to_string())
            .or_default()
            .push(listener);
        Box::pin(async move { Ok(()) })
    }

    fn unsubscribe_event(&self, name: &str) -> BoxFuture<'_, ()> {
        let mut listeners = lock(&self.listeners);
        if let Some(sinks) = listeners.get_mut(name) {
            sinks.retain(|sink| !sink.is_closed());
            if sinks.is_empty() {
                listeners.remove(name);
            }
        }
        Box::pin(async move {})
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_read_write_property() {
        let runtime = StateMap::new().with_property("on", json!(false));

        assert_eq!(runtime.read_property("on").await.unwrap(), json!(false));
        runtime.write_property("on", json!(true)).await.unwrap();
        assert_eq!(runtime.read_property("on").await.unwrap(), json!(true));
    }

    #[tokio::test]
    async fn test_missing_property_is_not_found() {
        let runtime = StateMap::new();

        assert_eq!(
            runtime.read_property("nope").await.unwrap_err(),
            InteractionError::NotFound("nope".to_string())
        );
        assert_eq!(
            runtime.write_property("nope", json!(1)).await.unwrap_err(),
            InteractionError::NotFound("nope".to_string())
        );
    }

    #[tokio::test]
    async fn test_invoke_action() {
        let runtime = StateMap::new().with_action("double", |input| {
            let n = input
                .and_then(|v| v.as_i64())
                .ok_or_else(|| InteractionError::BadInput("expected integer".to_string()))?;
            Ok(Some(json!(n * 2)))
        });

        let output = runtime.invoke_action("double", Some(json!(21))).await;
        assert_eq!(output.unwrap(), Some(json!(42)));

        let err = runtime.invoke_action("double", None).await.unwrap_err();
        assert!(matches!(err, InteractionError::BadInput(_)));
    }

    #[tokio::test]
    async fn test_event_fan_out() {
        let runtime = StateMap::new();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();

        runtime.subscribe_event("overheated", tx_a).await.unwrap();
        runtime.subscribe_event("overheated", tx_b).await.unwrap();

        assert_eq!(runtime.emit_event("overheated", json!(105)), 2);
        assert_eq!(rx_a.recv().await.unwrap(), json!(105));
        assert_eq!(rx_b.recv().await.unwrap(), json!(105));
    }

    #[tokio::test]
    async fn test_unsubscribe_prunes_only_dead_listeners() {
        let runtime = StateMap::new();
        let (tx_a, rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();

        runtime.subscribe_event("overheated", tx_a).await.unwrap();
        runtime.subscribe_event("overheated", tx_b).await.unwrap();

        drop(rx_a);
        runtime.unsubscribe_event("overheated").await;
        assert_eq!(runtime.listener_count("overheated"), 1);

        assert_eq!(runtime.emit_event("overheated", json!(1)), 1);
        assert_eq!(rx_b.recv().await.unwrap(), json!(1));
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent() {
        let runtime = StateMap::new();
        runtime.unsubscribe_event("ghost").await;
        runtime.unsubscribe_event("ghost").await;
        assert_eq!(runtime.listener_count("ghost"), 0);
    }

    #[tokio::test]
    async fn test_emit_without_listeners_delivers_zero() {
        let runtime = StateMap::new();
        assert_eq!(runtime.emit_event("overheated", json!(1)), 0);
    }
}
