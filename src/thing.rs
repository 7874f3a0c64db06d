//! Thing model - affordance metadata plus a runtime handle.
//!
//! An [`ExposedThing`] pairs the *shape* of a thing (named properties,
//! actions, and events with their flags) with the *behavior* behind it
//! (an `Arc<dyn ThingRuntime>`). The registry derives slugs, forms, and
//! description documents from the shape; the router calls the runtime.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::runtime::ThingRuntime;

/// Flags of a property affordance.
#[derive(Debug, Clone, Copy)]
pub struct PropertyAffordance {
    /// Writes are rejected before reaching the runtime.
    pub read_only: bool,
    /// Reads and observation are rejected before reaching the runtime.
    pub write_only: bool,
    /// Whether observe-register is accepted on this property.
    pub observable: bool,
}

impl Default for PropertyAffordance {
    fn default() -> Self {
        Self {
            read_only: false,
            write_only: false,
            observable: true,
        }
    }
}

impl PropertyAffordance {
    /// A readable, observable property that rejects writes.
    pub fn read_only() -> Self {
        Self {
            read_only: true,
            ..Self::default()
        }
    }

    /// A writable property that rejects reads and observation.
    pub fn write_only() -> Self {
        Self {
            write_only: true,
            observable: false,
            ..Self::default()
        }
    }
}

/// Flags of an action affordance.
#[derive(Debug, Clone, Copy, Default)]
pub struct ActionAffordance {
    /// Whether the action declares an input payload.
    pub has_input: bool,
    /// Whether the action declares an output payload.
    pub has_output: bool,
}

/// Marker for an event affordance. Events carry no flags; their data shape
/// is the runtime's business.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventAffordance;

/// A capability-bearing resource: id, title, affordances, runtime.
///
/// Affordance maps are ordered (`BTreeMap`) so description documents and
/// forms serialize deterministically.
pub struct ExposedThing {
    id: String,
    title: String,
    properties: BTreeMap<String, PropertyAffordance>,
    actions: BTreeMap<String, ActionAffordance>,
    events: BTreeMap<String, EventAffordance>,
    runtime: Arc<dyn ThingRuntime>,
}

impl ExposedThing {
    /// Create a thing with no affordances yet.
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        runtime: Arc<dyn ThingRuntime>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            properties: BTreeMap::new(),
            actions: BTreeMap::new(),
            events: BTreeMap::new(),
            runtime,
        }
    }

    /// Declare a property affordance.
    pub fn property(mut self, name: &str, affordance: PropertyAffordance) -> Self {
        self.properties.insert(name.to_string(), affordance);
        self
    }

    /// Declare an action affordance.
    pub fn action(mut self, name: &str, affordance: ActionAffordance) -> Self {
        self.actions.insert(name.to_string(), affordance);
        self
    }

    /// Declare an event affordance.
    pub fn event(mut self, name: &str) -> Self {
        self.events.insert(name.to_string(), EventAffordance);
        self
    }

    /// Stable identifier (e.g. a URN).
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Human-readable title the slug is derived from.
    pub fn title(&self) -> &str {
        &self.title
    }

    /// The capability runtime behind this thing.
    pub fn runtime(&self) -> &Arc<dyn ThingRuntime> {
        &self.runtime
    }

    /// Look up a property affordance.
    pub fn property_affordance(&self, name: &str) -> Option<&PropertyAffordance> {
        self.properties.get(name)
    }

    /// Look up an action affordance.
    pub fn action_affordance(&self, name: &str) -> Option<&ActionAffordance> {
        self.actions.get(name)
    }

    /// Look up an event affordance.
    pub fn event_affordance(&self, name: &str) -> Option<&EventAffordance> {
        self.events.get(name)
    }

    /// Declared property names in order.
    pub fn property_names(&self) -> impl Iterator<Item = &str> {
        self.properties.keys().map(String::as_str)
    }

    /// Declared action names in order.
    pub fn action_names(&self) -> impl Iterator<Item = &str> {
        self.actions.keys().map(String::as_str)
    }

    /// Declared event names in order.
    pub fn event_names(&self) -> impl Iterator<Item = &str> {
        self.events.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for ExposedThing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExposedThing")
            .field("id", &self.id)
            .field("title", &self.title)
            .field("properties", &self.properties.keys())
            .field("actions", &self.actions.keys())
            .field("events", &self.events.keys())
            .finish()
    }
}
