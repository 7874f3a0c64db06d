//! Thing registry - slug assignment, description forms, listing.
//!
//! The registry is the single owner of the slug → thing map. Mutation goes
//! through [`ThingRegistry::expose`] and [`ThingRegistry::destroy`] only;
//! the map itself is mutex-guarded, while concurrent expose/destroy of the
//! *same* slug remains a documented precondition of the caller, not
//! something enforced here.
//!
//! At exposure time the registry synthesizes one form descriptor (href +
//! media type + allowed operations) per affordance, per offered media
//! type, per discoverable address, and caches the resulting description
//! document for `GET /{slug}`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use serde_json::{json, Value};

use crate::thing::{ExposedThing, PropertyAffordance};

/// URI scheme used in synthesized hrefs.
const URI_SCHEME: &str = "coap";

/// Source of the addresses this server is reachable on; consumed when
/// synthesizing forms and listing entries.
pub trait AddressDiscovery: Send + Sync {
    /// All discoverable network addresses, as `host[:port]` strings.
    fn addresses(&self) -> Vec<String>;
}

/// Fixed address set, for servers with known bindings (and for tests).
pub struct StaticAddresses(pub Vec<String>);

impl AddressDiscovery for StaticAddresses {
    fn addresses(&self) -> Vec<String> {
        self.0.clone()
    }
}

/// One interaction form: where and how an affordance can be exercised.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Form {
    pub href: String,
    #[serde(rename = "contentType")]
    pub content_type: String,
    pub op: Vec<&'static str>,
}

struct RegistryEntry {
    thing: Arc<ExposedThing>,
    description: Arc<Value>,
}

/// Slug → thing map plus description/listing synthesis.
pub struct ThingRegistry {
    entries: Mutex<HashMap<String, RegistryEntry>>,
    discovery: Arc<dyn AddressDiscovery>,
    offered_media_types: Vec<String>,
}

impl ThingRegistry {
    /// Create a registry advertising the given media types in forms.
    pub fn new(discovery: Arc<dyn AddressDiscovery>, offered_media_types: Vec<String>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            discovery,
            offered_media_types,
        }
    }

    fn lock_entries(&self) -> MutexGuard<'_, HashMap<String, RegistryEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Expose a thing: derive a unique slug, synthesize its description,
    /// store it. Returns the assigned slug.
    pub fn expose(&self, thing: ExposedThing) -> String {
        let thing = Arc::new(thing);
        let mut entries = self.lock_entries();

        let base = slugify(thing.title());
        let mut slug = base.clone();
        let mut suffix = 2;
        while entries.contains_key(&slug) {
            slug = format!("{}-{}", base, suffix);
            suffix += 1;
        }

        let description = Arc::new(self.describe(&slug, &thing));
        tracing::debug!(slug = %slug, id = %thing.id(), "exposing thing");
        entries.insert(
            slug.clone(),
            RegistryEntry { thing, description },
        );
        slug
    }

    /// Remove the thing with the given id. Returns whether a removal
    /// occurred; an unknown id leaves the registry unchanged.
    pub fn destroy(&self, thing_id: &str) -> Option<String> {
        let mut entries = self.lock_entries();
        let slug = entries
            .iter()
            .find(|(_, entry)| entry.thing.id() == thing_id)
            .map(|(slug, _)| slug.clone())?;
        entries.remove(&slug);
        tracing::debug!(slug = %slug, id = %thing_id, "destroyed thing");
        Some(slug)
    }

    /// Shared handle to the thing behind a slug.
    pub fn lookup(&self, slug: &str) -> Option<Arc<ExposedThing>> {
        self.lock_entries().get(slug).map(|e| Arc::clone(&e.thing))
    }

    /// The cached description document for a slug.
    pub fn description(&self, slug: &str) -> Option<Arc<Value>> {
        self.lock_entries()
            .get(slug)
            .map(|e| Arc::clone(&e.description))
    }

    /// All registered slugs as fully qualified URIs across all
    /// discoverable addresses.
    pub fn list(&self) -> Vec<String> {
        let entries = self.lock_entries();
        let mut slugs: Vec<&String> = entries.keys().collect();
        slugs.sort();

        let mut uris = Vec::new();
        for address in self.discovery.addresses() {
            for slug in &slugs {
                uris.push(format!("{}://{}/{}", URI_SCHEME, address, slug));
            }
        }
        uris
    }

    /// Number of registered things.
    pub fn len(&self) -> usize {
        self.lock_entries().len()
    }

    /// Whether no things are registered.
    pub fn is_empty(&self) -> bool {
        self.lock_entries().is_empty()
    }

    /// Build the description document for a thing under `slug`.
    fn describe(&self, slug: &str, thing: &ExposedThing) -> Value {
        let addresses = self.discovery.addresses();

        let mut properties = serde_json::Map::new();
        for name in thing.property_names() {
            let affordance = thing
                .property_affordance(name)
                .copied()
                .unwrap_or_default();
            properties.insert(
                name.to_string(),
                json!({
                    "readOnly": affordance.read_only,
                    "writeOnly": affordance.write_only,
                    "observable": affordance.observable,
                    "forms": self.forms(&addresses, slug, "properties", name, property_ops(&affordance)),
                }),
            );
        }

        let mut actions = serde_json::Map::new();
        for name in thing.action_names() {
            let affordance = thing.action_affordance(name).copied().unwrap_or_default();
            actions.insert(
                name.to_string(),
                json!({
                    "input": affordance.has_input,
                    "output": affordance.has_output,
                    "forms": self.forms(&addresses, slug, "actions", name, vec!["invokeaction"]),
                }),
            );
        }

        let mut events = serde_json::Map::new();
        for name in thing.event_names() {
            events.insert(
                name.to_string(),
                json!({
                    "forms": self.forms(&addresses, slug, "events", name, vec!["subscribeevent"]),
                }),
            );
        }

        // Root-level forms point at the thing itself, one per address.
        let root_forms: Vec<Form> = addresses
            .iter()
            .map(|address| Form {
                href: format!("{}://{}/{}", URI_SCHEME, address, slug),
                content_type: crate::codec::MEDIA_TYPE_TD.to_string(),
                op: vec!["readallproperties"],
            })
            .collect();

        json!({
            "id": thing.id(),
            "title": thing.title(),
            "properties": Value::Object(properties),
            "actions": Value::Object(actions),
            "events": Value::Object(events),
            "forms": root_forms,
        })
    }

    /// One form per (address × offered media type) for an affordance.
    fn forms(
        &self,
        addresses: &[String],
        slug: &str,
        category: &str,
        name: &str,
        op: Vec<&'static str>,
    ) -> Vec<Form> {
        let mut forms = Vec::with_capacity(addresses.len() * self.offered_media_types.len());
        for address in addresses {
            for media_type in &self.offered_media_types {
                forms.push(Form {
                    href: format!(
                        "{}://{}/{}/{}/{}",
                        URI_SCHEME, address, slug, category, name
                    ),
                    content_type: media_type.clone(),
                    op: op.clone(),
                });
            }
        }
        forms
    }
}

/// Allowed operations for a property, filtered by its flags.
fn property_ops(affordance: &PropertyAffordance) -> Vec<&'static str> {
    let mut op = Vec::new();
    if !affordance.write_only {
        op.push("readproperty");
        if affordance.observable {
            op.push("observeproperty");
        }
    }
    if !affordance.read_only {
        op.push("writeproperty");
    }
    op
}

/// Derive a URL-safe slug from a title: lowercase alphanumerics with
/// non-alphanumeric runs collapsed to single dashes.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_dash = false;
    for ch in title.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    if slug.is_empty() {
        slug.push_str("thing");
    }
    slug
}
