//! Request path grammar.
//!
//! ```text
//! /                          Listing
//! /{slug}                    ThingRoot
//! /{slug}/properties/{name}  Property
//! /{slug}/actions/{name}     Action
//! /{slug}/events/{name}      Event
//! ```
//!
//! Anything else parses to [`ResourcePath::Invalid`], which the router
//! answers with NotFound. Parsing is a total function over the path
//! string; no positional indexing leaks out of this module.

/// A parsed resource reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourcePath {
    /// `GET /` - all registered things.
    Listing,
    /// The thing's description document.
    ThingRoot { slug: String },
    /// A named property affordance.
    Property { slug: String, name: String },
    /// A named action affordance.
    Action { slug: String, name: String },
    /// A named event affordance.
    Event { slug: String, name: String },
    /// No rule of the grammar matched.
    Invalid,
}

impl ResourcePath {
    /// Parse a request path.
    pub fn parse(path: &str) -> Self {
        let trimmed = path.strip_prefix('/').unwrap_or(path);
        if trimmed.is_empty() {
            return ResourcePath::Listing;
        }

        let mut segments = trimmed.split('/');
        let slug = match segments.next() {
            Some(slug) if !slug.is_empty() => slug.to_string(),
            _ => return ResourcePath::Invalid,
        };

        let category = match segments.next() {
            None => return ResourcePath::ThingRoot { slug },
            Some(category) => category,
        };

        let name = match segments.next() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => return ResourcePath::Invalid,
        };

        if segments.next().is_some() {
            return ResourcePath::Invalid;
        }

        match category {
            "properties" => ResourcePath::Property { slug, name },
            "actions" => ResourcePath::Action { slug, name },
            "events" => ResourcePath::Event { slug, name },
            _ => ResourcePath::Invalid,
        }
    }

    /// The slug component, when the path names a thing.
    pub fn slug(&self) -> Option<&str> {
        match self {
            ResourcePath::ThingRoot { slug }
            | ResourcePath::Property { slug, .. }
            | ResourcePath::Action { slug, .. }
            | ResourcePath::Event { slug, .. } => Some(slug),
            _ => None,
        }
    }
}
