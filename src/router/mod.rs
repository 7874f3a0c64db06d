//! Resource router - parse, admit, dispatch, respond.
//!
//! One [`ResourceRouter::handle`] call per inbound exchange. The request
//! path is parsed into a [`ResourcePath`], the content-format admission
//! check runs *before* any registry or runtime access, and the matched
//! handler either completes the exchange through the response mapper or
//! hands the sink off to the observation manager, which then owns the
//! stream until cancellation.

mod path;

pub use path::ResourcePath;

use std::sync::Arc;

use serde_json::json;

use crate::codec::{CodecRegistry, MEDIA_TYPE_JSON, MEDIA_TYPE_TD};
use crate::observe::{ObservationManager, ResourceKey, ResourceKind, SubscriptionKey};
use crate::registry::ThingRegistry;
use crate::response::{map_outcome, Outcome};
use crate::runtime::InteractionError;
use crate::thing::ExposedThing;
use crate::transport::{
    Exchange, InboundRequest, Method, ObserveFlag, RequestOptions, ResponseSink, SinkOption,
};

/// Dispatches inbound exchanges onto things.
pub struct ResourceRouter {
    registry: Arc<ThingRegistry>,
    codecs: Arc<CodecRegistry>,
    observations: Arc<ObservationManager>,
}

impl ResourceRouter {
    /// Create a router over a registry, codec set, and observation manager.
    pub fn new(
        registry: Arc<ThingRegistry>,
        codecs: Arc<CodecRegistry>,
        observations: Arc<ObservationManager>,
    ) -> Self {
        Self {
            registry,
            codecs,
            observations,
        }
    }

    /// Handle one exchange to completion (or hand it to the observation
    /// manager). Never panics and never returns an error: every failure
    /// becomes a response status or, if the peer is gone, a log line.
    pub async fn handle(&self, exchange: Exchange) {
        let Exchange {
            stream_id,
            request,
            mut sink,
            finish,
        } = exchange;

        let path = ResourcePath::parse(&request.path);
        tracing::debug!(method = %request.method, path = %request.path, "dispatching");

        // Admission: an unsupported content-format short-circuits before
        // any thing or registry access.
        if matches!(request.method, Method::Put | Method::Post) {
            if let Some(media_type) = &request.options.content_format {
                if !self.codecs.is_supported(media_type) {
                    let outcome = Outcome::UnsupportedMediaType(format!(
                        "unsupported content-format: {}",
                        media_type
                    ));
                    respond(sink.as_mut(), outcome).await;
                    return;
                }
            }
        }

        match path {
            ResourcePath::Listing => {
                let outcome = if request.method == Method::Get {
                    self.listing_outcome()
                } else {
                    Outcome::MethodNotAllowed(format!("{} not allowed on listing", request.method))
                };
                respond(sink.as_mut(), outcome).await;
            }
            ResourcePath::ThingRoot { slug } => {
                let outcome = self.thing_root_outcome(&request, &slug);
                respond(sink.as_mut(), outcome).await;
            }
            ResourcePath::Property { slug, name } => {
                self.handle_property(stream_id, request, sink, finish, slug, name)
                    .await;
            }
            ResourcePath::Action { slug, name } => {
                let outcome = self.invoke_action(&request, &slug, &name).await;
                respond(sink.as_mut(), outcome).await;
            }
            ResourcePath::Event { slug, name } => {
                self.handle_event(stream_id, request, sink, finish, slug, name)
                    .await;
            }
            ResourcePath::Invalid => {
                let outcome = Outcome::NotFound(format!("no resource at {}", request.path));
                respond(sink.as_mut(), outcome).await;
            }
        }
    }

    /// `GET /` - all registered things as fully qualified URIs.
    fn listing_outcome(&self) -> Outcome {
        let uris = self.registry.list();
        match self.codecs.value_to_content(&json!(uris), MEDIA_TYPE_JSON) {
            Ok(content) => Outcome::Read(content),
            Err(err) => Outcome::Internal(err.to_string()),
        }
    }

    /// `GET /{slug}` - the cached description document.
    fn thing_root_outcome(&self, request: &InboundRequest, slug: &str) -> Outcome {
        let Some(description) = self.registry.description(slug) else {
            return Outcome::NotFound(format!("no thing {}", slug));
        };
        if request.method != Method::Get {
            return Outcome::MethodNotAllowed(format!(
                "{} not allowed on a thing description",
                request.method
            ));
        }
        match self.codecs.value_to_content(&description, MEDIA_TYPE_TD) {
            Ok(content) => Outcome::Read(content),
            Err(err) => Outcome::Internal(err.to_string()),
        }
    }

    async fn handle_property(
        &self,
        stream_id: u64,
        request: InboundRequest,
        mut sink: Box<dyn ResponseSink>,
        finish: crate::transport::FinishSignal,
        slug: String,
        name: String,
    ) {
        let Some(thing) = self.registry.lookup(&slug) else {
            respond(sink.as_mut(), Outcome::NotFound(format!("no thing {}", slug))).await;
            return;
        };
        let Some(affordance) = thing.property_affordance(&name).copied() else {
            let outcome = Outcome::NotFound(format!("no property {} on {}", name, slug));
            respond(sink.as_mut(), outcome).await;
            return;
        };

        match request.method {
            Method::Get => match request.options.observe {
                Some(ObserveFlag::Register) => {
                    if affordance.write_only || !affordance.observable {
                        let outcome =
                            Outcome::BadRequest(format!("property {} is not observable", name));
                        respond(sink.as_mut(), outcome).await;
                        return;
                    }
                    let key = SubscriptionKey {
                        resource: ResourceKey {
                            slug,
                            kind: ResourceKind::Property,
                            name,
                        },
                        stream_id,
                    };
                    let content_format = self.negotiate(&request.options);
                    self.observations
                        .register_poll(key, thing, content_format, sink, finish);
                }
                Some(ObserveFlag::Deregister) => {
                    let outcome = Outcome::NotImplemented(
                        "observe cancellation is not supported; close the stream instead"
                            .to_string(),
                    );
                    respond(sink.as_mut(), outcome).await;
                }
                None => {
                    let outcome = if affordance.write_only {
                        Outcome::BadRequest(format!("property {} is write-only", name))
                    } else {
                        self.read_property(&thing, &name, &request.options).await
                    };
                    respond(sink.as_mut(), outcome).await;
                }
            },
            Method::Put => {
                let outcome = if affordance.read_only {
                    // Rejected up front; the runtime's write capability is
                    // never reached.
                    Outcome::BadRequest(format!("property {} is read-only", name))
                } else {
                    self.write_property(&thing, &name, &request).await
                };
                respond(sink.as_mut(), outcome).await;
            }
            method => {
                let outcome =
                    Outcome::MethodNotAllowed(format!("{} not allowed on a property", method));
                respond(sink.as_mut(), outcome).await;
            }
        }
    }

    /// One-shot property read in the negotiated media type.
    async fn read_property(
        &self,
        thing: &Arc<ExposedThing>,
        name: &str,
        options: &RequestOptions,
    ) -> Outcome {
        let content_format = self.negotiate(options);
        match thing.runtime().read_property(name).await {
            Ok(value) => match self.codecs.value_to_content(&value, &content_format) {
                Ok(content) => Outcome::Read(content),
                Err(err) => Outcome::Internal(err.to_string()),
            },
            Err(err) => interaction_outcome(err),
        }
    }

    /// Deserialize and apply a property write.
    async fn write_property(
        &self,
        thing: &Arc<ExposedThing>,
        name: &str,
        request: &InboundRequest,
    ) -> Outcome {
        let media_type = request
            .options
            .content_format
            .clone()
            .unwrap_or_else(|| self.codecs.default_media_type().to_string());
        let value = match self.codecs.content_to_value(&request.payload, &media_type) {
            Ok(value) => value,
            Err(err) => return Outcome::BadRequest(err.to_string()),
        };
        match thing.runtime().write_property(name, value).await {
            Ok(()) => Outcome::Written,
            Err(err) => interaction_outcome(err),
        }
    }

    /// `POST /{slug}/actions/{name}`.
    async fn invoke_action(&self, request: &InboundRequest, slug: &str, name: &str) -> Outcome {
        let Some(thing) = self.registry.lookup(slug) else {
            return Outcome::NotFound(format!("no thing {}", slug));
        };
        if thing.action_affordance(name).is_none() {
            return Outcome::NotFound(format!("no action {} on {}", name, slug));
        }
        if request.method != Method::Post {
            return Outcome::MethodNotAllowed(format!("{} not allowed on an action", request.method));
        }

        let input = if request.payload.is_empty() {
            None
        } else {
            let media_type = request
                .options
                .content_format
                .clone()
                .unwrap_or_else(|| self.codecs.default_media_type().to_string());
            match self.codecs.content_to_value(&request.payload, &media_type) {
                Ok(value) => Some(value),
                Err(err) => return Outcome::BadRequest(err.to_string()),
            }
        };

        match thing.runtime().invoke_action(name, input).await {
            Ok(Some(output)) => {
                let content_format = self.negotiate(&request.options);
                match self.codecs.value_to_content(&output, &content_format) {
                    Ok(content) => Outcome::Invoked(Some(content)),
                    Err(err) => Outcome::Internal(err.to_string()),
                }
            }
            Ok(None) => Outcome::Invoked(None),
            Err(err) => interaction_outcome(err),
        }
    }

    async fn handle_event(
        &self,
        stream_id: u64,
        request: InboundRequest,
        mut sink: Box<dyn ResponseSink>,
        finish: crate::transport::FinishSignal,
        slug: String,
        name: String,
    ) {
        let Some(thing) = self.registry.lookup(&slug) else {
            respond(sink.as_mut(), Outcome::NotFound(format!("no thing {}", slug))).await;
            return;
        };
        if thing.event_affordance(&name).is_none() {
            let outcome = Outcome::NotFound(format!("no event {} on {}", name, slug));
            respond(sink.as_mut(), outcome).await;
            return;
        }

        if request.method != Method::Get {
            let outcome =
                Outcome::MethodNotAllowed(format!("{} not allowed on an event", request.method));
            respond(sink.as_mut(), outcome).await;
            return;
        }

        match request.options.observe {
            Some(ObserveFlag::Register) => {
                let key = SubscriptionKey {
                    resource: ResourceKey {
                        slug,
                        kind: ResourceKind::Event,
                        name,
                    },
                    stream_id,
                };
                let content_format = self.negotiate(&request.options);
                self.observations
                    .register_push(key, thing, content_format, sink, finish)
                    .await;
            }
            Some(ObserveFlag::Deregister) => {
                // The observe primitive below us cannot resume or cancel a
                // live registration; termination is finish-signal driven.
                let outcome = Outcome::NotImplemented(
                    "observe cancellation is not supported; close the stream instead".to_string(),
                );
                respond(sink.as_mut(), outcome).await;
            }
            None => {
                let outcome =
                    Outcome::BadRequest(format!("observation required to read event {}", name));
                respond(sink.as_mut(), outcome).await;
            }
        }
    }

    /// Media type for a response: the request's content-format when it is
    /// supported, the registry default otherwise.
    fn negotiate(&self, options: &RequestOptions) -> String {
        match &options.content_format {
            Some(media_type) if self.codecs.is_supported(media_type) => media_type.clone(),
            _ => self.codecs.default_media_type().to_string(),
        }
    }
}

/// Map an interaction failure onto a response outcome.
fn interaction_outcome(err: InteractionError) -> Outcome {
    match err {
        InteractionError::NotFound(name) => Outcome::NotFound(format!("no such interaction: {}", name)),
        InteractionError::ReadOnly(name) => {
            Outcome::BadRequest(format!("property is read-only: {}", name))
        }
        InteractionError::BadInput(msg) => Outcome::BadRequest(msg),
        InteractionError::Internal(msg) => Outcome::Internal(msg),
    }
}

/// Complete a one-shot exchange: map the outcome, write, end.
async fn respond(sink: &mut dyn ResponseSink, outcome: Outcome) {
    let response = map_outcome(outcome);
    if response.status.is_server_error() {
        tracing::warn!(status = %response.status, "responding with server error");
    }
    sink.set_status(response.status);
    if let Some(media_type) = response.content_format {
        sink.set_option(SinkOption::ContentFormat(media_type));
    }
    if let Err(err) = sink.write(response.payload).await {
        tracing::debug!(%err, "response write failed, peer gone");
        return;
    }
    let _ = sink.end().await;
}
