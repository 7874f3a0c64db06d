//! Observation manager - long-lived notification streams.
//!
//! Converts one-shot GET semantics into registrations: a property
//! observation polls the runtime on a fixed cadence (**Poll** mode), an
//! event observation relays runtime callbacks (**Push** mode). Each
//! subscription is one spawned task owning its timer or listener, tracked
//! in a map keyed by (resource, subscriber-stream) and removed on
//! termination - state lives in the map entry, not in ad hoc closures.
//!
//! # State machine
//!
//! `Init → Active → Terminated`, with `Completing` as a transient state
//! while a final notification is in flight. Termination is cooperative:
//! the transport-finish signal, an explicit [`ObservationManager::terminate`],
//! or a structural failure ends the task at its next suspension point,
//! never mid-serialization. A terminated subscription emits nothing
//! further.
//!
//! # Ordering
//!
//! The subscription task awaits each notification write before taking
//! another tick or callback, so at most one write is outstanding per
//! subscription and sequence numbers reach the transport in non-decreasing
//! order. Poll ticks that elapse while a write is in flight are skipped,
//! never queued.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;

use crate::codec::CodecRegistry;
use crate::error::Result;
use crate::response::Status;
use crate::thing::ExposedThing;
use crate::transport::{FinishSignal, ResponseSink, SinkOption};

/// Default property polling cadence.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Observation tuning knobs.
#[derive(Debug, Clone)]
pub struct ObserveConfig {
    /// Cadence of property polling in Poll mode.
    pub poll_interval: Duration,
}

impl Default for ObserveConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Which affordance kind a subscription watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Property,
    Event,
}

/// The observed resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceKey {
    pub slug: String,
    pub kind: ResourceKind,
    pub name: String,
}

/// Subscription identity: one observer stream on one resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionKey {
    pub resource: ResourceKey,
    pub stream_id: u64,
}

/// Delivery mode of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserveMode {
    /// Periodic property reads.
    Poll,
    /// Runtime event callbacks.
    Push,
}

/// Lifecycle state of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Active,
    /// A final notification is in flight; nothing follows it.
    Completing,
    Terminated,
}

struct SubscriptionEntry {
    epoch: u64,
    mode: ObserveMode,
    state: Arc<Mutex<SubscriptionState>>,
    sequence: Arc<AtomicU64>,
    cancel: Option<oneshot::Sender<()>>,
}

/// Owner of all live subscriptions.
pub struct ObservationManager {
    config: ObserveConfig,
    codecs: Arc<CodecRegistry>,
    subscriptions: Mutex<HashMap<SubscriptionKey, SubscriptionEntry>>,
    next_epoch: AtomicU64,
}

impl ObservationManager {
    /// Create a manager serializing notifications through `codecs`.
    pub fn new(config: ObserveConfig, codecs: Arc<CodecRegistry>) -> Self {
        Self {
            config,
            codecs,
            subscriptions: Mutex::new(HashMap::new()),
            next_epoch: AtomicU64::new(1),
        }
    }

    fn lock_subscriptions(&self) -> MutexGuard<'_, HashMap<SubscriptionKey, SubscriptionEntry>> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether a subscription is live for the key.
    pub fn is_active(&self, key: &SubscriptionKey) -> bool {
        self.lock_subscriptions().contains_key(key)
    }

    /// Number of live subscriptions.
    pub fn active_count(&self) -> usize {
        self.lock_subscriptions().len()
    }

    /// Last emitted sequence number for a live subscription.
    pub fn sequence(&self, key: &SubscriptionKey) -> Option<u64> {
        self.lock_subscriptions()
            .get(key)
            .map(|entry| entry.sequence.load(Ordering::Relaxed))
    }

    /// Delivery mode of a live subscription.
    pub fn mode(&self, key: &SubscriptionKey) -> Option<ObserveMode> {
        self.lock_subscriptions().get(key).map(|entry| entry.mode)
    }

    /// Terminate one subscription. Idempotent; returns whether a live
    /// subscription was found.
    pub fn terminate(&self, key: &SubscriptionKey) -> bool {
        let entry = self.lock_subscriptions().remove(key);
        match entry {
            Some(mut entry) => {
                if let Some(cancel) = entry.cancel.take() {
                    let _ = cancel.send(());
                }
                tracing::debug!(?key, "subscription terminated");
                true
            }
            None => false,
        }
    }

    /// Terminate every subscription on a thing (used when the thing is
    /// destroyed, so no timer or listener outlives it).
    pub fn terminate_thing(&self, slug: &str) -> usize {
        let keys: Vec<SubscriptionKey> = self
            .lock_subscriptions()
            .keys()
            .filter(|key| key.resource.slug == slug)
            .cloned()
            .collect();
        let mut terminated = 0;
        for key in &keys {
            if self.terminate(key) {
                terminated += 1;
            }
        }
        terminated
    }

    /// Terminate all subscriptions.
    pub fn terminate_all(&self) {
        let keys: Vec<SubscriptionKey> = self.lock_subscriptions().keys().cloned().collect();
        for key in &keys {
            self.terminate(key);
        }
    }

    /// Register a Poll-mode subscription: periodic reads of a property.
    ///
    /// The first notification is emitted immediately, then one per
    /// configured interval. Transient read/serialization failures emit a
    /// single error notification and leave the timer running; a structural
    /// failure (the property no longer exists) terminates the
    /// subscription.
    pub fn register_poll(
        self: &Arc<Self>,
        key: SubscriptionKey,
        thing: Arc<ExposedThing>,
        content_format: String,
        mut sink: Box<dyn ResponseSink>,
        mut finish: FinishSignal,
    ) {
        let (entry, mut cancel_rx, state, sequence, epoch) = self.new_entry(ObserveMode::Poll);
        self.insert(key.clone(), entry);
        tracing::debug!(?key, interval = ?self.config.poll_interval, "poll observation registered");

        let manager = Arc::clone(self);
        let codecs = Arc::clone(&self.codecs);
        let poll_interval = self.config.poll_interval;
        tokio::spawn(async move {
            let property = key.resource.name.clone();
            let mut interval = tokio::time::interval(poll_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    _ = &mut cancel_rx => break,
                    _ = finish.finished() => break,
                    _ = interval.tick() => {
                        let seq = sequence.fetch_add(1, Ordering::Relaxed) + 1;
                        match thing.runtime().read_property(&property).await {
                            Ok(value) => match codecs.value_to_content(&value, &content_format) {
                                Ok(content) => {
                                    let written = emit_notification(
                                        sink.as_mut(),
                                        Status::Content,
                                        seq,
                                        Some(&content.media_type),
                                        content.body,
                                    )
                                    .await;
                                    if written.is_err() {
                                        tracing::debug!(?key, "peer gone, stopping poll");
                                        break;
                                    }
                                }
                                Err(err) => {
                                    // Transient: this tick reports the
                                    // failure, the timer keeps running.
                                    tracing::warn!(?key, %err, "tick serialization failed");
                                    if emit_error(sink.as_mut(), seq, &err.to_string()).await.is_err() {
                                        break;
                                    }
                                }
                            },
                            Err(crate::runtime::InteractionError::NotFound(_)) => {
                                // Structural: the property is gone.
                                set_state(&state, SubscriptionState::Completing);
                                tracing::warn!(?key, "observed property disappeared");
                                let _ = emit_error(sink.as_mut(), seq, "property no longer exists").await;
                                let _ = sink.end().await;
                                break;
                            }
                            Err(err) => {
                                tracing::warn!(?key, %err, "tick read failed");
                                if emit_error(sink.as_mut(), seq, &err.to_string()).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                }
            }

            set_state(&state, SubscriptionState::Terminated);
            manager.remove_if_epoch(&key, epoch);
        });
    }

    /// Register a Push-mode subscription: relay runtime event callbacks.
    ///
    /// An empty acknowledgement frame goes out before anything else - the
    /// transport below may retry an observe-register before the first
    /// response is durably acknowledged, and without the early ack a
    /// retried registration would be taken for a new subscription. The
    /// listener is registered with the runtime only after the ack.
    pub async fn register_push(
        self: &Arc<Self>,
        key: SubscriptionKey,
        thing: Arc<ExposedThing>,
        content_format: String,
        mut sink: Box<dyn ResponseSink>,
        mut finish: FinishSignal,
    ) {
        if sink.write(Bytes::new()).await.is_err() {
            tracing::debug!(?key, "peer gone before event registration ack");
            return;
        }

        let event = key.resource.name.clone();
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        if let Err(err) = thing.runtime().subscribe_event(&event, event_tx).await {
            tracing::warn!(?key, %err, "event subscribe failed");
            sink.set_status(Status::InternalServerError);
            let _ = sink.write(Bytes::from(err.to_string())).await;
            let _ = sink.end().await;
            return;
        }

        let (entry, mut cancel_rx, state, sequence, epoch) = self.new_entry(ObserveMode::Push);
        self.insert(key.clone(), entry);
        tracing::debug!(?key, "push observation registered");

        let manager = Arc::clone(self);
        let codecs = Arc::clone(&self.codecs);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = &mut cancel_rx => break,
                    _ = finish.finished() => break,
                    delivered = event_rx.recv() => {
                        let Some(value) = delivered else {
                            // Runtime dropped the listener; the stream is over.
                            break;
                        };
                        let seq = sequence.fetch_add(1, Ordering::Relaxed) + 1;
                        match codecs.value_to_content(&value, &content_format) {
                            Ok(content) => {
                                let written = emit_notification(
                                    sink.as_mut(),
                                    Status::Content,
                                    seq,
                                    Some(&content.media_type),
                                    content.body,
                                )
                                .await;
                                if written.is_err() {
                                    tracing::debug!(?key, "peer gone, stopping push");
                                    break;
                                }
                            }
                            Err(err) => {
                                // Event payload shape failures are
                                // structural, unlike transient poll reads.
                                set_state(&state, SubscriptionState::Completing);
                                tracing::warn!(?key, %err, "event serialization failed");
                                let _ = emit_error(sink.as_mut(), seq, &err.to_string()).await;
                                let _ = sink.end().await;
                                break;
                            }
                        }
                    }
                }
            }

            // Drop our listener before unregistering so the runtime can
            // prune it; double unregistration stays a no-op.
            event_rx.close();
            thing.runtime().unsubscribe_event(&key.resource.name).await;
            set_state(&state, SubscriptionState::Terminated);
            manager.remove_if_epoch(&key, epoch);
        });
    }

    fn new_entry(
        &self,
        mode: ObserveMode,
    ) -> (
        SubscriptionEntry,
        oneshot::Receiver<()>,
        Arc<Mutex<SubscriptionState>>,
        Arc<AtomicU64>,
        u64,
    ) {
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let state = Arc::new(Mutex::new(SubscriptionState::Active));
        let sequence = Arc::new(AtomicU64::new(0));
        let epoch = self.next_epoch.fetch_add(1, Ordering::Relaxed);
        let entry = SubscriptionEntry {
            epoch,
            mode,
            state: Arc::clone(&state),
            sequence: Arc::clone(&sequence),
            cancel: Some(cancel_tx),
        };
        (entry, cancel_rx, state, sequence, epoch)
    }

    /// Insert an entry, replacing (and cancelling) any live subscription
    /// for the same key - at most one per (resource, stream) pair.
    fn insert(&self, key: SubscriptionKey, entry: SubscriptionEntry) {
        let replaced = self.lock_subscriptions().insert(key.clone(), entry);
        if let Some(mut old) = replaced {
            if let Some(cancel) = old.cancel.take() {
                let _ = cancel.send(());
            }
            tracing::debug!(?key, "re-registration replaced live subscription");
        }
    }

    /// Task-exit cleanup. The epoch guard keeps a finished task from
    /// evicting a replacement subscription registered under the same key.
    fn remove_if_epoch(&self, key: &SubscriptionKey, epoch: u64) {
        let mut subscriptions = self.lock_subscriptions();
        if subscriptions
            .get(key)
            .map(|entry| entry.epoch == epoch)
            .unwrap_or(false)
        {
            subscriptions.remove(key);
        }
    }
}

fn set_state(state: &Arc<Mutex<SubscriptionState>>, next: SubscriptionState) {
    *state.lock().unwrap_or_else(PoisonError::into_inner) = next;
}

/// Emit one notification frame: status, sequence option, optional
/// content-format, payload.
async fn emit_notification(
    sink: &mut dyn ResponseSink,
    status: Status,
    seq: u64,
    content_format: Option<&str>,
    payload: Bytes,
) -> Result<()> {
    sink.set_status(status);
    sink.set_option(SinkOption::Observe(seq));
    if let Some(media_type) = content_format {
        sink.set_option(SinkOption::ContentFormat(media_type.to_string()));
    }
    sink.write(payload).await
}

/// Emit an internal-error notification for one tick.
async fn emit_error(sink: &mut dyn ResponseSink, seq: u64, message: &str) -> Result<()> {
    emit_notification(
        sink,
        Status::InternalServerError,
        seq,
        None,
        Bytes::from(message.to_string()),
    )
    .await
}
