//! Bridge between diagnostic sources and an event handler.
//!
//! A [`DiagnosticSourceSubscriber`] watches a [`DiagnosticHub`] for sources
//! whose name matches, attaches a filtering listener to each, and forwards
//! accepted events to an [`EventHandler`]. Handler failures, including panics,
//! stop at this boundary and go to the error sink.
//!
//! Lifecycle: `Unsubscribed -> Subscribed -> Disposed`. Subscribing twice is a
//! no-op; disposal is terminal.

use std::collections::{HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde_json::Value;

use crate::diagnostics::{
    DiagnosticHub, DiagnosticSource, EventListener, HubSubscription, SourceObserver,
    SourceSubscription,
};
use crate::error::{HandlerError, Result};

static GLOBAL_MANAGER: Lazy<Arc<SubscriptionManager>> =
    Lazy::new(|| Arc::new(SubscriptionManager::new()));

/// Processes events accepted by a subscriber.
pub trait EventHandler: Send + Sync {
    fn on_event(&self, event_name: &str, payload: &Value) -> Result<()>;
}

pub type NamePredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;
pub type ErrorSink = Arc<dyn Fn(&str, &HandlerError) + Send + Sync>;

/// Observable state of a [`DiagnosticSourceSubscriber`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Unsubscribed,
    Subscribed,
    Disposed,
}

enum State {
    Unsubscribed,
    Subscribed(HubSubscription),
    Disposed,
}

struct Shared {
    stream_matcher: NamePredicate,
    event_filter: HashSet<String>,
    is_enabled: NamePredicate,
    handler: Arc<dyn EventHandler>,
    error_sink: ErrorSink,
    disposed: AtomicBool,
    attached: Mutex<Vec<(u64, SourceSubscription)>>,
}

impl Shared {
    fn accepts(&self, event_name: &str) -> bool {
        !self.disposed.load(Ordering::Acquire)
            && self.event_filter.contains(event_name)
            && (self.is_enabled)(event_name)
    }

    fn dispatch(&self, event_name: &str, payload: &Value) {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.handler.on_event(event_name, payload)
        }))
        .unwrap_or_else(|panic| Err(HandlerError::Panicked(panic_message(panic.as_ref()))));

        if let Err(error) = outcome {
            (self.error_sink)(event_name, &error);
        }
    }

    fn attach(self: &Arc<Self>, source: &DiagnosticSource) {
        if !(self.stream_matcher)(source.name()) {
            return;
        }

        let mut attached = self.attached.lock();
        if self.disposed.load(Ordering::Acquire) || attached.iter().any(|(id, _)| *id == source.id()) {
            return;
        }

        let listener = FilteringListener {
            shared: self.clone(),
        };
        attached.push((source.id(), source.subscribe(Arc::new(listener))));
        tracing::debug!(
            target: "sqlclient_tracing",
            source = source.name(),
            "Attached to diagnostic source"
        );
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Logs handler failures through `tracing`.
pub fn log_error_sink() -> ErrorSink {
    Arc::new(|event_name: &str, error: &HandlerError| {
        tracing::warn!(
            target: "sqlclient_tracing",
            event = event_name,
            error = %error,
            "Unknown error processing event"
        );
    })
}

struct FilteringListener {
    shared: Arc<Shared>,
}

impl EventListener for FilteringListener {
    fn is_enabled(&self, event_name: &str) -> bool {
        self.shared.accepts(event_name)
    }

    fn on_event(&self, event_name: &str, payload: &Value) {
        if self.shared.accepts(event_name) {
            self.shared.dispatch(event_name, payload);
        }
    }
}

struct StreamObserver {
    shared: Weak<Shared>,
}

impl SourceObserver for StreamObserver {
    fn on_source(&self, source: &DiagnosticSource) {
        if let Some(shared) = self.shared.upgrade() {
            shared.attach(source);
        }
    }
}

/// One subscription to the diagnostic sources matching a name.
pub struct DiagnosticSourceSubscriber {
    shared: Arc<Shared>,
    state: Mutex<State>,
}

impl std::fmt::Debug for DiagnosticSourceSubscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiagnosticSourceSubscriber")
            .field("state", &self.state())
            .field("attached", &self.attached_count())
            .finish()
    }
}

impl DiagnosticSourceSubscriber {
    /// Create a subscriber that forwards events named in `event_filter` from
    /// sources accepted by `stream_matcher`, provided `is_enabled` agrees.
    /// Failures are logged until [`Self::with_error_sink`] replaces the sink.
    pub fn new<I, S>(
        handler: Arc<dyn EventHandler>,
        stream_matcher: NamePredicate,
        event_filter: I,
        is_enabled: NamePredicate,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            shared: Arc::new(Shared {
                stream_matcher,
                event_filter: event_filter.into_iter().map(Into::into).collect(),
                is_enabled,
                handler,
                error_sink: log_error_sink(),
                disposed: AtomicBool::new(false),
                attached: Mutex::new(Vec::new()),
            }),
            state: Mutex::new(State::Unsubscribed),
        }
    }

    /// Replace the error sink. Only meaningful before [`Self::subscribe`].
    pub fn with_error_sink(mut self, error_sink: ErrorSink) -> Self {
        if let Some(shared) = Arc::get_mut(&mut self.shared) {
            shared.error_sink = error_sink;
        }
        self
    }

    /// Start observing `hub`. Returns `false` when already subscribed or
    /// disposed, in which case nothing changes.
    pub fn subscribe(&self, hub: &DiagnosticHub) -> bool {
        let mut state = self.state.lock();
        if !matches!(*state, State::Unsubscribed) {
            return false;
        }

        let observer = StreamObserver {
            shared: Arc::downgrade(&self.shared),
        };
        *state = State::Subscribed(hub.subscribe(Arc::new(observer)));
        tracing::debug!(target: "sqlclient_tracing", "Subscribed to diagnostic hub");
        true
    }

    /// Detach from the hub and every source. Later notifications are ignored.
    pub fn dispose(&self) {
        let mut state = self.state.lock();
        match std::mem::replace(&mut *state, State::Disposed) {
            State::Disposed => return,
            State::Subscribed(mut subscription) => subscription.unsubscribe(),
            State::Unsubscribed => {}
        }

        let mut attached = self.shared.attached.lock();
        self.shared.disposed.store(true, Ordering::Release);
        for (_, mut subscription) in attached.drain(..) {
            subscription.unsubscribe();
        }
        tracing::debug!(target: "sqlclient_tracing", "Disposed diagnostic subscriber");
    }

    pub fn state(&self) -> SubscriptionState {
        match *self.state.lock() {
            State::Unsubscribed => SubscriptionState::Unsubscribed,
            State::Subscribed(_) => SubscriptionState::Subscribed,
            State::Disposed => SubscriptionState::Disposed,
        }
    }

    /// Number of sources currently attached.
    pub fn attached_count(&self) -> usize {
        self.shared.attached.lock().len()
    }
}

impl Drop for DiagnosticSourceSubscriber {
    fn drop(&mut self) {
        self.dispose();
    }
}

struct Entry {
    subscriber: Arc<DiagnosticSourceSubscriber>,
    leases: usize,
}

/// Hands out at most one live subscriber per stream name.
///
/// Each [`SubscriberLease`] keeps the subscriber alive; when the last lease for
/// a stream is released the subscriber is disposed and forgotten, so the next
/// acquire starts a fresh one.
#[derive(Default)]
pub struct SubscriptionManager {
    entries: Mutex<HashMap<String, Entry>>,
}

impl std::fmt::Debug for SubscriptionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionManager")
            .field("streams", &self.entries.lock().len())
            .finish()
    }
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// The manager shared by the whole process.
    pub fn global() -> Arc<SubscriptionManager> {
        GLOBAL_MANAGER.clone()
    }

    /// Lease the subscriber for `stream_name`, building and subscribing it
    /// with `make` if none is live.
    pub fn acquire<F>(self: &Arc<Self>, stream_name: &str, hub: &DiagnosticHub, make: F) -> SubscriberLease
    where
        F: FnOnce() -> DiagnosticSourceSubscriber,
    {
        let mut entries = self.entries.lock();
        let entry = entries.entry(stream_name.to_string()).or_insert_with(|| {
            let subscriber = Arc::new(make());
            subscriber.subscribe(hub);
            Entry {
                subscriber,
                leases: 0,
            }
        });
        entry.leases += 1;

        SubscriberLease {
            manager: self.clone(),
            stream_name: stream_name.to_string(),
            subscriber: Some(entry.subscriber.clone()),
        }
    }

    /// Number of outstanding leases for `stream_name`.
    pub fn lease_count(&self, stream_name: &str) -> usize {
        self.entries.lock().get(stream_name).map_or(0, |entry| entry.leases)
    }

    fn release(&self, stream_name: &str) {
        // Disposal happens under `entries` so a concurrent acquire can't
        // attach a second subscriber while this one is still live.
        let mut entries = self.entries.lock();
        match entries.get_mut(stream_name) {
            Some(entry) if entry.leases > 1 => entry.leases -= 1,
            Some(_) => {
                if let Some(entry) = entries.remove(stream_name) {
                    entry.subscriber.dispose();
                }
            }
            None => {}
        }
    }
}

/// Shared ownership of a stream's subscriber.
#[derive(Debug)]
pub struct SubscriberLease {
    manager: Arc<SubscriptionManager>,
    stream_name: String,
    subscriber: Option<Arc<DiagnosticSourceSubscriber>>,
}

impl SubscriberLease {
    pub fn subscriber(&self) -> Option<&Arc<DiagnosticSourceSubscriber>> {
        self.subscriber.as_ref()
    }

    /// Give the lease back. Safe to call more than once.
    pub fn release(&mut self) {
        if self.subscriber.take().is_some() {
            self.manager.release(&self.stream_name);
        }
    }
}

impl Drop for SubscriberLease {
    fn drop(&mut self) {
        self.release();
    }
}
