//! In-process diagnostic event streams.
//!
//! A [`DiagnosticHub`] knows every named [`DiagnosticSource`] in the process.
//! Drivers create a source and write `(event name, payload)` pairs to it;
//! instrumentation observes the hub to learn about sources and attaches
//! [`EventListener`]s to the ones it cares about.
//!
//! Listeners are invoked synchronously on the writing thread. No lock is held
//! while a listener or observer runs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde_json::Value;

static GLOBAL_HUB: Lazy<DiagnosticHub> = Lazy::new(DiagnosticHub::new);
static NEXT_SOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// Receives events written to a [`DiagnosticSource`].
pub trait EventListener: Send + Sync {
    /// Cheap check made by writers before they build a payload.
    fn is_enabled(&self, event_name: &str) -> bool;

    fn on_event(&self, event_name: &str, payload: &Value);
}

/// Notified about every source known to a [`DiagnosticHub`].
pub trait SourceObserver: Send + Sync {
    fn on_source(&self, source: &DiagnosticSource);
}

struct HubInner {
    sources: RwLock<Vec<Weak<SourceInner>>>,
    observers: RwLock<Vec<(u64, Arc<dyn SourceObserver>)>>,
    next_id: AtomicU64,
}

/// Registry of named diagnostic sources.
#[derive(Clone)]
pub struct DiagnosticHub {
    inner: Arc<HubInner>,
}

impl std::fmt::Debug for DiagnosticHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiagnosticHub")
            .field("sources", &self.inner.sources.read().len())
            .field("observers", &self.inner.observers.read().len())
            .finish()
    }
}

impl Default for DiagnosticHub {
    fn default() -> Self {
        Self::new()
    }
}

impl DiagnosticHub {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(HubInner {
                sources: RwLock::new(Vec::new()),
                observers: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// The hub shared by the whole process.
    pub fn global() -> DiagnosticHub {
        GLOBAL_HUB.clone()
    }

    /// Create a named source and announce it to current observers.
    pub fn create_source(&self, name: impl Into<String>) -> DiagnosticSource {
        let source = DiagnosticSource {
            inner: Arc::new(SourceInner {
                id: NEXT_SOURCE_ID.fetch_add(1, Ordering::Relaxed),
                name: name.into(),
                listeners: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        };

        {
            let mut sources = self.inner.sources.write();
            sources.retain(|weak| weak.strong_count() > 0);
            sources.push(Arc::downgrade(&source.inner));
        }

        let observers: Vec<_> = self
            .inner
            .observers
            .read()
            .iter()
            .map(|(_, observer)| observer.clone())
            .collect();
        for observer in observers {
            observer.on_source(&source);
        }

        source
    }

    /// Observe sources: every live source is replayed immediately, then each
    /// new source is announced as it is created.
    pub fn subscribe(&self, observer: Arc<dyn SourceObserver>) -> HubSubscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.observers.write().push((id, observer.clone()));

        let existing: Vec<_> = self
            .inner
            .sources
            .read()
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        for inner in existing {
            observer.on_source(&DiagnosticSource { inner });
        }

        HubSubscription {
            hub: Arc::downgrade(&self.inner),
            id: Some(id),
        }
    }

    pub fn observer_count(&self) -> usize {
        self.inner.observers.read().len()
    }
}

/// Detaches a [`SourceObserver`] from its hub when disposed or dropped.
pub struct HubSubscription {
    hub: Weak<HubInner>,
    id: Option<u64>,
}

impl HubSubscription {
    pub fn unsubscribe(&mut self) {
        if let (Some(id), Some(hub)) = (self.id.take(), self.hub.upgrade()) {
            hub.observers.write().retain(|(existing, _)| *existing != id);
        }
    }
}

impl Drop for HubSubscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

struct SourceInner {
    id: u64,
    name: String,
    listeners: RwLock<Vec<(u64, Arc<dyn EventListener>)>>,
    next_id: AtomicU64,
}

/// A named stream of diagnostic events.
#[derive(Clone)]
pub struct DiagnosticSource {
    inner: Arc<SourceInner>,
}

impl std::fmt::Debug for DiagnosticSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiagnosticSource")
            .field("name", &self.inner.name)
            .field("listeners", &self.inner.listeners.read().len())
            .finish()
    }
}

impl DiagnosticSource {
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Process-unique identifier of this source.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Whether any listener wants `event_name`. Writers call this before
    /// building a payload.
    pub fn is_enabled(&self, event_name: &str) -> bool {
        self.listeners()
            .iter()
            .any(|listener| listener.is_enabled(event_name))
    }

    /// Deliver an event to every listener on the calling thread.
    pub fn write(&self, event_name: &str, payload: &Value) {
        for listener in self.listeners() {
            listener.on_event(event_name, payload);
        }
    }

    pub fn subscribe(&self, listener: Arc<dyn EventListener>) -> SourceSubscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.listeners.write().push((id, listener));
        SourceSubscription {
            source: Arc::downgrade(&self.inner),
            id: Some(id),
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.read().len()
    }

    fn listeners(&self) -> Vec<Arc<dyn EventListener>> {
        self.inner
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect()
    }
}

/// Detaches an [`EventListener`] from its source when disposed or dropped.
pub struct SourceSubscription {
    source: Weak<SourceInner>,
    id: Option<u64>,
}

impl SourceSubscription {
    pub fn unsubscribe(&mut self) {
        if let (Some(id), Some(source)) = (self.id.take(), self.source.upgrade()) {
            source.listeners.write().retain(|(existing, _)| *existing != id);
        }
    }
}

impl Drop for SourceSubscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
