//! SqlClient instrumentation lifecycle.

use std::sync::Arc;

use crate::config::{InstrumentationOptions, Unapply};
use crate::diagnostics::DiagnosticHub;
use crate::flags::FlagRegistry;
use crate::listener::{
    CommandEvent, SqlClientListener, SQLCLIENT_DIAGNOSTIC_LISTENER_NAME, SQLCLIENT_EVENTS,
};
use crate::sink::{TelemetrySink, TracingSink};
use crate::subscriber::{DiagnosticSourceSubscriber, SubscriberLease, SubscriptionManager};

/// Everything an instrumentation instance shares with its siblings.
///
/// Instances built from the same context share one subscription per stream
/// and one flag registry, so an option enabled by any of them applies to all
/// events on the stream.
#[derive(Clone)]
pub struct InstrumentationContext {
    pub hub: DiagnosticHub,
    pub flags: Arc<FlagRegistry>,
    pub subscriptions: Arc<SubscriptionManager>,
    pub sink: Arc<dyn TelemetrySink>,
}

impl std::fmt::Debug for InstrumentationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstrumentationContext")
            .field("hub", &self.hub)
            .field("flags", &self.flags)
            .field("subscriptions", &self.subscriptions)
            .finish_non_exhaustive()
    }
}

impl InstrumentationContext {
    /// Build a context from its parts.
    ///
    /// The subscriber for a stream is built by whichever context first
    /// acquires it from `subscriptions`, and it keeps that context's `flags`
    /// and `sink` until the last lease is released. Contexts sharing a
    /// [`SubscriptionManager`] should therefore share the registry and sink
    /// too.
    pub fn new(
        hub: DiagnosticHub,
        flags: Arc<FlagRegistry>,
        subscriptions: Arc<SubscriptionManager>,
        sink: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            hub,
            flags,
            subscriptions,
            sink,
        }
    }

    /// Process-wide hub, registry and subscriptions, recording to `tracing`.
    pub fn global() -> Self {
        static SINK: once_cell::sync::Lazy<Arc<TracingSink>> =
            once_cell::sync::Lazy::new(|| Arc::new(TracingSink::new()));

        Self::new(
            DiagnosticHub::global(),
            FlagRegistry::global(),
            SubscriptionManager::global(),
            SINK.clone(),
        )
    }

    fn build_subscriber(&self) -> DiagnosticSourceSubscriber {
        let handler = Arc::new(SqlClientListener::new(self.flags.clone(), self.sink.clone()));
        let sink = self.sink.clone();

        // Completion events always pass so every started operation is stopped.
        DiagnosticSourceSubscriber::new(
            handler,
            Arc::new(|name: &str| name == SQLCLIENT_DIAGNOSTIC_LISTENER_NAME),
            SQLCLIENT_EVENTS,
            Arc::new(move |event: &str| match CommandEvent::from_event_name(event) {
                Some(CommandEvent::Before) => sink.is_enabled(),
                _ => true,
            }),
        )
    }
}

/// A configured SqlClient instrumentation.
///
/// Creating one applies its options and makes sure the SqlClient stream is
/// subscribed; disposing (or dropping) it withdraws the options and releases
/// the subscription.
///
/// # Example
///
/// ```rust
/// use sqlclient_tracing::{InstrumentationContext, InstrumentationOptions, SqlClientInstrumentation};
///
/// let context = InstrumentationContext::global();
/// let mut instrumentation = SqlClientInstrumentation::new(
///     &context,
///     Some(InstrumentationOptions::default().with_connection_level_attributes(true)),
/// );
///
/// instrumentation.dispose();
/// ```
#[derive(Debug)]
pub struct SqlClientInstrumentation {
    unapply: Option<Unapply>,
    lease: Option<SubscriberLease>,
}

impl SqlClientInstrumentation {
    pub fn new(context: &InstrumentationContext, options: Option<InstrumentationOptions>) -> Self {
        let unapply = options.map(|options| options.apply(&context.flags));
        let lease = context.subscriptions.acquire(
            SQLCLIENT_DIAGNOSTIC_LISTENER_NAME,
            &context.hub,
            || context.build_subscriber(),
        );

        tracing::debug!(
            target: "sqlclient_tracing",
            configured = unapply.is_some(),
            "SqlClient instrumentation created"
        );

        Self {
            unapply,
            lease: Some(lease),
        }
    }

    /// Withdraw the options and release the subscription. Safe to call more
    /// than once.
    pub fn dispose(&mut self) {
        if let Some(mut unapply) = self.unapply.take() {
            unapply.dispose();
        }
        if let Some(mut lease) = self.lease.take() {
            lease.release();
            tracing::debug!(target: "sqlclient_tracing", "SqlClient instrumentation disposed");
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.lease.is_none()
    }
}

impl Drop for SqlClientInstrumentation {
    fn drop(&mut self) {
        self.dispose();
    }
}
