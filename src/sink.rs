//! Outbound telemetry: where finished attribute sets end up.

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::{field, Level, Span};

use crate::tags::{attributes, TagSet, TagValue};

/// Outcome of a database operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationStatus {
    Ok,
    Error {
        /// Server error number, recorded as `db.response.status_code`.
        status_code: Option<String>,
        /// Exception type name.
        exception_type: Option<String>,
        /// Exception message, only present when exceptions are recorded.
        message: Option<String>,
    },
}

/// Receives operations built from diagnostic events.
///
/// Start and stop are correlated by `operation_id`, which comes from the event
/// payload; arrival order across threads carries no meaning.
pub trait TelemetrySink: Send + Sync {
    /// Whether operations would be recorded at all. Checked before any
    /// payload work is done.
    fn is_enabled(&self) -> bool {
        true
    }

    fn start(&self, operation_id: &str, display_name: &str, tags: TagSet);

    fn stop(&self, operation_id: &str, status: OperationStatus);
}

/// Records operations as `tracing` spans.
///
/// Spans become children of the current span context, so database spans nest
/// under whatever request span is active on the driver's thread.
#[derive(Debug, Default)]
pub struct TracingSink {
    active: Mutex<HashMap<String, Span>>,
}

impl TracingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of started operations that haven't been stopped.
    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }
}

impl TelemetrySink for TracingSink {
    fn is_enabled(&self) -> bool {
        tracing::span_enabled!(target: "sqlclient_tracing", Level::INFO)
    }

    fn start(&self, operation_id: &str, display_name: &str, tags: TagSet) {
        let span = tracing::info_span!(
            target: "sqlclient_tracing",
            "db.query",
            otel.name = %display_name,
            otel.kind = "client",
            db.system = field::Empty,
            db.name = field::Empty,
            db.namespace = field::Empty,
            db.mssql.instance_name = field::Empty,
            db.statement = field::Empty,
            db.query.text = field::Empty,
            server.address = field::Empty,
            server.port = field::Empty,
            db.response.status_code = field::Empty,
            otel.status_code = field::Empty,
            otel.status_description = field::Empty,
            exception.message = field::Empty,
        );

        for (key, value) in tags.iter() {
            match value {
                TagValue::Str(s) => span.record(key, s.as_str()),
                TagValue::Int(i) => span.record(key, *i),
            };
        }

        self.active.lock().insert(operation_id.to_string(), span);
    }

    fn stop(&self, operation_id: &str, status: OperationStatus) {
        let Some(span) = self.active.lock().remove(operation_id) else {
            tracing::debug!(
                target: "sqlclient_tracing",
                operation_id,
                "Stop for unknown operation"
            );
            return;
        };

        match status {
            OperationStatus::Ok => {
                span.record("otel.status_code", "OK");
            }
            OperationStatus::Error {
                status_code,
                exception_type,
                message,
            } => {
                span.record("otel.status_code", "ERROR");
                if let Some(status_code) = &status_code {
                    span.record(attributes::DB_RESPONSE_STATUS_CODE, status_code.as_str());
                }
                if let Some(message) = &message {
                    span.record("otel.status_description", message.as_str());
                    span.record(attributes::EXCEPTION_MESSAGE, message.as_str());
                }
                tracing::error!(
                    target: "sqlclient_tracing",
                    parent: &span,
                    status_code = status_code.as_deref(),
                    exception_type = exception_type.as_deref(),
                    "Database command failed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags() -> TagSet {
        let mut tags = TagSet::new();
        tags.push(attributes::DB_SYSTEM, "mssql");
        tags.push(attributes::SERVER_PORT, 1433_i64);
        tags
    }

    #[test]
    fn test_start_and_stop() {
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(Level::TRACE)
            .with_test_writer()
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            let sink = TracingSink::new();
            assert!(sink.is_enabled());

            sink.start("op-1", "Orders", tags());
            sink.start("op-2", "Orders", tags());
            assert_eq!(sink.active_count(), 2);

            sink.stop("op-1", OperationStatus::Ok);
            sink.stop(
                "op-2",
                OperationStatus::Error {
                    status_code: Some("208".to_string()),
                    exception_type: Some("SqlException".to_string()),
                    message: None,
                },
            );
            sink.stop("op-3", OperationStatus::Ok);
            assert_eq!(sink.active_count(), 0);
        });
    }

    #[test]
    fn test_disabled_without_subscriber() {
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(Level::WARN)
            .with_test_writer()
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            assert!(!TracingSink::new().is_enabled());
        });
    }
}
