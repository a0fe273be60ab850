//! # sqlclient-tracing
//!
//! Tracing instrumentation for SQL Server client command events.
//!
//! The SQL client writes `WriteCommandBefore`, `WriteCommandAfter` and
//! `WriteCommandError` events to a named diagnostic stream. This crate
//! subscribes to that stream once per process, drops events nobody is
//! listening for before touching their payload, and turns each command into a
//! span carrying OpenTelemetry database attributes.
//!
//! ## Features
//!
//! - **Single Subscription**: Any number of instrumentation instances share one
//!   subscription to the stream
//! - **Old and New Conventions**: Emit pre-stable attributes, stable attributes, or both
//! - **Connection Attributes**: Server address, port and named instance parsed
//!   from the data source
//! - **Contained Failures**: A bad payload or a failing handler is logged, never
//!   propagated to the code that issued the command
//!
//! ## Quick Start
//!
//! ```rust
//! use sqlclient_tracing::prelude::*;
//!
//! let context = InstrumentationContext::global();
//! let instrumentation = SqlClientInstrumentation::new(
//!     &context,
//!     Some(
//!         InstrumentationOptions::from_env()
//!             .with_connection_level_attributes(true)
//!             .with_record_exception(true),
//!     ),
//! );
//!
//! // Commands issued through the client are now traced.
//! drop(instrumentation);
//! ```
//!
//! ## Span Attributes
//!
//! | Attribute | Description |
//! |-----------|-------------|
//! | `db.system` | Always "mssql" |
//! | `db.name` | Database name (old conventions) |
//! | `db.namespace` | `instance.database` or database name (new conventions) |
//! | `db.mssql.instance_name` | Named instance (old conventions) |
//! | `db.statement` / `db.query.text` | Command text (stored procedures, or text when enabled) |
//! | `server.address` | Host name or IP address |
//! | `server.port` | Port, when the data source names one |
//! | `otel.status_code` | "OK" or "ERROR" |
//! | `db.response.status_code` | SQL error number (on failure) |
//! | `exception.message` | Exception message (when enabled) |

mod config;
mod diagnostics;
mod error;
mod flags;
mod instrumentation;
mod listener;
mod parser;
mod sink;
mod subscriber;
mod tags;

pub use config::{InstrumentationOptions, SemconvStability, Unapply, SEMCONV_STABILITY_OPT_IN};
pub use diagnostics::{
    DiagnosticHub, DiagnosticSource, EventListener, HubSubscription, SourceObserver,
    SourceSubscription,
};
pub use error::HandlerError;
pub use flags::{FlagId, FlagRegistry, FlagSource};
pub use instrumentation::{InstrumentationContext, SqlClientInstrumentation};
pub use listener::{
    CommandEvent, CommandType, SqlClientListener, SQLCLIENT_DIAGNOSTIC_LISTENER_NAME,
    SQLCLIENT_EVENTS,
};
pub use parser::ConnectionDescriptor;
pub use sink::{OperationStatus, TelemetrySink, TracingSink};
pub use subscriber::{
    log_error_sink, DiagnosticSourceSubscriber, ErrorSink, EventHandler, NamePredicate,
    SubscriberLease, SubscriptionManager, SubscriptionState,
};
pub use tags::{attributes, build_tags, TagSet, TagValue, DB_SYSTEM_MSSQL};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        InstrumentationContext, InstrumentationOptions, SemconvStability, SqlClientInstrumentation,
    };
}
