//! Basic example showing how to use sqlclient-tracing.
//!
//! Run with: cargo run --example basic

use serde_json::json;
use sqlclient_tracing::prelude::*;
use sqlclient_tracing::SQLCLIENT_DIAGNOSTIC_LISTENER_NAME;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() {
    // Initialize tracing subscriber
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,sqlclient_tracing=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let context = InstrumentationContext::global();

    // Option 1: Options from OTEL_SEMCONV_STABILITY_OPT_IN
    let instrumentation = SqlClientInstrumentation::new(
        &context,
        Some(InstrumentationOptions::from_env().with_connection_level_attributes(true)),
    );

    // Option 2: Explicit conventions, OR-ed with every other live instance
    // let instrumentation = SqlClientInstrumentation::new(
    //     &context,
    //     Some(InstrumentationOptions::with_semconv(SemconvStability::Duplicate)),
    // );

    // Stand-in for the driver: it owns the stream and writes command events.
    let driver = context.hub.create_source(SQLCLIENT_DIAGNOSTIC_LISTENER_NAME);

    let before = "Microsoft.Data.SqlClient.WriteCommandBefore";
    if driver.is_enabled(before) {
        driver.write(
            before,
            &json!({
                "operation_id": "1",
                "command": {
                    "command_type": "StoredProcedure",
                    "command_text": "dbo.GetOrders",
                    "connection": { "data_source": r"tcp:localhost\SQLEXPRESS,1433", "database": "Orders" }
                }
            }),
        );
    }

    driver.write(
        "Microsoft.Data.SqlClient.WriteCommandAfter",
        &json!({ "operation_id": "1" }),
    );

    tracing::info!("Command traced");

    drop(instrumentation);
}
