//! Handler for SqlClient command events.
//!
//! Turns `WriteCommandBefore` / `WriteCommandAfter` / `WriteCommandError`
//! payloads into operations on a [`TelemetrySink`].

use std::sync::Arc;

use serde_json::Value;

use crate::error::{HandlerError, Result};
use crate::flags::{FlagId, FlagRegistry};
use crate::sink::{OperationStatus, TelemetrySink};
use crate::subscriber::EventHandler;
use crate::tags::{attributes, build_tags};

/// Name of the diagnostic stream SqlClient writes command events to.
pub const SQLCLIENT_DIAGNOSTIC_LISTENER_NAME: &str = "SqlClientDiagnosticListener";

/// Event names emitted by both the legacy and the current client.
pub const SQLCLIENT_EVENTS: [&str; 6] = [
    "System.Data.SqlClient.WriteCommandBefore",
    "Microsoft.Data.SqlClient.WriteCommandBefore",
    "System.Data.SqlClient.WriteCommandAfter",
    "Microsoft.Data.SqlClient.WriteCommandAfter",
    "System.Data.SqlClient.WriteCommandError",
    "Microsoft.Data.SqlClient.WriteCommandError",
];

/// Lifecycle point of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandEvent {
    Before,
    After,
    Error,
}

impl CommandEvent {
    /// Classify a SqlClient event name.
    pub fn from_event_name(event_name: &str) -> Option<Self> {
        let (_, suffix) = event_name.rsplit_once('.')?;
        match suffix {
            "WriteCommandBefore" => Some(CommandEvent::Before),
            "WriteCommandAfter" => Some(CommandEvent::After),
            "WriteCommandError" => Some(CommandEvent::Error),
            _ => None,
        }
    }
}

/// How the command text should be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandType {
    Text,
    StoredProcedure,
    TableDirect,
}

impl CommandType {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "Text" => Some(CommandType::Text),
            "StoredProcedure" => Some(CommandType::StoredProcedure),
            "TableDirect" => Some(CommandType::TableDirect),
            _ => None,
        }
    }
}

fn str_at<'a>(payload: &'a Value, pointer: &str) -> Option<&'a str> {
    payload.pointer(pointer).and_then(Value::as_str)
}

fn operation_id(payload: &Value) -> Result<String> {
    match payload.get("operation_id") {
        None | Some(Value::Null) => Err(HandlerError::MissingField("operation_id")),
        Some(Value::String(id)) => Ok(id.clone()),
        Some(Value::Number(id)) => Ok(id.to_string()),
        Some(_) => Err(HandlerError::InvalidField {
            field: "operation_id",
            expected: "a string or number",
        }),
    }
}

/// Builds operations from SqlClient command events.
pub struct SqlClientListener {
    flags: Arc<FlagRegistry>,
    sink: Arc<dyn TelemetrySink>,
}

impl std::fmt::Debug for SqlClientListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlClientListener").finish_non_exhaustive()
    }
}

impl SqlClientListener {
    pub fn new(flags: Arc<FlagRegistry>, sink: Arc<dyn TelemetrySink>) -> Self {
        Self { flags, sink }
    }

    fn on_before(&self, payload: &Value) -> Result<()> {
        let operation_id = operation_id(payload)?;
        let data_source = str_at(payload, "/command/connection/data_source");
        let database = str_at(payload, "/command/connection/database");

        let (mut tags, display_name) = build_tags(data_source, database, &self.flags);

        if let Some(text) = str_at(payload, "/command/command_text") {
            let command_type = str_at(payload, "/command/command_type").and_then(CommandType::parse);
            let record = match command_type {
                Some(CommandType::StoredProcedure) => true,
                Some(CommandType::Text) => self.flags.is_any_true(FlagId::DbStatementForText),
                _ => false,
            };

            if record {
                if self.flags.is_any_true(FlagId::EmitOldAttributes) {
                    tags.push(attributes::DB_STATEMENT, text);
                }
                if self.flags.is_any_true(FlagId::EmitNewAttributes) {
                    tags.push(attributes::DB_QUERY_TEXT, text);
                }
            }
        }

        self.sink.start(&operation_id, &display_name, tags);
        Ok(())
    }

    fn on_after(&self, payload: &Value) -> Result<()> {
        let operation_id = operation_id(payload)?;
        self.sink.stop(&operation_id, OperationStatus::Ok);
        Ok(())
    }

    fn on_error(&self, payload: &Value) -> Result<()> {
        let operation_id = operation_id(payload)?;

        let status_code = payload
            .pointer("/exception/number")
            .and_then(Value::as_i64)
            .map(|number| number.to_string());
        let exception_type = str_at(payload, "/exception/type").map(str::to_string);

        let message = if self.flags.is_any_true(FlagId::RecordException) {
            str_at(payload, "/exception/message").map(str::to_string)
        } else {
            None
        };

        self.sink
            .stop(&operation_id, OperationStatus::Error {
                status_code,
                exception_type,
                message,
            });
        Ok(())
    }
}

impl EventHandler for SqlClientListener {
    fn on_event(&self, event_name: &str, payload: &Value) -> Result<()> {
        match CommandEvent::from_event_name(event_name) {
            Some(CommandEvent::Before) => self.on_before(payload),
            Some(CommandEvent::After) => self.on_after(payload),
            Some(CommandEvent::Error) => self.on_error(payload),
            None => Ok(()),
        }
    }
}
