//! Errors raised while processing diagnostic events.
//!
//! None of these ever reach the code that emitted the event: the subscriber
//! hands them to its error sink and drops the event.

use thiserror::Error;

/// Failure while handling a single diagnostic event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    /// A field the handler cannot work without is absent from the payload.
    #[error("payload is missing required field `{0}`")]
    MissingField(&'static str),

    /// A field is present but has the wrong shape.
    #[error("payload field `{field}` is not {expected}")]
    InvalidField {
        field: &'static str,
        expected: &'static str,
    },

    /// The handler panicked.
    #[error("event handler panicked: {0}")]
    Panicked(String),
}

pub type Result<T> = std::result::Result<T, HandlerError>;
