//! Configuration for SqlClient instrumentation.

use std::sync::Arc;

use crate::flags::{FlagId, FlagRegistry, FlagSource};

/// Environment variable selecting which semantic conventions to emit.
pub const SEMCONV_STABILITY_OPT_IN: &str = "OTEL_SEMCONV_STABILITY_OPT_IN";

/// Which database semantic conventions are emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SemconvStability {
    /// Only the pre-stable attributes (`db.name`, `db.statement`, ...).
    #[default]
    Old,
    /// Only the stable attributes (`db.namespace`, `db.query.text`, ...).
    New,
    /// Both sets side by side.
    Duplicate,
}

impl SemconvStability {
    /// Parse an `OTEL_SEMCONV_STABILITY_OPT_IN` value.
    ///
    /// The value is a comma-separated list; `database/dup` wins over
    /// `database`, and anything unrecognized means the old conventions.
    pub fn parse(value: &str) -> Self {
        let mut stability = SemconvStability::Old;
        for token in value.split(',').map(str::trim) {
            if token.eq_ignore_ascii_case("database/dup") {
                return SemconvStability::Duplicate;
            }
            if token.eq_ignore_ascii_case("database") {
                stability = SemconvStability::New;
            }
        }
        stability
    }

    /// Read the stability mode from the environment.
    pub fn from_env() -> Self {
        std::env::var(SEMCONV_STABILITY_OPT_IN)
            .map(|value| Self::parse(&value))
            .unwrap_or_default()
    }

    pub fn emit_old(&self) -> bool {
        matches!(self, SemconvStability::Old | SemconvStability::Duplicate)
    }

    pub fn emit_new(&self) -> bool {
        matches!(self, SemconvStability::New | SemconvStability::Duplicate)
    }
}

/// Options for one SqlClient instrumentation instance.
///
/// Options are applied to a [`FlagRegistry`], where they are OR-ed with the
/// options of every other live instance in the process.
///
/// # Example
///
/// ```rust
/// use sqlclient_tracing::InstrumentationOptions;
///
/// let options = InstrumentationOptions::default()
///     .with_new_attributes(true)
///     .with_connection_level_attributes(true);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstrumentationOptions {
    /// Emit pre-stable database attributes.
    /// Default: `true`
    pub emit_old_attributes: bool,

    /// Emit stable database attributes.
    /// Default: `false`
    pub emit_new_attributes: bool,

    /// Parse the data source into `server.address`, `server.port` and the
    /// instance name.
    /// Default: `false`
    pub enable_connection_level_attributes: bool,

    /// Attach the exception message to failed operations.
    /// Default: `false`
    pub record_exception: bool,

    /// Record the command text of `Text` commands.
    /// Default: `false` (statements may contain sensitive literals)
    pub set_db_statement_for_text: bool,
}

impl Default for InstrumentationOptions {
    fn default() -> Self {
        Self::with_semconv(SemconvStability::Old)
    }
}

impl InstrumentationOptions {
    /// Create options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create options whose attribute flags follow `OTEL_SEMCONV_STABILITY_OPT_IN`.
    pub fn from_env() -> Self {
        Self::with_semconv(SemconvStability::from_env())
    }

    /// Create options emitting the conventions selected by `stability`.
    pub fn with_semconv(stability: SemconvStability) -> Self {
        Self {
            emit_old_attributes: stability.emit_old(),
            emit_new_attributes: stability.emit_new(),
            enable_connection_level_attributes: false,
            record_exception: false,
            set_db_statement_for_text: false,
        }
    }

    /// Enable or disable pre-stable attribute names (`db.name`, `db.statement`).
    pub fn with_old_attributes(mut self, enabled: bool) -> Self {
        self.emit_old_attributes = enabled;
        self
    }

    /// Enable or disable stable attribute names (`db.namespace`, `db.query.text`).
    pub fn with_new_attributes(mut self, enabled: bool) -> Self {
        self.emit_new_attributes = enabled;
        self
    }

    /// Enable or disable server address, port and instance attributes parsed from the data source.
    pub fn with_connection_level_attributes(mut self, enabled: bool) -> Self {
        self.enable_connection_level_attributes = enabled;
        self
    }

    /// Enable or disable recording exception messages on failed commands.
    pub fn with_record_exception(mut self, enabled: bool) -> Self {
        self.record_exception = enabled;
        self
    }

    /// Enable or disable recording the text of `Text` commands.
    ///
    /// **Security Warning**: command text may contain literals with user data.
    pub fn with_db_statement_for_text(mut self, enabled: bool) -> Self {
        self.set_db_statement_for_text = enabled;
        self
    }

    fn value_of(&self, flag: FlagId) -> bool {
        match flag {
            FlagId::EmitOldAttributes => self.emit_old_attributes,
            FlagId::EmitNewAttributes => self.emit_new_attributes,
            FlagId::ConnectionLevelAttributes => self.enable_connection_level_attributes,
            FlagId::RecordException => self.record_exception,
            FlagId::DbStatementForText => self.set_db_statement_for_text,
        }
    }

    /// Register these options with `registry`.
    ///
    /// Every call registers a fresh set of sources; the returned [`Unapply`]
    /// removes exactly that set.
    pub fn apply(&self, registry: &Arc<FlagRegistry>) -> Unapply {
        let sources: Vec<_> = FlagId::ALL
            .into_iter()
            .map(|flag| FlagSource::new(flag, self.value_of(flag)))
            .collect();

        for source in &sources {
            registry.register(source);
        }

        Unapply {
            registry: registry.clone(),
            sources,
        }
    }
}

/// Reverts one [`InstrumentationOptions::apply`] call. Dropping it has the
/// same effect as calling [`Unapply::dispose`].
#[derive(Debug)]
pub struct Unapply {
    registry: Arc<FlagRegistry>,
    sources: Vec<Arc<FlagSource>>,
}

impl Unapply {
    /// Withdraw this instance's contribution. Safe to call more than once.
    pub fn dispose(&mut self) {
        for source in self.sources.drain(..) {
            source.set(false);
            self.registry.unregister(&source);
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.sources.is_empty()
    }
}

impl Drop for Unapply {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = InstrumentationOptions::default();
        assert!(options.emit_old_attributes);
        assert!(!options.emit_new_attributes);
        assert!(!options.enable_connection_level_attributes);
        assert!(!options.record_exception);
        assert!(!options.set_db_statement_for_text);
    }

    #[test]
    fn test_options_builder() {
        let options = InstrumentationOptions::new()
            .with_old_attributes(false)
            .with_new_attributes(true)
            .with_connection_level_attributes(true)
            .with_record_exception(true)
            .with_db_statement_for_text(true);

        assert!(!options.emit_old_attributes);
        assert!(options.emit_new_attributes);
        assert!(options.enable_connection_level_attributes);
        assert!(options.record_exception);
        assert!(options.set_db_statement_for_text);
    }

    #[test]
    fn test_semconv_parse() {
        assert_eq!(SemconvStability::parse(""), SemconvStability::Old);
        assert_eq!(SemconvStability::parse("http"), SemconvStability::Old);
        assert_eq!(SemconvStability::parse("database"), SemconvStability::New);
        assert_eq!(SemconvStability::parse("http, database"), SemconvStability::New);
        assert_eq!(
            SemconvStability::parse("database,database/dup"),
            SemconvStability::Duplicate
        );
        assert_eq!(
            SemconvStability::parse("DATABASE/DUP"),
            SemconvStability::Duplicate
        );
    }

    #[test]
    fn test_with_semconv() {
        let options = InstrumentationOptions::with_semconv(SemconvStability::New);
        assert!(!options.emit_old_attributes);
        assert!(options.emit_new_attributes);

        let options = InstrumentationOptions::with_semconv(SemconvStability::Duplicate);
        assert!(options.emit_old_attributes);
        assert!(options.emit_new_attributes);
    }

    #[test]
    fn test_apply_and_unapply() {
        let registry = Arc::new(FlagRegistry::new());
        let options = InstrumentationOptions::default().with_record_exception(true);

        let mut unapply = options.apply(&registry);
        assert!(registry.is_any_true(FlagId::EmitOldAttributes));
        assert!(registry.is_any_true(FlagId::RecordException));
        assert!(!registry.is_any_true(FlagId::EmitNewAttributes));

        unapply.dispose();
        unapply.dispose();
        assert!(unapply.is_disposed());
        assert!(!registry.is_any_true(FlagId::EmitOldAttributes));
        assert!(!registry.is_any_true(FlagId::RecordException));
    }

    #[test]
    fn test_double_apply_counts_independently() {
        let registry = Arc::new(FlagRegistry::new());
        let options = InstrumentationOptions::default().with_new_attributes(true);

        let first = options.apply(&registry);
        let second = options.apply(&registry);
        assert_eq!(registry.source_count(FlagId::EmitNewAttributes), 2);

        drop(first);
        assert!(registry.is_any_true(FlagId::EmitNewAttributes));

        drop(second);
        assert!(!registry.is_any_true(FlagId::EmitNewAttributes));
    }
}
