//! Process-wide feature flags aggregated across instrumentation instances.
//!
//! Every configured instrumentation contributes one [`FlagSource`] per flag.
//! A flag is on when any live source for it is on. The registry only keeps
//! weak references, so a source that is dropped stops counting even if it was
//! never unregistered explicitly.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use once_cell::sync::Lazy;
use parking_lot::RwLock;

static GLOBAL_REGISTRY: Lazy<Arc<FlagRegistry>> = Lazy::new(|| Arc::new(FlagRegistry::new()));

/// Identifies a toggle whose value is OR-ed across sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlagId {
    /// Emit attributes from the pre-stable database semantic conventions.
    EmitOldAttributes,
    /// Emit attributes from the stable database semantic conventions.
    EmitNewAttributes,
    /// Parse the data source and emit server/instance attributes.
    ConnectionLevelAttributes,
    /// Attach exception messages to failed operations.
    RecordException,
    /// Record command text for `CommandType.Text` commands.
    DbStatementForText,
}

impl FlagId {
    pub const ALL: [FlagId; 5] = [
        FlagId::EmitOldAttributes,
        FlagId::EmitNewAttributes,
        FlagId::ConnectionLevelAttributes,
        FlagId::RecordException,
        FlagId::DbStatementForText,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FlagId::EmitOldAttributes => "emit-old-attributes",
            FlagId::EmitNewAttributes => "emit-new-attributes",
            FlagId::ConnectionLevelAttributes => "connection-level-attributes",
            FlagId::RecordException => "record-exception",
            FlagId::DbStatementForText => "db-statement-for-text",
        }
    }
}

impl std::fmt::Display for FlagId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One instance's opinion about a single flag.
#[derive(Debug)]
pub struct FlagSource {
    flag: FlagId,
    value: AtomicBool,
}

impl FlagSource {
    pub fn new(flag: FlagId, value: bool) -> Arc<Self> {
        Arc::new(Self {
            flag,
            value: AtomicBool::new(value),
        })
    }

    pub fn flag(&self) -> FlagId {
        self.flag
    }

    pub fn get(&self) -> bool {
        self.value.load(Ordering::Acquire)
    }

    pub fn set(&self, value: bool) {
        self.value.store(value, Ordering::Release);
    }
}

/// Registry of flag sources keyed by [`FlagId`].
///
/// Reads take a shared lock and never block each other; registration and
/// unregistration are serialized behind the write lock.
#[derive(Debug, Default)]
pub struct FlagRegistry {
    sources: RwLock<HashMap<FlagId, Vec<Weak<FlagSource>>>>,
}

impl FlagRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry shared by the whole process.
    pub fn global() -> Arc<FlagRegistry> {
        GLOBAL_REGISTRY.clone()
    }

    /// Register a source. Registering the same source twice is a no-op and
    /// returns `false`.
    pub fn register(&self, source: &Arc<FlagSource>) -> bool {
        let mut sources = self.sources.write();
        let entries = sources.entry(source.flag()).or_default();
        entries.retain(|weak| weak.strong_count() > 0);

        let candidate = Arc::downgrade(source);
        if entries.iter().any(|weak| weak.ptr_eq(&candidate)) {
            return false;
        }

        entries.push(candidate);
        tracing::trace!(
            target: "sqlclient_tracing",
            flag = %source.flag(),
            value = source.get(),
            "Registered flag source"
        );
        true
    }

    /// Remove a source. Returns `false` if it wasn't registered.
    pub fn unregister(&self, source: &Arc<FlagSource>) -> bool {
        let mut sources = self.sources.write();
        let Some(entries) = sources.get_mut(&source.flag()) else {
            return false;
        };

        let target = Arc::downgrade(source);
        let before = entries.len();
        entries.retain(|weak| weak.strong_count() > 0 && !weak.ptr_eq(&target));
        let removed = entries.len() < before;

        if removed {
            tracing::trace!(
                target: "sqlclient_tracing",
                flag = %source.flag(),
                "Unregistered flag source"
            );
        }
        removed
    }

    /// Whether any live source registered for `flag` is currently on.
    pub fn is_any_true(&self, flag: FlagId) -> bool {
        self.sources.read().get(&flag).is_some_and(|entries| {
            entries
                .iter()
                .filter_map(Weak::upgrade)
                .any(|source| source.get())
        })
    }

    /// Number of live sources registered for `flag`.
    pub fn source_count(&self, flag: FlagId) -> usize {
        self.sources
            .read()
            .get(&flag)
            .map_or(0, |entries| entries.iter().filter(|w| w.strong_count() > 0).count())
    }
}
