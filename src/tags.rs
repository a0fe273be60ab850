//! Span attribute construction from connection information.

use std::fmt;

use crate::flags::{FlagId, FlagRegistry};
use crate::parser::ConnectionDescriptor;

/// Database system identifier for SQL Server.
pub const DB_SYSTEM_MSSQL: &str = "mssql";

/// Attribute keys following OpenTelemetry semantic conventions.
pub mod attributes {
    /// Database system type.
    pub const DB_SYSTEM: &str = "db.system";
    /// Database name (pre-stable conventions).
    pub const DB_NAME: &str = "db.name";
    /// Database namespace, `instance.database` when an instance is named.
    pub const DB_NAMESPACE: &str = "db.namespace";
    /// SQL Server named instance (pre-stable conventions).
    pub const DB_MSSQL_INSTANCE_NAME: &str = "db.mssql.instance_name";
    /// Command text (pre-stable conventions).
    pub const DB_STATEMENT: &str = "db.statement";
    /// Command text.
    pub const DB_QUERY_TEXT: &str = "db.query.text";
    /// Server hostname or IP address.
    pub const SERVER_ADDRESS: &str = "server.address";
    /// Server port.
    pub const SERVER_PORT: &str = "server.port";
    /// Server error number.
    pub const DB_RESPONSE_STATUS_CODE: &str = "db.response.status_code";
    /// Exception message.
    pub const EXCEPTION_MESSAGE: &str = "exception.message";
}

/// An attribute value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagValue {
    Str(String),
    Int(i64),
}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagValue::Str(s) => f.write_str(s),
            TagValue::Int(i) => write!(f, "{i}"),
        }
    }
}

impl From<&str> for TagValue {
    fn from(value: &str) -> Self {
        TagValue::Str(value.to_string())
    }
}

impl From<String> for TagValue {
    fn from(value: String) -> Self {
        TagValue::Str(value)
    }
}

impl From<i64> for TagValue {
    fn from(value: i64) -> Self {
        TagValue::Int(value)
    }
}

/// Ordered, append-only list of attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagSet {
    entries: Vec<(&'static str, TagValue)>,
}

impl TagSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: &'static str, value: impl Into<TagValue>) {
        self.entries.push((key, value.into()));
    }

    /// First value recorded under `key`.
    pub fn get(&self, key: &str) -> Option<&TagValue> {
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &TagValue)> {
        self.entries.iter().map(|(k, v)| (*k, v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl IntoIterator for TagSet {
    type Item = (&'static str, TagValue);
    type IntoIter = std::vec::IntoIter<(&'static str, TagValue)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// Build the attributes and display name for an operation against
/// `database_name` on `data_source`.
///
/// The display name is the most specific label available: the namespace
/// (stable conventions) or database name, else `address[:port]`, else `mssql`.
pub fn build_tags(
    data_source: Option<&str>,
    database_name: Option<&str>,
    flags: &FlagRegistry,
) -> (TagSet, String) {
    let emit_old = flags.is_any_true(FlagId::EmitOldAttributes);
    let emit_new = flags.is_any_true(FlagId::EmitNewAttributes);
    let database_name = database_name.filter(|name| !name.is_empty());

    let mut display_name: Option<String> = None;
    let mut tags = TagSet::new();
    tags.push(attributes::DB_SYSTEM, DB_SYSTEM_MSSQL);

    match data_source {
        Some(data_source) if flags.is_any_true(FlagId::ConnectionLevelAttributes) => {
            let details = ConnectionDescriptor::parse(data_source);

            if let Some(database) = database_name {
                if emit_old {
                    tags.push(attributes::DB_NAME, database);
                    display_name = Some(database.to_string());
                }

                if emit_new {
                    let namespace = match details.instance_name.as_deref() {
                        Some(instance) => format!("{instance}.{database}"),
                        None => database.to_string(),
                    };
                    tags.push(attributes::DB_NAMESPACE, namespace.as_str());
                    display_name = Some(namespace);
                }
            }

            if let Some(address) = details.server_address() {
                tags.push(attributes::SERVER_ADDRESS, address);
                if let Some(port) = details.port {
                    tags.push(attributes::SERVER_PORT, i64::from(port));
                }

                if display_name.is_none() {
                    display_name = Some(match details.port {
                        Some(port) => format!("{address}:{port}"),
                        None => address.to_string(),
                    });
                }
            }

            if emit_old {
                if let Some(instance) = details.instance_name.as_deref() {
                    tags.push(attributes::DB_MSSQL_INSTANCE_NAME, instance);
                }
            }
        }
        _ => {
            if let Some(database) = database_name {
                if emit_new {
                    tags.push(attributes::DB_NAMESPACE, database);
                }
                if emit_old {
                    tags.push(attributes::DB_NAME, database);
                }
                display_name = Some(database.to_string());
            }
        }
    }

    let display_name = display_name.unwrap_or_else(|| DB_SYSTEM_MSSQL.to_string());
    (tags, display_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::FlagSource;
    use std::sync::Arc;

    fn registry(old: bool, new: bool, connection: bool) -> (FlagRegistry, Vec<Arc<FlagSource>>) {
        let registry = FlagRegistry::new();
        let sources = vec![
            FlagSource::new(FlagId::EmitOldAttributes, old),
            FlagSource::new(FlagId::EmitNewAttributes, new),
            FlagSource::new(FlagId::ConnectionLevelAttributes, connection),
        ];
        for source in &sources {
            registry.register(source);
        }
        (registry, sources)
    }

    fn str_tag<'a>(tags: &'a TagSet, key: &str) -> Option<&'a str> {
        match tags.get(key) {
            Some(TagValue::Str(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    #[test]
    fn test_all_flags_off() {
        let (flags, _sources) = registry(false, false, false);
        let (tags, name) = build_tags(Some(r"myserver\INST,1433"), Some("Orders"), &flags);

        // No attribute toggles: only the system tag, though the database
        // name still labels the operation.
        assert_eq!(tags.len(), 1);
        assert_eq!(str_tag(&tags, attributes::DB_SYSTEM), Some("mssql"));
        assert_eq!(name, "Orders");

        let (tags, name) = build_tags(None, None, &flags);
        assert_eq!(tags.len(), 1);
        assert_eq!(name, "mssql");
    }

    #[test]
    fn test_attribute_toggles_off_with_connection_level() {
        let (flags, _sources) = registry(false, false, true);
        let (tags, name) = build_tags(None, Some("Orders"), &flags);
        assert_eq!(tags.len(), 1);
        assert_eq!(name, "Orders");
    }

    #[test]
    fn test_attribute_toggles_off_with_data_source() {
        let (flags, _sources) = registry(false, false, true);
        let (tags, name) = build_tags(Some("myserver,1433"), Some("Orders"), &flags);

        // Neither convention claims the database, so the address labels it.
        assert_eq!(name, "myserver:1433");
        let keys: Vec<_> = tags.iter().map(|(k, _)| k).collect();
        assert_eq!(
            keys,
            vec![attributes::DB_SYSTEM, attributes::SERVER_ADDRESS, attributes::SERVER_PORT]
        );
        assert_eq!(tags.get(attributes::SERVER_PORT), Some(&TagValue::Int(1433)));
    }

    #[test]
    fn test_new_attributes_with_instance() {
        let (flags, _sources) = registry(false, true, true);
        let (tags, name) = build_tags(Some(r"myserver\SQLEXPRESS"), Some("Orders"), &flags);

        assert_eq!(name, "SQLEXPRESS.Orders");
        assert_eq!(str_tag(&tags, attributes::DB_NAMESPACE), Some("SQLEXPRESS.Orders"));
        assert_eq!(tags.get(attributes::DB_NAME), None);
        assert_eq!(tags.get(attributes::DB_MSSQL_INSTANCE_NAME), None);
    }

    #[test]
    fn test_old_attributes_without_instance() {
        let (flags, _sources) = registry(true, false, true);
        let (tags, name) = build_tags(Some("myserver"), Some("Orders"), &flags);

        assert_eq!(name, "Orders");
        assert_eq!(str_tag(&tags, attributes::DB_NAME), Some("Orders"));
        assert_eq!(str_tag(&tags, attributes::SERVER_ADDRESS), Some("myserver"));
        assert_eq!(tags.get(attributes::DB_NAMESPACE), None);
    }

    #[test]
    fn test_end_to_end_old_and_new() {
        let (flags, _sources) = registry(true, true, true);
        let (tags, name) = build_tags(Some(r"tcp:myserver\SQLEXPRESS,1433"), Some("Orders"), &flags);

        assert_eq!(name, "SQLEXPRESS.Orders");
        let expected = vec![
            (attributes::DB_SYSTEM, TagValue::from("mssql")),
            (attributes::DB_NAME, TagValue::from("Orders")),
            (attributes::DB_NAMESPACE, TagValue::from("SQLEXPRESS.Orders")),
            (attributes::SERVER_ADDRESS, TagValue::from("myserver")),
            (attributes::SERVER_PORT, TagValue::Int(1433)),
            (attributes::DB_MSSQL_INSTANCE_NAME, TagValue::from("SQLEXPRESS")),
        ];
        assert_eq!(tags.into_iter().collect::<Vec<_>>(), expected);
    }

    #[test]
    fn test_display_name_falls_back_to_address() {
        let (flags, _sources) = registry(true, true, true);

        let (_, name) = build_tags(Some("10.1.2.3,1500"), None, &flags);
        assert_eq!(name, "10.1.2.3:1500");

        let (tags, name) = build_tags(Some("dbhost"), Some(""), &flags);
        assert_eq!(name, "dbhost");
        assert_eq!(tags.get(attributes::SERVER_PORT), None);
    }

    #[test]
    fn test_unparseable_data_source_keeps_default_name() {
        let (flags, _sources) = registry(true, false, true);
        let (tags, name) = build_tags(Some(""), None, &flags);
        assert_eq!(name, "mssql");
        assert_eq!(tags.len(), 1);
    }

    #[test]
    fn test_without_connection_level_attributes() {
        let (flags, _sources) = registry(true, true, false);
        let (tags, name) = build_tags(Some("myserver,1433"), Some("Orders"), &flags);

        assert_eq!(name, "Orders");
        let keys: Vec<_> = tags.iter().map(|(k, _)| k).collect();
        assert_eq!(
            keys,
            vec![attributes::DB_SYSTEM, attributes::DB_NAMESPACE, attributes::DB_NAME]
        );
    }

    #[test]
    fn test_instance_name_only_with_old_attributes() {
        let (flags, _sources) = registry(true, false, true);
        let (tags, name) = build_tags(Some(r"myserver\INST"), None, &flags);

        assert_eq!(name, "myserver");
        assert_eq!(str_tag(&tags, attributes::DB_MSSQL_INSTANCE_NAME), Some("INST"));
    }
}
