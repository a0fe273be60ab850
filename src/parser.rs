//! Data source parsing for SQL Server endpoint strings.
//!
//! A data source looks like `[protocol:]host[\instance][,port]`, or a named
//! pipe path such as `np:\\host\pipe\MSSQL$INSTANCE\sql\query`. Parsing is
//! best-effort: anything that doesn't fit leaves the corresponding field empty.

use std::net::IpAddr;

use once_cell::sync::Lazy;
use regex::Regex;

// Regex patterns for data source parsing (compiled once)
static PROTOCOL_PREFIX_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?i:tcp|np|lpc|admin)\s*:\s*").unwrap());

static ENDPOINT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^\s*(.*?)\s*(?:\\\s*(.*?)\s*)?(?:,\s*(.*?))?\s*$").unwrap()
});

static NAMED_PIPE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\\\\([^\\/]+)[\\/](?i:pipe)[\\/](.*)$").unwrap());

static PIPE_INSTANCE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^MSSQL\$(.+?)[\\/]sql[\\/]query$").unwrap());

/// Endpoint details extracted from a data source string.
///
/// At most one of `server_host_name` and `server_ip_address` is set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    pub server_host_name: Option<String>,
    pub server_ip_address: Option<String>,
    pub instance_name: Option<String>,
    pub port: Option<u16>,
}

impl ConnectionDescriptor {
    /// Parse a data source string. Never fails; malformed input yields an
    /// empty descriptor.
    pub fn parse(data_source: &str) -> Self {
        let remainder = match PROTOCOL_PREFIX_REGEX.find(data_source) {
            Some(prefix) => &data_source[prefix.end()..],
            None => data_source,
        };

        if remainder.trim_start().starts_with(r"\\") {
            return Self::parse_named_pipe(remainder.trim());
        }

        let Some(caps) = ENDPOINT_REGEX.captures(remainder) else {
            return Self::default();
        };

        let host = caps.get(1).map_or("", |m| m.as_str());
        if host.is_empty() {
            return Self::default();
        }

        let instance_name = caps
            .get(2)
            .map(|m| m.as_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        let port = caps.get(3).and_then(|m| parse_port(m.as_str()));

        Self::from_host(host, instance_name, port)
    }

    /// The address to report: the IP address when known, otherwise the host name.
    pub fn server_address(&self) -> Option<&str> {
        self.server_ip_address
            .as_deref()
            .or(self.server_host_name.as_deref())
    }

    fn parse_named_pipe(path: &str) -> Self {
        let Some(caps) = NAMED_PIPE_REGEX.captures(path) else {
            return Self::default();
        };

        let host = caps.get(1).map_or("", |m| m.as_str().trim());
        if host.is_empty() {
            return Self::default();
        }

        let instance_name = caps
            .get(2)
            .and_then(|pipe| PIPE_INSTANCE_REGEX.captures(pipe.as_str()))
            .and_then(|inner| inner.get(1))
            .map(|m| m.as_str().to_string());

        Self::from_host(host, instance_name, None)
    }

    fn from_host(host: &str, instance_name: Option<String>, port: Option<u16>) -> Self {
        let unbracketed = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);

        let (server_host_name, server_ip_address) = match unbracketed.parse::<IpAddr>() {
            Ok(_) => (None, Some(unbracketed.to_string())),
            Err(_) => (Some(host.to_string()), None),
        };

        Self {
            server_host_name,
            server_ip_address,
            instance_name,
            port,
        }
    }
}

/// Read the port from the segment following the first comma. Only the part
/// before any further comma counts; non-numeric text is not a port.
fn parse_port(segment: &str) -> Option<u16> {
    segment.split(',').next()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_host_only() {
        let parsed = ConnectionDescriptor::parse("myserver");
        assert_eq!(parsed.server_host_name.as_deref(), Some("myserver"));
        assert_eq!(parsed.server_ip_address, None);
        assert_eq!(parsed.instance_name, None);
        assert_eq!(parsed.port, None);
    }

    #[test]
    fn test_parse_full_data_source() {
        let parsed = ConnectionDescriptor::parse(r"tcp:myserver\SQLEXPRESS,1433");
        assert_eq!(parsed.server_host_name.as_deref(), Some("myserver"));
        assert_eq!(parsed.instance_name.as_deref(), Some("SQLEXPRESS"));
        assert_eq!(parsed.port, Some(1433));
    }

    #[test]
    fn test_parse_protocol_is_case_insensitive() {
        let parsed = ConnectionDescriptor::parse("TCP:db.internal,1500");
        assert_eq!(parsed.server_host_name.as_deref(), Some("db.internal"));
        assert_eq!(parsed.port, Some(1500));
    }

    #[test]
    fn test_parse_unknown_prefix_stays_in_host() {
        let parsed = ConnectionDescriptor::parse("foo:bar");
        assert_eq!(parsed.server_host_name.as_deref(), Some("foo:bar"));
    }

    #[test]
    fn test_parse_non_numeric_port() {
        let parsed = ConnectionDescriptor::parse("myserver,abc");
        assert_eq!(parsed.server_host_name.as_deref(), Some("myserver"));
        assert_eq!(parsed.port, None);
    }

    #[test]
    fn test_parse_port_stops_at_next_comma() {
        let parsed = ConnectionDescriptor::parse("myserver,1433,extra");
        assert_eq!(parsed.port, Some(1433));
    }

    #[test]
    fn test_parse_whitespace_around_segments() {
        let parsed = ConnectionDescriptor::parse(r" tcp: myserver \ INST , 1444 ");
        assert_eq!(parsed.server_host_name.as_deref(), Some("myserver"));
        assert_eq!(parsed.instance_name.as_deref(), Some("INST"));
        assert_eq!(parsed.port, Some(1444));
    }

    #[test]
    fn test_parse_ipv4() {
        let parsed = ConnectionDescriptor::parse("tcp:10.0.0.5,1433");
        assert_eq!(parsed.server_ip_address.as_deref(), Some("10.0.0.5"));
        assert_eq!(parsed.server_host_name, None);
        assert_eq!(parsed.server_address(), Some("10.0.0.5"));
    }

    #[test]
    fn test_parse_ipv6() {
        let parsed = ConnectionDescriptor::parse("::1");
        assert_eq!(parsed.server_ip_address.as_deref(), Some("::1"));

        let parsed = ConnectionDescriptor::parse("tcp:[fe80::1],1433");
        assert_eq!(parsed.server_ip_address.as_deref(), Some("fe80::1"));
        assert_eq!(parsed.port, Some(1433));
    }

    #[test]
    fn test_parse_named_pipe() {
        let parsed = ConnectionDescriptor::parse(r"np:\\dbhost\pipe\MSSQL$REPORTS\sql\query");
        assert_eq!(parsed.server_host_name.as_deref(), Some("dbhost"));
        assert_eq!(parsed.instance_name.as_deref(), Some("REPORTS"));
        assert_eq!(parsed.port, None);

        let parsed = ConnectionDescriptor::parse(r"\\dbhost\pipe\sql\query");
        assert_eq!(parsed.server_host_name.as_deref(), Some("dbhost"));
        assert_eq!(parsed.instance_name, None);
    }

    #[test]
    fn test_parse_empty_and_malformed() {
        assert_eq!(ConnectionDescriptor::parse(""), ConnectionDescriptor::default());
        assert_eq!(ConnectionDescriptor::parse("   "), ConnectionDescriptor::default());
        assert_eq!(ConnectionDescriptor::parse(",1433"), ConnectionDescriptor::default());
        assert_eq!(ConnectionDescriptor::parse("tcp:"), ConnectionDescriptor::default());
        assert_eq!(ConnectionDescriptor::parse(r"\\"), ConnectionDescriptor::default());
    }

    proptest! {
        #[test]
        fn prop_port_extracted(host in "[a-z][a-z0-9.-]{0,20}", port in any::<u16>()) {
            let parsed = ConnectionDescriptor::parse(&format!("{host},{port}"));
            prop_assert_eq!(parsed.server_host_name.as_deref(), Some(host.as_str()));
            prop_assert_eq!(parsed.port, Some(port));
        }

        #[test]
        fn prop_non_numeric_port_absent(host in "[a-z][a-z0-9]{0,20}", junk in "[a-z]{1,8}") {
            let parsed = ConnectionDescriptor::parse(&format!("{host},{junk}"));
            prop_assert_eq!(parsed.port, None);
        }

        #[test]
        fn prop_instance_extracted(host in "[a-z][a-z0-9]{0,20}", instance in "[A-Z][A-Z0-9_]{0,15}") {
            let parsed = ConnectionDescriptor::parse(&format!("{host}\\{instance}"));
            prop_assert_eq!(parsed.instance_name.as_deref(), Some(instance.as_str()));
            prop_assert_eq!(parsed.server_host_name.as_deref(), Some(host.as_str()));
        }
    }
}
