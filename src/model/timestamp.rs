use chrono::{DateTime, Utc};

/// Parses a timestamp as sent by the Jira REST API
///
/// Jira emits `2024-01-15T10:30:00.000+0000` (offset without a colon).
/// Plain RFC 3339 is accepted too, since that is what the state files and
/// persisted records contain.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();

    DateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f%z")
        .or_else(|_| DateTime::parse_from_rfc3339(value))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Formats a timestamp for a JQL date comparison (`"yyyy/MM/dd HH:mm"`)
///
/// JQL has minute granularity, so the bound is rounded down and callers must
/// filter out earlier results themselves.
pub fn format_jql_date(value: &DateTime<Utc>) -> String {
    value.format("%Y/%m/%d %H:%M").to_string()
}
