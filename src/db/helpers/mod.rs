//! Column readers for capture history rows. Timestamps are stored as RFC 3339
//! text and counters as non-negative INTEGERs.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::Row;

/// Counter to SQLite INTEGER.
pub fn sql_int(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| anyhow!("counter {value} does not fit in an INTEGER column"))
}

pub fn read_count(row: &Row, column: &str) -> Result<u64> {
    let raw: i64 = row.get(column)?;
    u64::try_from(raw).map_err(|_| anyhow!("column {column} holds negative count {raw}"))
}

pub fn read_timestamp(row: &Row, column: &str) -> Result<DateTime<Utc>> {
    let raw: String = row.get(column)?;
    parse_timestamp(&raw, column)
}

pub fn read_optional_timestamp(row: &Row, column: &str) -> Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(column)?;
    raw.map(|raw| parse_timestamp(&raw, column)).transpose()
}

fn parse_timestamp(raw: &str, column: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("column {column} holds a malformed timestamp {raw:?}"))
}
