use anyhow::{bail, Context, Result};
use rusqlite::Connection;

/// Ordered schema steps. Entry `n` upgrades a database from version `n` to
/// `n + 1`.
const MIGRATIONS: &[(&str, &str)] = &[("schema_v1.sql", include_str!("schemas/schema_v1.sql"))];

pub const CURRENT_SCHEMA_VERSION: i32 = MIGRATIONS.len() as i32;

fn schema_version(conn: &Connection) -> Result<i32> {
    conn.pragma_query_value(None, "user_version", |row| row.get(0))
        .context("failed to read user_version pragma")
}

/// Brings the capture history schema up to date in a single transaction.
/// Returns the version the database was at before.
pub fn run_migrations(conn: &mut Connection) -> Result<i32> {
    let found = schema_version(conn)?;
    if found > CURRENT_SCHEMA_VERSION {
        bail!(
            "capture history was written by a newer build (schema {found}, this build knows {CURRENT_SCHEMA_VERSION})"
        );
    }

    let pending = &MIGRATIONS[found as usize..];
    if pending.is_empty() {
        return Ok(found);
    }

    let tx = conn
        .transaction()
        .context("failed to open migration transaction")?;
    for (name, sql) in pending {
        tx.execute_batch(sql)
            .with_context(|| format!("failed to apply {name}"))?;
    }
    tx.pragma_update(None, "user_version", CURRENT_SCHEMA_VERSION)
        .context("failed to update user_version pragma")?;
    tx.commit().context("failed to commit migrations")?;

    log::info!("capture history schema upgraded {found} -> {CURRENT_SCHEMA_VERSION}");
    Ok(found)
}
