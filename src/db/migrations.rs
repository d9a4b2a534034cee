use anyhow::{bail, Context, Result};
use log::info;
use rusqlite::Connection;

struct Migration {
    version: i32,
    name: &'static str,
    sql: &'static str,
}

/// Applied in order; `user_version` records the last one that ran.
const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "gps points and timeline events",
    sql: include_str!("schemas/schema_v1.sql"),
}];

fn latest_version() -> i32 {
    MIGRATIONS.last().map_or(0, |m| m.version)
}

pub fn run_migrations(conn: &mut Connection) -> Result<()> {
    let current: i32 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .context("failed to read user_version pragma")?;
    let latest = latest_version();

    if current > latest {
        bail!("database schema version {current} is newer than this build supports ({latest})");
    }

    let pending: Vec<&Migration> = MIGRATIONS.iter().filter(|m| m.version > current).collect();
    if pending.is_empty() {
        return Ok(());
    }

    let tx = conn
        .transaction()
        .context("failed to open migration transaction")?;
    for migration in &pending {
        tx.execute_batch(migration.sql).with_context(|| {
            format!(
                "migration {} ({}) failed",
                migration.version, migration.name
            )
        })?;
    }
    tx.pragma_update(None, "user_version", latest)
        .context("failed to update user_version pragma")?;
    tx.commit().context("failed to commit migrations")?;

    info!("Database schema migrated from version {current} to {latest}");
    Ok(())
}
