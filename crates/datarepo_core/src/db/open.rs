//! Connection bootstrap utilities for SQLite.
//!
//! # Responsibility
//! - Open file or in-memory SQLite connections.
//! - Configure connection pragmas from `ContextOptions`.
//! - Trigger schema migrations before returning a usable connection.
//!
//! # Invariants
//! - Returned connections have migrations fully applied.
//! - Returned connections carry the stored-procedure catalog table.

use super::migrations::{apply_migrations, Migration};
use super::{ContextOptions, DbResult, DbTarget};
use log::{error, info};
use rusqlite::Connection;
use std::path::Path;
use std::time::Instant;

/// Catalog of named SQL bodies used to emulate stored procedures.
pub const PROCEDURE_CATALOG_TABLE: &str = "_datarepo_procedures";

/// Opens a SQLite database file and applies all pending migrations.
///
/// # Side effects
/// - Emits `db_open` logging events with duration and status.
pub fn open_db(
    path: impl AsRef<Path>,
    options: &ContextOptions,
    migrations: &[Migration],
) -> DbResult<Connection> {
    open_target(
        &DbTarget::File(path.as_ref().to_path_buf()),
        options,
        migrations,
    )
}

/// Opens a private in-memory database and applies all pending migrations.
pub fn open_db_in_memory(
    options: &ContextOptions,
    migrations: &[Migration],
) -> DbResult<Connection> {
    open_target(&DbTarget::Memory, options, migrations)
}

pub(crate) fn open_target(
    target: &DbTarget,
    options: &ContextOptions,
    migrations: &[Migration],
) -> DbResult<Connection> {
    let started_at = Instant::now();
    let mode = target.mode();
    info!("event=db_open module=db status=start mode={mode}");

    let opened = match target {
        DbTarget::File(path) => Connection::open(path),
        DbTarget::Memory => Connection::open_in_memory(),
    };
    let mut conn = match opened {
        Ok(conn) => conn,
        Err(err) => {
            error!(
                "event=db_open module=db status=error mode={mode} duration_ms={} error_code=db_open_failed error={}",
                started_at.elapsed().as_millis(),
                err
            );
            return Err(err.into());
        }
    };

    match bootstrap_connection(&mut conn, options, migrations) {
        Ok(()) => {
            info!(
                "event=db_open module=db status=ok mode={mode} duration_ms={}",
                started_at.elapsed().as_millis()
            );
            Ok(conn)
        }
        Err(err) => {
            error!(
                "event=db_open module=db status=error mode={mode} duration_ms={} error_code=db_bootstrap_failed error={}",
                started_at.elapsed().as_millis(),
                err
            );
            Err(err)
        }
    }
}

fn bootstrap_connection(
    conn: &mut Connection,
    options: &ContextOptions,
    migrations: &[Migration],
) -> DbResult<()> {
    let foreign_keys = if options.foreign_keys { "ON" } else { "OFF" };
    conn.execute_batch(&format!("PRAGMA foreign_keys = {foreign_keys};"))?;
    conn.busy_timeout(options.busy_timeout())?;
    apply_migrations(conn, migrations)?;
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {PROCEDURE_CATALOG_TABLE} (
            name TEXT PRIMARY KEY COLLATE NOCASE,
            body TEXT NOT NULL
        );"
    ))?;
    Ok(())
}
