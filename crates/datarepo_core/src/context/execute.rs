//! Statement execution with parameter binding, row mapping and the command
//! timeout.

use super::procedure::BoundParameter;
use crate::error::{DataError, DataResult};
use crate::model::columns::FromColumns;
use log::debug;
use rusqlite::types::{Value, ValueRef};
use rusqlite::{Connection, ErrorCode, Statement};
use std::time::{Duration, Instant};

/// Virtual-machine instructions between deadline checks.
const PROGRESS_CHECK_INTERVAL: i32 = 1_000;

/// Mapped result set plus the raw first row, used for output parameters.
pub(crate) struct MappedRows<R> {
    pub(crate) rows: Vec<R>,
    pub(crate) columns: Vec<String>,
    pub(crate) first_row: Option<Vec<Value>>,
}

/// Interrupts statements on `conn` once `limit` has elapsed; disarmed on drop.
pub(crate) struct CommandDeadline<'conn> {
    conn: &'conn Connection,
    limit: Duration,
}

impl<'conn> CommandDeadline<'conn> {
    /// A limit too large to represent as an `Instant` means no deadline.
    pub(crate) fn arm(conn: &'conn Connection, limit: Duration) -> Self {
        if let Some(deadline) = Instant::now().checked_add(limit) {
            conn.progress_handler(
                PROGRESS_CHECK_INTERVAL,
                Some(move || Instant::now() >= deadline),
            );
        }
        Self { conn, limit }
    }

    /// Maps an interruption caused by this deadline to `Timeout`.
    pub(crate) fn translate(&self, err: DataError) -> DataError {
        match &err {
            DataError::Db(crate::db::DbError::Sqlite(rusqlite::Error::SqliteFailure(
                failure,
                _,
            ))) if failure.code == ErrorCode::OperationInterrupted => {
                DataError::Timeout(self.limit)
            }
            _ => err,
        }
    }
}

impl Drop for CommandDeadline<'_> {
    fn drop(&mut self) {
        self.conn.progress_handler(0, None::<fn() -> bool>);
    }
}

/// Runs `sql` and maps every row onto `R`.
pub(crate) fn query_mapped<R: FromColumns>(
    conn: &Connection,
    sql: &str,
    params: &[BoundParameter],
) -> DataResult<MappedRows<R>> {
    let mut stmt = conn.prepare(sql)?;
    bind_parameters(&mut stmt, params)?;

    let columns: Vec<String> = stmt
        .column_names()
        .into_iter()
        .map(String::from)
        .collect();
    let mut rows = stmt.raw_query();
    let mut mapped = Vec::new();
    let mut first_row = None;

    while let Some(row) = rows.next()? {
        let mut target = R::default();
        let mut raw = Vec::new();
        for (index, column) in columns.iter().enumerate() {
            let value = row.get_ref(index)?;
            if first_row.is_none() {
                raw.push(Value::from(value));
            }
            if matches!(value, ValueRef::Null) {
                continue;
            }
            target
                .assign_column(index, column, value)
                .map_err(|err| DataError::Mapping {
                    column: column.clone(),
                    message: err.to_string(),
                })?;
        }
        if first_row.is_none() {
            first_row = Some(raw);
        }
        mapped.push(target);
    }

    Ok(MappedRows {
        rows: mapped,
        columns,
        first_row,
    })
}

fn bind_parameters(stmt: &mut Statement<'_>, params: &[BoundParameter]) -> DataResult<()> {
    let slots = positional_slots(stmt);
    let slot_count = slots.len();
    let positional_count = params.iter().filter(|param| param.name.is_none()).count();
    let mut slots = slots.into_iter();
    for param in params {
        match param.name.as_deref() {
            Some(name) => match named_index(stmt, name)? {
                Some(index) => stmt.raw_bind_parameter(index, &param.value)?,
                None => debug!(
                    "event=bind_parameter module=context status=skipped reason=unused_name"
                ),
            },
            None => {
                let index = slots.next().ok_or(rusqlite::Error::InvalidParameterCount(
                    positional_count,
                    slot_count,
                ))?;
                stmt.raw_bind_parameter(index, &param.value)?;
            }
        }
    }
    Ok(())
}

/// Slots written as `?` or `?NNN`, in statement order.
fn positional_slots(stmt: &Statement<'_>) -> Vec<usize> {
    (1..=stmt.parameter_count())
        .filter(|&index| {
            stmt.parameter_name(index)
                .map_or(true, |name| name.starts_with('?'))
        })
        .collect()
}

fn named_index(stmt: &Statement<'_>, name: &str) -> DataResult<Option<usize>> {
    for prefix in ['@', ':', '$'] {
        if let Some(index) = stmt.parameter_index(&format!("{prefix}{name}"))? {
            return Ok(Some(index));
        }
    }
    Ok(None)
}
