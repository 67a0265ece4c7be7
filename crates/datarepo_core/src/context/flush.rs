//! Row-level statements issued while flushing staged entities.
//!
//! # Invariants
//! - Updates and deletes must affect exactly one row, otherwise the batch
//!   fails with `Concurrency`.
//! - Constraint violations become `Validation`; other driver errors pass
//!   through untouched.

use crate::error::{DataError, DataResult, ValidationErrors, ValidationFailure};
use crate::model::columns::owned_value;
use crate::model::entity::{describe_key, Entity};
use crate::query::quote_ident;
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, ErrorCode};

static CONSTRAINT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(NOT NULL|UNIQUE|CHECK|FOREIGN KEY) constraint failed(?::\s*(.+))?$")
        .expect("valid constraint message regex")
});

pub(crate) fn insert_row<T: Entity>(conn: &Connection, entity: &mut T) -> DataResult<()> {
    let mut columns = Vec::new();
    let mut values = Vec::new();

    let key = entity.key();
    if let Some(key) = key.as_ref() {
        columns.push(T::KEY_COLUMN);
        values.push(owned_value(T::KEY_COLUMN, key)?);
    }
    for (column, value) in entity.write_columns() {
        columns.push(column);
        values.push(value);
    }
    let token = T::CONCURRENCY_COLUMN.map(|column| {
        let token = entity.concurrency_token().unwrap_or(1);
        columns.push(column);
        values.push(Value::Integer(token));
        token
    });

    let column_list = columns
        .iter()
        .map(|column| quote_ident(column))
        .collect::<Vec<_>>()
        .join(", ");
    let placeholders = (1..=values.len())
        .map(|index| format!("?{index}"))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "INSERT INTO {} ({column_list}) VALUES ({placeholders});",
        quote_ident(T::TABLE)
    );

    conn.execute(&sql, params_from_iter(values))
        .map_err(translate_write_error::<T>)?;

    if key.is_none() {
        entity.on_inserted(conn.last_insert_rowid());
    }
    if let Some(token) = token {
        entity.set_concurrency_token(token);
    }
    Ok(())
}

/// Writes the full record; returns the new concurrency token, if any.
pub(crate) fn update_row<T: Entity>(conn: &Connection, entity: &T) -> DataResult<Option<i64>> {
    let key = required_key(entity)?;
    let mut assignments = Vec::new();
    let mut values = Vec::new();

    for (column, value) in entity.write_columns() {
        values.push(value);
        assignments.push(format!("{} = ?{}", quote_ident(column), values.len()));
    }
    if let Some(column) = T::CONCURRENCY_COLUMN {
        let quoted = quote_ident(column);
        assignments.push(format!("{quoted} = {quoted} + 1"));
    }
    if assignments.is_empty() {
        return Ok(None);
    }

    values.push(key);
    let mut sql = format!(
        "UPDATE {} SET {} WHERE {} = ?{}",
        quote_ident(T::TABLE),
        assignments.join(", "),
        quote_ident(T::KEY_COLUMN),
        values.len()
    );
    push_token_guard::<T>(entity, &mut sql, &mut values);

    let Some(column) = T::CONCURRENCY_COLUMN else {
        sql.push(';');
        let changed = conn
            .execute(&sql, params_from_iter(values))
            .map_err(translate_write_error::<T>)?;
        ensure_single_row(entity, changed)?;
        return Ok(None);
    };

    // The stored token may differ from the in-memory one when no guard applied.
    sql.push_str(&format!(" RETURNING {};", quote_ident(column)));
    let tokens = returned_tokens::<T>(conn, &sql, values)?;
    ensure_single_row(entity, tokens.len())?;
    Ok(tokens.first().copied())
}

fn returned_tokens<T: Entity>(
    conn: &Connection,
    sql: &str,
    values: Vec<Value>,
) -> DataResult<Vec<i64>> {
    let mut stmt = conn.prepare(sql)?;
    let tokens = stmt
        .query_map(params_from_iter(values), |row| row.get::<_, i64>(0))
        .map_err(translate_write_error::<T>)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(translate_write_error::<T>)?;
    Ok(tokens)
}

pub(crate) fn delete_row<T: Entity>(conn: &Connection, entity: &T) -> DataResult<()> {
    let key = required_key(entity)?;
    let mut values = vec![key];
    let mut sql = format!(
        "DELETE FROM {} WHERE {} = ?1",
        quote_ident(T::TABLE),
        quote_ident(T::KEY_COLUMN)
    );
    push_token_guard::<T>(entity, &mut sql, &mut values);
    sql.push(';');

    let changed = conn
        .execute(&sql, params_from_iter(values))
        .map_err(translate_write_error::<T>)?;
    ensure_single_row(entity, changed)
}

fn required_key<T: Entity>(entity: &T) -> DataResult<Value> {
    let key = entity.key().ok_or_else(|| {
        DataError::InvalidOperation(format!("{} has no key to write against", T::TABLE))
    })?;
    owned_value(T::KEY_COLUMN, &key)
}

fn push_token_guard<T: Entity>(entity: &T, sql: &mut String, values: &mut Vec<Value>) {
    let (Some(column), Some(token)) = (T::CONCURRENCY_COLUMN, entity.concurrency_token()) else {
        return;
    };
    values.push(Value::Integer(token));
    sql.push_str(&format!(" AND {} = ?{}", quote_ident(column), values.len()));
}

fn ensure_single_row<T: Entity>(entity: &T, changed: usize) -> DataResult<()> {
    if changed == 1 {
        return Ok(());
    }
    Err(DataError::Concurrency {
        entity: T::TABLE,
        key: describe_key(entity.key().as_ref()),
    })
}

fn translate_write_error<T: Entity>(err: rusqlite::Error) -> DataError {
    match constraint_failure(T::TABLE, &err) {
        Some(failure) => DataError::Validation(ValidationErrors::new(vec![failure])),
        None => err.into(),
    }
}

/// Extracts a validation failure from a SQLite constraint violation.
pub(crate) fn constraint_failure(table: &str, err: &rusqlite::Error) -> Option<ValidationFailure> {
    let rusqlite::Error::SqliteFailure(failure, message) = err else {
        return None;
    };
    if failure.code != ErrorCode::ConstraintViolation {
        return None;
    }

    let message = message
        .clone()
        .unwrap_or_else(|| "constraint failed".to_string());
    let property = CONSTRAINT_RE
        .captures(&message)
        .and_then(|captures| captures.get(2))
        .map_or_else(|| table.to_string(), |target| target.as_str().to_string());
    Some(ValidationFailure::new(property, message))
}
