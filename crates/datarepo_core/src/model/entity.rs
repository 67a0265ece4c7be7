//! Entity contract and tracking states.
//!
//! # Invariants
//! - `COLUMNS` lists every persisted column, the key column included.
//! - `write_columns` excludes the key and concurrency columns; those are
//!   handled by the flush itself.

use crate::context::DataContext;
use crate::error::{DataError, DataResult, ValidationFailure};
use crate::model::columns::FromColumns;
use crate::query::NavigationPath;
use rusqlite::types::{FromSql, ToSql, Value};
use std::fmt::{Debug, Display, Formatter};
use std::hash::Hash;

/// A domain record persisted in one table.
pub trait Entity: FromColumns + Clone + 'static {
    type Key: ToSql + FromSql + Clone + Eq + Hash + Debug + 'static;

    const TABLE: &'static str;
    const KEY_COLUMN: &'static str;
    const COLUMNS: &'static [&'static str];
    /// Integer version column checked on update/delete, if any.
    const CONCURRENCY_COLUMN: Option<&'static str> = None;

    /// Primary key; `None` until the store generates one.
    fn key(&self) -> Option<Self::Key>;

    /// Receives the store-generated row id after an insert without a key.
    fn on_inserted(&mut self, _rowid: i64) {}

    /// Non-key column values written on insert and update.
    fn write_columns(&self) -> Vec<(&'static str, Value)>;

    /// Entity-level rules checked before a flush.
    fn validate(&self) -> Vec<ValidationFailure> {
        Vec::new()
    }

    fn concurrency_token(&self) -> Option<i64> {
        None
    }

    fn set_concurrency_token(&mut self, _token: i64) {}

    /// Eagerly loads the navigation named by the first segment of `path`
    /// into every entity of `entities`.
    fn include(
        ctx: &DataContext,
        entities: &mut [Self],
        path: &NavigationPath,
        tracking: bool,
    ) -> DataResult<()> {
        let _ = (ctx, entities, tracking);
        Err(DataError::UnknownNavigation {
            entity: Self::TABLE,
            path: path.to_string(),
        })
    }
}

/// Tracking state of one entity inside a `DataContext`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityState {
    /// Not tracked by the context.
    Detached,
    Unchanged,
    Added,
    Modified,
    Deleted,
}

impl EntityState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Detached => "detached",
            Self::Unchanged => "unchanged",
            Self::Added => "added",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
        }
    }

    /// Whether the state is flushed by the next persist.
    pub fn is_staged(self) -> bool {
        matches!(self, Self::Added | Self::Modified | Self::Deleted)
    }
}

impl Display for EntityState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handle to one tracked entry, stable for the context lifetime.
///
/// Returned by inserts so callers can read back store-generated keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryId(pub(crate) u64);

impl Display for EntryId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "entry#{}", self.0)
    }
}

pub(crate) fn describe_key<K: Debug>(key: Option<&K>) -> String {
    match key {
        Some(key) => format!("{key:?}"),
        None => "<unsaved>".to_string(),
    }
}
