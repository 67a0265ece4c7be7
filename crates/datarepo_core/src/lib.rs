//! Generic unit-of-work data access over SQLite.
//!
//! A `DataContext` owns one connection and the change set staged against it;
//! `ContextRepository<T>` is the typed facade callers use per entity type.

pub mod context;
pub mod db;
pub mod error;
pub mod logging;
pub mod model;
pub mod query;
pub mod repo;

pub use rusqlite;

pub use context::{
    build_procedure_command, ContextFactory, DataContext, EntitySet, ParameterDirection,
    SqlParameter,
};
pub use db::{ContextOptions, DbError, DbResult, DbTarget, Migration};
pub use error::{DataError, DataResult, ValidationErrors, ValidationFailure};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::columns::FromColumns;
pub use model::entity::{Entity, EntityState, EntryId};
pub use query::{CompareOp, Filter, LazyQuery, NavigationPath, SortDirection};
pub use repo::repository::{ContextRepository, Repository};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
