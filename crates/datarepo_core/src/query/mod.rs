//! Composable, lazily evaluated entity queries.
//!
//! # Responsibility
//! - Describe filters, ordering, paging and eager-loaded navigations.
//! - Render parameterised SQL; nothing touches the store until evaluation.
//!
//! # Invariants
//! - Identifiers are always quoted; values are always bound, never inlined.
//! - Includes run in the order given, after the root rows are loaded.

pub mod filter;
pub mod lazy;
pub mod navigation;

pub use filter::{CompareOp, Filter};
pub use lazy::{LazyQuery, SortDirection};
pub use navigation::NavigationPath;

/// Quotes a SQLite identifier.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
