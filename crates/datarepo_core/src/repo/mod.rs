//! Generic per-entity repository over a shared `DataContext`.
//!
//! # Responsibility
//! - Offer typed CRUD, filtered and eager-loaded queries and procedure calls.
//! - Validate arguments, then delegate every I/O to the context.
//!
//! # Invariants
//! - `insert`, `update` and `delete` only stage changes; `save_changes`
//!   is the single write path.
//! - Absent entities fail with `ArgumentNull` before the change set is
//!   touched.

pub mod repository;
