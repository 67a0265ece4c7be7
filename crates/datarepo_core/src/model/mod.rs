//! Entity contract and result-row mapping.
//!
//! # Responsibility
//! - Describe how a domain record maps onto one table.
//! - Map arbitrary result sets onto plain structs and scalars.
//!
//! # Invariants
//! - Column matching is case-insensitive; unmatched columns are ignored.
//! - Entities never carry tracking state themselves.

pub mod columns;
pub mod entity;
