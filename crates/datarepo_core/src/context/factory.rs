//! Scoped construction of data contexts.
//!
//! # Responsibility
//! - Capture the store location, options and schema once.
//! - Produce one fresh `DataContext` per unit of work.
//!
//! # Invariants
//! - `scope` releases its context on every exit path, including errors
//!   returned by the closure and failed `persist()` calls inside it.

use super::DataContext;
use crate::db::{ContextOptions, DbTarget, Migration};
use crate::error::DataResult;
use log::warn;

/// Builds request-scoped contexts from one configuration.
#[derive(Debug, Clone)]
pub struct ContextFactory {
    target: DbTarget,
    options: ContextOptions,
    migrations: Vec<Migration>,
}

impl ContextFactory {
    pub fn new(target: DbTarget, options: ContextOptions, migrations: &[Migration]) -> Self {
        Self {
            target,
            options,
            migrations: migrations.to_vec(),
        }
    }

    pub fn target(&self) -> &DbTarget {
        &self.target
    }

    pub fn options(&self) -> &ContextOptions {
        &self.options
    }

    /// Opens a new context; the caller owns its lifetime.
    pub fn create(&self) -> DataResult<DataContext> {
        DataContext::open_target(&self.target, &self.options, &self.migrations)
    }

    /// Runs `work` inside a fresh context and releases it afterwards.
    ///
    /// An error from `work` wins over a close error.
    pub fn scope<R>(&self, work: impl FnOnce(&DataContext) -> DataResult<R>) -> DataResult<R> {
        let context = self.create()?;
        let context_id = context.id();
        let outcome = work(&context);
        let closed = context.close();

        match (outcome, closed) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(close_err)) => Err(close_err),
            (Err(err), closed) => {
                if let Err(close_err) = closed {
                    warn!(
                        "event=scope_release module=context status=error context_id={context_id} error={close_err}"
                    );
                }
                Err(err)
            }
        }
    }
}
