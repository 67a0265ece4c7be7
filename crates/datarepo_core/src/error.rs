//! Error taxonomy for data-context and repository operations.
//!
//! # Invariants
//! - Argument errors are raised before any store interaction.
//! - Validation and concurrency failures carry aggregated detail; every other
//!   driver failure passes through as `Db` unmodified.

use crate::db::DbError;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Duration;

pub type DataResult<T> = Result<T, DataError>;

/// One rejected (property, rule) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationFailure {
    pub property: String,
    pub message: String,
}

impl ValidationFailure {
    pub fn new(property: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            message: message.into(),
        }
    }
}

impl Display for ValidationFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Property: {} Error: {}", self.property, self.message)
    }
}

/// All validation failures found in one persist batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors {
    failures: Vec<ValidationFailure>,
}

impl ValidationErrors {
    pub fn new(failures: Vec<ValidationFailure>) -> Self {
        Self { failures }
    }

    pub fn failures(&self) -> &[ValidationFailure] {
        &self.failures
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub(crate) fn extend(&mut self, failures: impl IntoIterator<Item = ValidationFailure>) {
        self.failures.extend(failures);
    }
}

impl Display for ValidationErrors {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for (index, failure) in self.failures.iter().enumerate() {
            if index > 0 {
                writeln!(f)?;
            }
            write!(f, "{failure}")?;
        }
        Ok(())
    }
}

/// Error returned by every `DataContext` and `Repository` operation.
#[derive(Debug)]
pub enum DataError {
    /// A required argument was absent.
    ArgumentNull(&'static str),
    /// The call is not valid for the current context state.
    InvalidOperation(String),
    /// A command parameter could not be bound.
    UnsupportedParameterType { parameter: String, reason: String },
    /// The store or entity rules rejected staged data.
    Validation(ValidationErrors),
    /// A staged update/delete matched no row with the expected version.
    Concurrency { entity: &'static str, key: String },
    /// The entity is not tracked by this context.
    NotTracked { entity: &'static str, key: String },
    /// The entity type has no navigation with this path.
    UnknownNavigation { entity: &'static str, path: String },
    ProcedureNotFound(String),
    /// The statement exceeded the context command timeout.
    Timeout(Duration),
    /// A result column could not be converted into the target field.
    Mapping { column: String, message: String },
    Db(DbError),
}

impl DataError {
    /// Validation failures, when this is a validation error.
    pub fn validation_failures(&self) -> Option<&[ValidationFailure]> {
        match self {
            Self::Validation(errors) => Some(errors.failures()),
            _ => None,
        }
    }
}

impl Display for DataError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ArgumentNull(argument) => write!(f, "value cannot be null: {argument}"),
            Self::InvalidOperation(message) => write!(f, "invalid operation: {message}"),
            Self::UnsupportedParameterType { parameter, reason } => {
                write!(f, "unsupported parameter type for `{parameter}`: {reason}")
            }
            Self::Validation(errors) => write!(f, "{errors}"),
            Self::Concurrency { entity, key } => write!(
                f,
                "store update affected an unexpected number of rows for {entity} `{key}`; \
                 the record was modified or deleted since it was loaded"
            ),
            Self::NotTracked { entity, key } => {
                write!(f, "{entity} `{key}` is not tracked by this context")
            }
            Self::UnknownNavigation { entity, path } => {
                write!(f, "{entity} has no navigation `{path}`")
            }
            Self::ProcedureNotFound(name) => write!(f, "stored procedure not found: {name}"),
            Self::Timeout(limit) => {
                write!(f, "command exceeded timeout of {}s", limit.as_secs())
            }
            Self::Mapping { column, message } => {
                write!(f, "cannot map column `{column}`: {message}")
            }
            Self::Db(err) => write!(f, "{err}"),
        }
    }
}

impl Error for DataError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for DataError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for DataError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<ValidationErrors> for DataError {
    fn from(value: ValidationErrors) -> Self {
        Self::Validation(value)
    }
}
