//! Column-to-field mapping for raw-query and procedure results.

use crate::error::{DataError, DataResult};
use rusqlite::types::{FromSql, FromSqlResult, ToSql, ToSqlOutput, Value, ValueRef};

/// Target type of a mapped result row.
///
/// The mapper starts from `Default::default()` and offers every non-NULL
/// column of the row. Implementations return `Ok(false)` for columns they do
/// not recognise; those columns are skipped without error.
pub trait FromColumns: Default {
    fn assign_column(
        &mut self,
        index: usize,
        column: &str,
        value: ValueRef<'_>,
    ) -> FromSqlResult<bool>;
}

/// Implements [`FromColumns`] for a struct by matching field names to column
/// names, ignoring ASCII case.
///
/// ```ignore
/// #[derive(Default)]
/// struct CustomerRow { id: i64, name: String, extra: Option<String> }
/// datarepo_core::impl_from_columns!(CustomerRow { id, name, extra });
/// ```
#[macro_export]
macro_rules! impl_from_columns {
    ($ty:ty { $($field:ident),+ $(,)? }) => {
        impl $crate::FromColumns for $ty {
            fn assign_column(
                &mut self,
                _index: usize,
                column: &str,
                value: $crate::rusqlite::types::ValueRef<'_>,
            ) -> $crate::rusqlite::types::FromSqlResult<bool> {
                $(
                    if column.eq_ignore_ascii_case(stringify!($field)) {
                        self.$field = $crate::rusqlite::types::FromSql::column_result(value)?;
                        return Ok(true);
                    }
                )+
                Ok(false)
            }
        }
    };
}

macro_rules! impl_scalar_from_columns {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl FromColumns for $ty {
                fn assign_column(
                    &mut self,
                    index: usize,
                    _column: &str,
                    value: ValueRef<'_>,
                ) -> FromSqlResult<bool> {
                    if index != 0 {
                        return Ok(false);
                    }
                    *self = FromSql::column_result(value)?;
                    Ok(true)
                }
            }
        )+
    };
}

// Scalar element types take the first column of each row.
impl_scalar_from_columns!(i64, i32, u32, f64, bool, String, Vec<u8>);

/// Converts a bindable value into an owned SQLite value.
pub(crate) fn owned_value(name: &str, value: &dyn ToSql) -> DataResult<Value> {
    let output = value
        .to_sql()
        .map_err(|err| DataError::UnsupportedParameterType {
            parameter: name.to_string(),
            reason: err.to_string(),
        })?;
    match output {
        ToSqlOutput::Borrowed(value_ref) => Ok(Value::from(value_ref)),
        ToSqlOutput::Owned(value) => Ok(value),
        _ => Err(DataError::UnsupportedParameterType {
            parameter: name.to_string(),
            reason: "only plain values can be bound".to_string(),
        }),
    }
}
