//! Stored-procedure parameters and command text.
//!
//! # Responsibility
//! - Model named/positional parameters with their direction.
//! - Build `name @p1, @p2 output` command text.
//! - Resolve the procedure name from command text.
//!
//! # Invariants
//! - Parameter values are converted before any statement is prepared.
//! - Output values are only written for `Out`/`InOut` parameters.

use crate::error::{DataError, DataResult};
use crate::model::columns::owned_value;
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::types::{ToSql, Value};
use std::fmt::{Debug, Formatter};

static PROCEDURE_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_.]*$").expect("valid procedure name regex"));
static PARAMETER_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid parameter name regex"));
static COMMAND_HEAD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:(?i:exec|execute)\s+)?([A-Za-z_][A-Za-z0-9_.]*)")
        .expect("valid command head regex")
});

/// Direction of a bound parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterDirection {
    In,
    Out,
    InOut,
}

impl ParameterDirection {
    pub fn is_output(self) -> bool {
        matches!(self, Self::Out | Self::InOut)
    }
}

/// One parameter of a procedure call or raw query.
///
/// Unnamed parameters bind positionally, in the order they are given.
pub struct SqlParameter {
    name: Option<String>,
    direction: ParameterDirection,
    value: Box<dyn ToSql>,
    output: Option<Value>,
}

impl SqlParameter {
    pub fn input(name: impl Into<String>, value: impl ToSql + 'static) -> Self {
        Self::named(name, ParameterDirection::In, value)
    }

    pub fn output(name: impl Into<String>) -> Self {
        Self::named(name, ParameterDirection::Out, Value::Null)
    }

    pub fn input_output(name: impl Into<String>, value: impl ToSql + 'static) -> Self {
        Self::named(name, ParameterDirection::InOut, value)
    }

    pub fn positional(value: impl ToSql + 'static) -> Self {
        Self {
            name: None,
            direction: ParameterDirection::In,
            value: Box::new(value),
            output: None,
        }
    }

    fn named(
        name: impl Into<String>,
        direction: ParameterDirection,
        value: impl ToSql + 'static,
    ) -> Self {
        let name = name.into();
        let trimmed = name.trim().trim_start_matches(['@', ':', '$']).to_string();
        Self {
            name: if trimmed.is_empty() { None } else { Some(trimmed) },
            direction,
            value: Box::new(value),
            output: None,
        }
    }

    /// Name without its `@`/`:`/`$` prefix.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn direction(&self) -> ParameterDirection {
        self.direction
    }

    /// Value written back by the last call, for output parameters.
    pub fn output_value(&self) -> Option<&Value> {
        self.output.as_ref()
    }

    pub(crate) fn clear_output(&mut self) {
        self.output = None;
    }

    pub(crate) fn set_output(&mut self, value: Value) {
        if self.direction.is_output() {
            self.output = Some(value);
        }
    }

    pub(crate) fn bind(&self) -> DataResult<BoundParameter> {
        let label = self.name.as_deref().unwrap_or("?");
        if let Some(name) = self.name.as_deref() {
            if !PARAMETER_NAME_RE.is_match(name) {
                return Err(DataError::UnsupportedParameterType {
                    parameter: name.to_string(),
                    reason: "parameter names must be plain identifiers".to_string(),
                });
            }
        }
        Ok(BoundParameter {
            name: self.name.clone(),
            value: owned_value(label, self.value.as_ref())?,
        })
    }
}

impl Debug for SqlParameter {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlParameter")
            .field("name", &self.name)
            .field("direction", &self.direction)
            .field("output", &self.output)
            .finish_non_exhaustive()
    }
}

/// Parameter converted to an owned value, ready for binding.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct BoundParameter {
    pub(crate) name: Option<String>,
    pub(crate) value: Value,
}

pub(crate) fn bind_all(params: &[SqlParameter]) -> DataResult<Vec<BoundParameter>> {
    params.iter().map(SqlParameter::bind).collect()
}

pub(crate) fn validate_procedure_name(name: &str) -> DataResult<&str> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(DataError::ArgumentNull("procedure name"));
    }
    if !PROCEDURE_NAME_RE.is_match(trimmed) {
        return Err(DataError::InvalidOperation(format!(
            "invalid stored procedure name `{trimmed}`"
        )));
    }
    Ok(trimmed)
}

/// Builds `name @a, @b output` command text for a procedure call.
///
/// Every parameter must be named; `Out` and `InOut` parameters get the
/// ` output` suffix.
pub fn build_procedure_command(name: &str, params: &[SqlParameter]) -> DataResult<String> {
    let mut command = validate_procedure_name(name)?.to_string();
    for (index, param) in params.iter().enumerate() {
        let param_name = param
            .name()
            .ok_or(DataError::ArgumentNull("parameter name"))?;
        command.push_str(if index == 0 { " " } else { ", " });
        command.push('@');
        command.push_str(param_name);
        if param.direction().is_output() {
            command.push_str(" output");
        }
    }
    Ok(command)
}

/// First identifier of a command, skipping an optional `EXEC`/`EXECUTE`.
pub(crate) fn command_procedure_name(command: &str) -> Option<&str> {
    COMMAND_HEAD_RE
        .captures(command)
        .and_then(|captures| captures.get(1))
        .map(|name| name.as_str())
}

#[cfg(test)]
mod tests {
    use super::{build_procedure_command, command_procedure_name, SqlParameter};
    use crate::error::DataError;
    use rusqlite::types::Value;

    #[test]
    fn output_parameter_gets_output_suffix() {
        let params = [
            SqlParameter::input("customerId", 7_i64),
            SqlParameter::output("@total"),
        ];
        let command = build_procedure_command("GetOrderTotal", &params).unwrap();
        assert_eq!(command, "GetOrderTotal @customerId, @total output");
    }

    #[test]
    fn input_parameter_has_no_suffix() {
        let params = [SqlParameter::input("name", "ada".to_string())];
        let command = build_procedure_command("FindCustomer", &params).unwrap();
        assert_eq!(command, "FindCustomer @name");
    }

    #[test]
    fn input_output_parameter_counts_as_output() {
        let params = [
            SqlParameter::input("a", 1_i64),
            SqlParameter::input_output("b", 2_i64),
        ];
        let command = build_procedure_command("Swap", &params).unwrap();
        assert_eq!(command, "Swap @a, @b output");
    }

    #[test]
    fn unnamed_procedure_parameter_is_argument_null() {
        let params = [SqlParameter::positional(1_i64)];
        let err = build_procedure_command("Proc", &params).unwrap_err();
        assert!(matches!(err, DataError::ArgumentNull("parameter name")));
    }

    #[test]
    fn command_head_skips_exec_keyword() {
        assert_eq!(command_procedure_name("EXEC dbo.Report @a"), Some("dbo.Report"));
        assert_eq!(command_procedure_name("  Report"), Some("Report"));
        assert_eq!(command_procedure_name("SELECT 1"), Some("SELECT"));
        assert_eq!(command_procedure_name("@x"), None);
    }

    #[test]
    fn binding_rejects_unconvertible_values_and_odd_names() {
        let too_big = SqlParameter::input("n", u64::MAX);
        assert!(matches!(
            too_big.bind(),
            Err(DataError::UnsupportedParameterType { .. })
        ));

        let spaced = SqlParameter::input("two words", 1_i64);
        assert!(matches!(
            spaced.bind(),
            Err(DataError::UnsupportedParameterType { .. })
        ));

        let ok = SqlParameter::input("@n", 3_i64).bind().unwrap();
        assert_eq!(ok.name.as_deref(), Some("n"));
        assert_eq!(ok.value, Value::Integer(3));
    }

    #[test]
    fn output_value_is_only_kept_for_output_directions() {
        let mut input = SqlParameter::input("a", 1_i64);
        input.set_output(Value::Integer(9));
        assert!(input.output_value().is_none());

        let mut output = SqlParameter::output("b");
        output.set_output(Value::Integer(9));
        assert_eq!(output.output_value(), Some(&Value::Integer(9)));
    }
}
