//! Filter predicates rendered to SQL `WHERE` clauses.

use super::quote_ident;
use rusqlite::types::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    fn as_sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

/// Predicate over the columns of one table.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Compare {
        column: String,
        op: CompareOp,
        value: Value,
    },
    Like {
        column: String,
        pattern: String,
    },
    IsNull(String),
    IsNotNull(String),
    InList {
        column: String,
        values: Vec<Value>,
    },
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    /// Caller-written clause with positional `?` placeholders.
    Sql {
        clause: String,
        params: Vec<Value>,
    },
}

impl Filter {
    pub fn compare(column: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        Self::Compare {
            column: column.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Eq, value)
    }

    pub fn ne(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Ne, value)
    }

    pub fn lt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Lt, value)
    }

    pub fn le(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Le, value)
    }

    pub fn gt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Gt, value)
    }

    pub fn ge(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Ge, value)
    }

    pub fn like(column: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::Like {
            column: column.into(),
            pattern: pattern.into(),
        }
    }

    pub fn is_null(column: impl Into<String>) -> Self {
        Self::IsNull(column.into())
    }

    pub fn is_not_null(column: impl Into<String>) -> Self {
        Self::IsNotNull(column.into())
    }

    pub fn in_list(column: impl Into<String>, values: Vec<Value>) -> Self {
        Self::InList {
            column: column.into(),
            values,
        }
    }

    pub fn sql(clause: impl Into<String>, params: Vec<Value>) -> Self {
        Self::Sql {
            clause: clause.into(),
            params,
        }
    }

    /// Conjunction; nested `And`s are flattened.
    pub fn and(self, other: Filter) -> Self {
        match (self, other) {
            (Self::And(mut left), Self::And(right)) => {
                left.extend(right);
                Self::And(left)
            }
            (Self::And(mut left), right) => {
                left.push(right);
                Self::And(left)
            }
            (left, right) => Self::And(vec![left, right]),
        }
    }

    pub fn or(self, other: Filter) -> Self {
        match (self, other) {
            (Self::Or(mut left), Self::Or(right)) => {
                left.extend(right);
                Self::Or(left)
            }
            (Self::Or(mut left), right) => {
                left.push(right);
                Self::Or(left)
            }
            (left, right) => Self::Or(vec![left, right]),
        }
    }

    pub fn negate(self) -> Self {
        Self::Not(Box::new(self))
    }

    /// Appends this predicate to `sql`, pushing bound values in order.
    pub fn render(&self, sql: &mut String, params: &mut Vec<Value>) {
        match self {
            Self::Compare { column, op, value } => {
                sql.push_str(&format!("{} {} ?", quote_ident(column), op.as_sql()));
                params.push(value.clone());
            }
            Self::Like { column, pattern } => {
                sql.push_str(&format!("{} LIKE ?", quote_ident(column)));
                params.push(Value::Text(pattern.clone()));
            }
            Self::IsNull(column) => {
                sql.push_str(&format!("{} IS NULL", quote_ident(column)));
            }
            Self::IsNotNull(column) => {
                sql.push_str(&format!("{} IS NOT NULL", quote_ident(column)));
            }
            Self::InList { column, values } => {
                if values.is_empty() {
                    sql.push_str("1 = 0");
                    return;
                }
                let placeholders = vec!["?"; values.len()].join(", ");
                sql.push_str(&format!("{} IN ({placeholders})", quote_ident(column)));
                params.extend(values.iter().cloned());
            }
            Self::And(filters) => render_group(filters, " AND ", "1 = 1", sql, params),
            Self::Or(filters) => render_group(filters, " OR ", "1 = 0", sql, params),
            Self::Not(inner) => {
                sql.push_str("NOT (");
                inner.render(sql, params);
                sql.push(')');
            }
            Self::Sql { clause, params: bound } => {
                sql.push('(');
                sql.push_str(clause);
                sql.push(')');
                params.extend(bound.iter().cloned());
            }
        }
    }
}

fn render_group(
    filters: &[Filter],
    separator: &str,
    empty: &str,
    sql: &mut String,
    params: &mut Vec<Value>,
) {
    if filters.is_empty() {
        sql.push_str(empty);
        return;
    }
    sql.push('(');
    for (index, filter) in filters.iter().enumerate() {
        if index > 0 {
            sql.push_str(separator);
        }
        filter.render(sql, params);
    }
    sql.push(')');
}
