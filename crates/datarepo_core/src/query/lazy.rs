//! Unmaterialized entity queries.

use super::filter::Filter;
use super::navigation::NavigationPath;
use super::quote_ident;
use crate::context::DataContext;
use crate::error::DataResult;
use crate::model::entity::Entity;
use rusqlite::types::Value;
use std::marker::PhantomData;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

/// Query description over the table of `T`, evaluated on `to_vec`,
/// `first` or `count`.
///
/// With tracking enabled, loaded rows are registered as `Unchanged` in the
/// owning context and already-tracked keys resolve to the tracked value.
/// Without tracking, results are plain copies the context never sees.
pub struct LazyQuery<'ctx, T: Entity> {
    ctx: &'ctx DataContext,
    filter: Option<Filter>,
    includes: Vec<NavigationPath>,
    order: Vec<(String, SortDirection)>,
    limit: Option<u32>,
    offset: u32,
    tracking: bool,
    _entity: PhantomData<fn() -> T>,
}

impl<'ctx, T: Entity> Clone for LazyQuery<'ctx, T> {
    fn clone(&self) -> Self {
        Self {
            ctx: self.ctx,
            filter: self.filter.clone(),
            includes: self.includes.clone(),
            order: self.order.clone(),
            limit: self.limit,
            offset: self.offset,
            tracking: self.tracking,
            _entity: PhantomData,
        }
    }
}

impl<'ctx, T: Entity> LazyQuery<'ctx, T> {
    pub(crate) fn new(ctx: &'ctx DataContext, tracking: bool) -> Self {
        Self {
            ctx,
            filter: None,
            includes: Vec::new(),
            order: Vec::new(),
            limit: None,
            offset: 0,
            tracking,
            _entity: PhantomData,
        }
    }

    /// Adds a predicate; repeated calls are combined with `AND`.
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(filter),
            None => filter,
        });
        self
    }

    /// Adds an eager-loaded navigation, parsed from dotted notation.
    pub fn include(self, path: &str) -> DataResult<Self> {
        Ok(self.include_path(NavigationPath::parse(path)?))
    }

    pub fn include_path(mut self, path: NavigationPath) -> Self {
        self.includes.push(path);
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, direction: SortDirection) -> Self {
        self.order.push((column.into(), direction));
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = offset;
        self
    }

    pub fn tracking(mut self, tracking: bool) -> Self {
        self.tracking = tracking;
        self
    }

    pub fn is_tracking(&self) -> bool {
        self.tracking
    }

    pub fn includes(&self) -> &[NavigationPath] {
        &self.includes
    }

    /// SQL statement and bound values this query will execute.
    pub fn to_sql(&self) -> (String, Vec<Value>) {
        let columns = T::COLUMNS
            .iter()
            .map(|column| quote_ident(column))
            .collect::<Vec<_>>()
            .join(", ");
        let mut sql = format!("SELECT {columns} FROM {}", quote_ident(T::TABLE));
        let mut params = Vec::new();
        self.push_where(&mut sql, &mut params);

        if !self.order.is_empty() {
            let order = self
                .order
                .iter()
                .map(|(column, direction)| {
                    let direction = match direction {
                        SortDirection::Asc => "ASC",
                        SortDirection::Desc => "DESC",
                    };
                    format!("{} {direction}", quote_ident(column))
                })
                .collect::<Vec<_>>()
                .join(", ");
            sql.push_str(" ORDER BY ");
            sql.push_str(&order);
        }

        if let Some(limit) = self.limit {
            sql.push_str(" LIMIT ?");
            params.push(Value::Integer(i64::from(limit)));
            if self.offset > 0 {
                sql.push_str(" OFFSET ?");
                params.push(Value::Integer(i64::from(self.offset)));
            }
        } else if self.offset > 0 {
            sql.push_str(" LIMIT -1 OFFSET ?");
            params.push(Value::Integer(i64::from(self.offset)));
        }

        (sql, params)
    }

    /// Evaluates the query and runs every include in order.
    pub fn to_vec(&self) -> DataResult<Vec<T>> {
        let (sql, params) = self.to_sql();
        let mut entities = self.ctx.load_entities::<T>(&sql, params, self.tracking)?;
        if entities.is_empty() {
            return Ok(entities);
        }
        for path in &self.includes {
            T::include(self.ctx, &mut entities, path, self.tracking)?;
        }
        Ok(entities)
    }

    pub fn first(&self) -> DataResult<Option<T>> {
        let mut single = self.clone();
        single.limit = Some(1);
        Ok(single.to_vec()?.into_iter().next())
    }

    /// Counts matching rows, ignoring paging and includes.
    pub fn count(&self) -> DataResult<u64> {
        let mut sql = format!("SELECT COUNT(*) FROM {}", quote_ident(T::TABLE));
        let mut params = Vec::new();
        self.push_where(&mut sql, &mut params);
        self.ctx.query_count(&sql, params)
    }

    fn push_where(&self, sql: &mut String, params: &mut Vec<Value>) {
        if let Some(filter) = &self.filter {
            sql.push_str(" WHERE ");
            filter.render(sql, params);
        }
    }
}
