//! Repository contract and its `DataContext`-backed implementation.

use crate::context::{DataContext, EntitySet, SqlParameter};
use crate::error::{DataError, DataResult};
use crate::model::columns::FromColumns;
use crate::model::entity::{Entity, EntityState, EntryId};
use crate::query::{Filter, LazyQuery, NavigationPath};
use log::debug;
use once_cell::unsync::OnceCell;

/// Typed data-access facade for one entity type.
///
/// Mutating methods accept `T` or `Option<T>`; `None` is rejected with
/// `ArgumentNull`.
pub trait Repository<T: Entity> {
    /// Point lookup by key; `None` when absent.
    fn get_by_id(&self, id: &T::Key) -> DataResult<Option<T>>;

    /// Unfiltered query; `track_changes = false` yields read-only copies.
    fn query_all(&self, track_changes: bool) -> LazyQuery<'_, T>;

    /// Tracking query over the whole table.
    fn table(&self) -> LazyQuery<'_, T> {
        self.query_all(true)
    }

    fn as_no_tracking(&self) -> LazyQuery<'_, T> {
        self.query_all(false)
    }

    /// Tracking query with an optional filter and eager-loaded navigations,
    /// applied in the order given.
    fn query(&self, filter: Option<Filter>, includes: &[&str]) -> DataResult<LazyQuery<'_, T>>;

    /// Stages `entity` as added.
    fn insert<E: Into<Option<T>>>(&self, entity: E) -> DataResult<EntryId>;

    /// Stages a whole-record overwrite of a tracked entity.
    ///
    /// With `change_state = false` the tracked value is replaced without a
    /// state transition and the next save detects whether it changed.
    fn update<E: Into<Option<T>>>(&self, entity: E, change_state: bool) -> DataResult<()>;

    /// Stages removal of a tracked entity.
    fn delete<E: Into<Option<T>>>(&self, entity: E) -> DataResult<()>;

    /// Flushes the shared context; returns affected rows.
    fn save_changes(&self) -> DataResult<usize>;

    fn execute_stored_procedure_list<R: FromColumns>(
        &self,
        name: &str,
        params: &mut [SqlParameter],
    ) -> DataResult<Vec<R>>;

    fn execute_stored_procedure<R: FromColumns>(
        &self,
        command: &str,
        params: &mut [SqlParameter],
    ) -> DataResult<Vec<R>>;
}

/// Repository bound to a borrowed `DataContext`.
///
/// Several repositories over one context share its change set, so their
/// staged changes commit or fail together.
pub struct ContextRepository<'ctx, T: Entity> {
    context: &'ctx DataContext,
    entities: OnceCell<EntitySet<T>>,
}

impl<'ctx, T: Entity> ContextRepository<'ctx, T> {
    pub fn new(context: &'ctx DataContext) -> Self {
        Self {
            context,
            entities: OnceCell::new(),
        }
    }

    pub fn context(&self) -> &'ctx DataContext {
        self.context
    }

    /// Tracked collection handle, resolved on first use.
    pub fn entities(&self) -> &EntitySet<T> {
        self.entities.get_or_init(|| self.context.set::<T>())
    }

    /// Starts tracking an entity loaded elsewhere as `Unchanged`.
    pub fn attach<E: Into<Option<T>>>(&self, entity: E) -> DataResult<EntryId> {
        let entity = required(entity)?;
        self.context.mark_state::<T>(entity, EntityState::Unchanged)
    }

    /// Tracked, non-deleted entities of this type.
    pub fn local(&self) -> Vec<T> {
        self.entities().local()
    }

    /// Current tracked value of `entry`, with its store key once saved.
    pub fn tracked(&self, entry: EntryId) -> Option<T> {
        self.entities().get(entry)
    }

    pub fn state_of(&self, id: &T::Key) -> EntityState {
        self.entities().state_of(id)
    }
}

impl<T: Entity> Repository<T> for ContextRepository<'_, T> {
    fn get_by_id(&self, id: &T::Key) -> DataResult<Option<T>> {
        self.context.find::<T>(id)
    }

    fn query_all(&self, track_changes: bool) -> LazyQuery<'_, T> {
        self.context.query::<T>(track_changes)
    }

    fn query(&self, filter: Option<Filter>, includes: &[&str]) -> DataResult<LazyQuery<'_, T>> {
        let mut query = self.context.query::<T>(true);
        if let Some(filter) = filter {
            query = query.filter(filter);
        }
        for include in includes {
            query = query.include_path(NavigationPath::parse(include)?);
        }
        Ok(query)
    }

    fn insert<E: Into<Option<T>>>(&self, entity: E) -> DataResult<EntryId> {
        let entity = required(entity)?;
        let entry = self.context.mark_state::<T>(entity, EntityState::Added)?;
        debug!(
            "event=repo_insert module=repo status=ok entity={} entry={entry}",
            T::TABLE
        );
        Ok(entry)
    }

    fn update<E: Into<Option<T>>>(&self, entity: E, change_state: bool) -> DataResult<()> {
        let entity = required(entity)?;
        if change_state {
            self.context.mark_state::<T>(entity, EntityState::Modified)?;
        } else {
            self.context.replace_tracked::<T>(entity)?;
        }
        Ok(())
    }

    fn delete<E: Into<Option<T>>>(&self, entity: E) -> DataResult<()> {
        let entity = required(entity)?;
        self.context.mark_state::<T>(entity, EntityState::Deleted)?;
        Ok(())
    }

    fn save_changes(&self) -> DataResult<usize> {
        self.context.persist()
    }

    fn execute_stored_procedure_list<R: FromColumns>(
        &self,
        name: &str,
        params: &mut [SqlParameter],
    ) -> DataResult<Vec<R>> {
        self.context.execute_stored_procedure_list(name, params)
    }

    fn execute_stored_procedure<R: FromColumns>(
        &self,
        command: &str,
        params: &mut [SqlParameter],
    ) -> DataResult<Vec<R>> {
        self.context.execute_stored_procedure(command, params)
    }
}

fn required<T, E: Into<Option<T>>>(entity: E) -> DataResult<T> {
    entity.into().ok_or(DataError::ArgumentNull("entity"))
}
