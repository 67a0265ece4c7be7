//! Unit-of-work data context over one SQLite connection.
//!
//! # Responsibility
//! - Own the connection for one logical unit of work.
//! - Hand out one tracked `EntitySet` per entity type.
//! - Flush every staged change of every set in one transaction.
//! - Execute raw queries and catalogued stored procedures.
//!
//! # Invariants
//! - Only `persist()` writes entity changes to the store.
//! - A failed `persist()` leaves the change set as it was.
//! - A context is single-threaded; it is neither `Send` nor `Sync`.

mod entity_set;
mod execute;
mod factory;
mod flush;
pub mod procedure;

pub use entity_set::EntitySet;
pub use factory::ContextFactory;
pub use procedure::{build_procedure_command, ParameterDirection, SqlParameter};

use crate::db::{open_target, ContextOptions, DbTarget, Migration, PROCEDURE_CATALOG_TABLE};
use crate::error::{DataError, DataResult, ValidationErrors};
use crate::model::columns::{owned_value, FromColumns};
use crate::model::entity::{Entity, EntityState, EntryId};
use crate::query::{Filter, LazyQuery};
use entity_set::{SetState, StagedSet};
use execute::{query_mapped, CommandDeadline, MappedRows};
use log::{debug, error, info, warn};
use procedure::{bind_all, command_procedure_name, validate_procedure_name, BoundParameter};
use rusqlite::types::Value;
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use std::any::{Any, TypeId};
use std::cell::{Cell, RefCell};
use std::path::Path;
use std::rc::Rc;
use std::time::{Duration, Instant};
use uuid::Uuid;

struct RegisteredSet {
    type_id: TypeId,
    handle: Rc<dyn Any>,
    staged: Rc<dyn StagedSet>,
}

/// One database session plus the change set staged against it.
pub struct DataContext {
    id: Uuid,
    conn: Connection,
    command_timeout: Cell<Duration>,
    sets: RefCell<Vec<RegisteredSet>>,
}

impl DataContext {
    /// Opens a file-backed context, applying `migrations` first.
    pub fn open(
        path: impl AsRef<Path>,
        options: &ContextOptions,
        migrations: &[Migration],
    ) -> DataResult<Self> {
        Self::open_target(
            &DbTarget::File(path.as_ref().to_path_buf()),
            options,
            migrations,
        )
    }

    /// Opens a context over a private in-memory database.
    pub fn open_in_memory(options: &ContextOptions, migrations: &[Migration]) -> DataResult<Self> {
        Self::open_target(&DbTarget::Memory, options, migrations)
    }

    pub fn open_target(
        target: &DbTarget,
        options: &ContextOptions,
        migrations: &[Migration],
    ) -> DataResult<Self> {
        let conn = open_target(target, options, migrations)?;
        let context = Self {
            id: Uuid::new_v4(),
            conn,
            command_timeout: Cell::new(options.command_timeout()),
            sets: RefCell::new(Vec::new()),
        };
        debug!(
            "event=context_open module=context status=ok context_id={} mode={}",
            context.id,
            target.mode()
        );
        Ok(context)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Underlying connection, for schema setup and diagnostics.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn command_timeout(&self) -> Duration {
        self.command_timeout.get()
    }

    pub fn set_command_timeout(&self, timeout: Duration) {
        self.command_timeout.set(timeout);
    }

    /// Returns the tracked collection for `T`, creating it on first use.
    pub fn set<T: Entity>(&self) -> EntitySet<T> {
        if let Some(existing) = self.registered_set::<T>() {
            return existing;
        }

        let state = Rc::new(RefCell::new(SetState::<T>::new()));
        let handle: Rc<dyn Any> = state.clone();
        let staged: Rc<dyn StagedSet> = state.clone();
        self.sets.borrow_mut().push(RegisteredSet {
            type_id: TypeId::of::<T>(),
            handle,
            staged,
        });
        EntitySet::from_state(state)
    }

    /// The set for `T` if one was already created; never registers a new one.
    fn registered_set<T: Entity>(&self) -> Option<EntitySet<T>> {
        let type_id = TypeId::of::<T>();
        self.sets
            .borrow()
            .iter()
            .find(|registered| registered.type_id == type_id)
            .and_then(|registered| {
                Rc::clone(&registered.handle)
                    .downcast::<RefCell<SetState<T>>>()
                    .ok()
            })
            .map(EntitySet::from_state)
    }

    /// Starts a query over the table of `T`.
    pub fn query<T: Entity>(&self, tracking: bool) -> LazyQuery<'_, T> {
        LazyQuery::new(self, tracking)
    }

    /// Point lookup by key, preferring the tracked value when it is
    /// `Unchanged` or `Modified`.
    pub fn find<T: Entity>(&self, key: &T::Key) -> DataResult<Option<T>> {
        let local = self.set::<T>().inner().borrow().find(key);
        if let Some((EntityState::Unchanged | EntityState::Modified, current)) = local {
            return Ok(Some(current));
        }

        let key_value = owned_value(T::KEY_COLUMN, key)?;
        self.query::<T>(true)
            .filter(Filter::eq(T::KEY_COLUMN, key_value))
            .first()
    }

    /// Stages a state transition for `entity`.
    ///
    /// `Modified`, `Deleted` and `Detached` require the entity to be tracked
    /// already; `Unchanged` attaches an untracked entity.
    pub fn mark_state<T: Entity>(
        &self,
        entity: impl Into<Option<T>>,
        state: EntityState,
    ) -> DataResult<EntryId> {
        let entity = entity.into().ok_or_else(|| {
            DataError::InvalidOperation("cannot change the state of a null entity".to_string())
        })?;
        let set = self.set::<T>();
        let entry = set.inner().borrow_mut().mark(entity, state)?;
        debug!(
            "event=mark_state module=context status=ok entity={} state={}",
            T::TABLE,
            state
        );
        Ok(entry)
    }

    /// Overwrites the current value of a tracked entity, leaving its state to
    /// change detection at the next `persist()`.
    pub fn replace_tracked<T: Entity>(&self, entity: T) -> DataResult<EntryId> {
        self.set::<T>().inner().borrow_mut().replace_current(entity)
    }

    pub fn state_of<T: Entity>(&self, key: &T::Key) -> EntityState {
        self.set::<T>().state_of(key)
    }

    /// Whether any set holds staged or detectably modified entities.
    pub fn has_changes(&self) -> bool {
        let sets = self.staged_sets();
        sets.iter().for_each(|set| set.detect_changes());
        sets.iter().any(|set| set.has_changes())
    }

    /// Flushes all staged changes atomically and returns affected rows.
    ///
    /// Inserts and updates run in set-creation order, deletes in reverse
    /// order. On failure nothing is written and every entry keeps its state.
    pub fn persist(&self) -> DataResult<usize> {
        let started_at = Instant::now();
        let sets = self.staged_sets();
        sets.iter().for_each(|set| set.detect_changes());

        if !sets.iter().any(|set| set.has_changes()) {
            debug!(
                "event=persist module=context status=ok context_id={} affected=0 reason=no_changes",
                self.id
            );
            return Ok(0);
        }

        let (added, modified, deleted) = sets.iter().fold((0, 0, 0), |acc, set| {
            let (a, m, d) = set.staged_counts();
            (acc.0 + a, acc.1 + m, acc.2 + d)
        });
        info!(
            "event=persist module=context status=start context_id={} added={added} modified={modified} deleted={deleted}",
            self.id
        );

        let mut validation = ValidationErrors::default();
        for set in &sets {
            set.validate(&mut validation);
        }
        if !validation.is_empty() {
            warn!(
                "event=persist module=context status=error context_id={} error_code=validation_failed failures={} duration_ms={}",
                self.id,
                validation.len(),
                started_at.elapsed().as_millis()
            );
            return Err(DataError::Validation(validation));
        }

        match self.flush(&sets) {
            Ok(affected) => {
                sets.iter().for_each(|set| set.accept_changes());
                info!(
                    "event=persist module=context status=ok context_id={} affected={affected} duration_ms={}",
                    self.id,
                    started_at.elapsed().as_millis()
                );
                Ok(affected)
            }
            Err(err) => {
                sets.iter().for_each(|set| set.discard_pending());
                error!(
                    "event=persist module=context status=error context_id={} error_code={} duration_ms={} error={}",
                    self.id,
                    persist_error_code(&err),
                    started_at.elapsed().as_millis(),
                    err
                );
                Err(err)
            }
        }
    }

    fn flush(&self, sets: &[Rc<dyn StagedSet>]) -> DataResult<usize> {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;
        let mut affected = 0;
        for set in sets {
            affected += set.flush_writes(&tx)?;
        }
        for set in sets.iter().rev() {
            affected += set.flush_deletes(&tx)?;
        }
        tx.commit()?;
        Ok(affected)
    }

    fn staged_sets(&self) -> Vec<Rc<dyn StagedSet>> {
        self.sets
            .borrow()
            .iter()
            .map(|registered| Rc::clone(&registered.staged))
            .collect()
    }

    /// Runs arbitrary parameterised SQL and maps rows onto `R`.
    ///
    /// Results are never tracked, even when `R` is an entity type.
    pub fn execute_raw_query<R: FromColumns>(
        &self,
        sql: &str,
        params: &[SqlParameter],
    ) -> DataResult<Vec<R>> {
        if sql.trim().is_empty() {
            return Err(DataError::ArgumentNull("sql"));
        }
        let bound = bind_all(params)?;
        let mapped = self.run_bounded::<R>("raw_query", "raw", sql, &bound)?;
        Ok(mapped.rows)
    }

    /// Calls procedure `name`, appending every parameter to the command text
    /// as `@name` (plus ` output` for output directions).
    pub fn execute_stored_procedure_list<R: FromColumns>(
        &self,
        name: &str,
        params: &mut [SqlParameter],
    ) -> DataResult<Vec<R>> {
        let command = build_procedure_command(name, params)?;
        self.run_procedure(&command, params, false)
    }

    /// Runs command text as given. A leading catalog procedure name selects
    /// that procedure; anything else runs as a raw query.
    pub fn execute_stored_procedure<R: FromColumns>(
        &self,
        command: &str,
        params: &mut [SqlParameter],
    ) -> DataResult<Vec<R>> {
        self.run_procedure(command, params, true)
    }

    fn run_procedure<R: FromColumns>(
        &self,
        command: &str,
        params: &mut [SqlParameter],
        raw_fallback: bool,
    ) -> DataResult<Vec<R>> {
        if command.trim().is_empty() {
            return Err(DataError::ArgumentNull("command"));
        }
        let bound = bind_all(params)?;

        let name = command_procedure_name(command);
        let body = match name {
            Some(name) => self.procedure_body(name)?,
            None => None,
        };
        let mapped = match (body, name) {
            (Some(body), Some(name)) => {
                self.run_bounded::<R>("procedure_exec", name, &body, &bound)?
            }
            _ if raw_fallback => self.run_bounded::<R>("raw_query", "raw", command, &bound)?,
            _ => {
                return Err(DataError::ProcedureNotFound(
                    name.unwrap_or_else(|| command.trim()).to_string(),
                ))
            }
        };

        write_outputs(params, &mapped);
        Ok(mapped.rows)
    }

    fn run_bounded<R: FromColumns>(
        &self,
        event: &str,
        label: &str,
        sql: &str,
        params: &[BoundParameter],
    ) -> DataResult<MappedRows<R>> {
        let started_at = Instant::now();
        let deadline = CommandDeadline::arm(&self.conn, self.command_timeout());
        let result =
            query_mapped::<R>(&self.conn, sql, params).map_err(|err| deadline.translate(err));
        drop(deadline);

        match result {
            Ok(mapped) => {
                info!(
                    "event={event} module=context status=ok target={label} params={} rows={} duration_ms={}",
                    params.len(),
                    mapped.rows.len(),
                    started_at.elapsed().as_millis()
                );
                Ok(mapped)
            }
            Err(err) => {
                error!(
                    "event={event} module=context status=error target={label} duration_ms={} error={}",
                    started_at.elapsed().as_millis(),
                    err
                );
                Err(err)
            }
        }
    }

    fn procedure_body(&self, name: &str) -> DataResult<Option<String>> {
        let body = self
            .conn
            .query_row(
                &format!("SELECT body FROM {PROCEDURE_CATALOG_TABLE} WHERE name = ?1;"),
                [name],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(body)
    }

    /// Creates or replaces a catalogued procedure.
    ///
    /// The body is one SQL statement using `@name` parameters; it is
    /// compiled once here so syntax errors surface at definition time.
    pub fn create_procedure(&self, name: &str, body: &str) -> DataResult<()> {
        let name = validate_procedure_name(name)?;
        let body = body.trim();
        if body.is_empty() {
            return Err(DataError::ArgumentNull("procedure body"));
        }
        self.conn.prepare(body)?;
        self.conn.execute(
            &format!(
                "INSERT INTO {PROCEDURE_CATALOG_TABLE} (name, body) VALUES (?1, ?2)
                 ON CONFLICT(name) DO UPDATE SET body = excluded.body;"
            ),
            params![name, body],
        )?;
        info!("event=procedure_create module=context status=ok procedure={name}");
        Ok(())
    }

    /// Removes a procedure; returns whether it existed.
    pub fn drop_procedure(&self, name: &str) -> DataResult<bool> {
        let name = validate_procedure_name(name)?;
        let removed = self.conn.execute(
            &format!("DELETE FROM {PROCEDURE_CATALOG_TABLE} WHERE name = ?1;"),
            [name],
        )?;
        Ok(removed > 0)
    }

    /// Loads every `C` whose `column` is one of `keys`; used by navigation
    /// loaders.
    pub fn load_related<C: Entity>(
        &self,
        column: &str,
        keys: Vec<Value>,
        tracking: bool,
    ) -> DataResult<Vec<C>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        self.query::<C>(tracking)
            .filter(Filter::in_list(column, keys))
            .to_vec()
    }

    pub(crate) fn load_entities<T: Entity>(
        &self,
        sql: &str,
        params: Vec<Value>,
        tracking: bool,
    ) -> DataResult<Vec<T>> {
        let bound = positional(params);
        let mapped = query_mapped::<T>(&self.conn, sql, &bound)?;
        if !tracking {
            if let Some(set) = self.registered_set::<T>() {
                let mut state = set.inner().borrow_mut();
                mapped.rows.iter().for_each(|entity| state.note_untracked_copy(entity));
            }
            return Ok(mapped.rows);
        }

        let set = self.set::<T>();
        let mut state = set.inner().borrow_mut();
        let resolved = mapped
            .rows
            .into_iter()
            .map(|entity| state.track_loaded(entity))
            .collect();
        Ok(resolved)
    }

    pub(crate) fn query_count(&self, sql: &str, params: Vec<Value>) -> DataResult<u64> {
        let bound = positional(params);
        let mapped = query_mapped::<i64>(&self.conn, sql, &bound)?;
        let count = mapped.rows.first().copied().unwrap_or(0);
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Releases the connection, reporting close failures.
    ///
    /// Dropping a context releases it as well, silently.
    pub fn close(self) -> DataResult<()> {
        let id = self.id;
        match self.conn.close() {
            Ok(()) => {
                debug!("event=context_close module=context status=ok context_id={id}");
                Ok(())
            }
            Err((_, err)) => {
                error!("event=context_close module=context status=error context_id={id} error={err}");
                Err(err.into())
            }
        }
    }
}

fn positional(params: Vec<Value>) -> Vec<BoundParameter> {
    params
        .into_iter()
        .map(|value| BoundParameter { name: None, value })
        .collect()
}

/// Outputs without a matching column in the first row end up empty.
fn write_outputs<R>(params: &mut [SqlParameter], mapped: &MappedRows<R>) {
    params.iter_mut().for_each(SqlParameter::clear_output);
    let Some(first_row) = mapped.first_row.as_ref() else {
        return;
    };
    for param in params.iter_mut() {
        if !param.direction().is_output() {
            continue;
        }
        let Some(name) = param.name().map(str::to_string) else {
            continue;
        };
        let position = mapped
            .columns
            .iter()
            .position(|column| column.eq_ignore_ascii_case(&name));
        if let Some(value) = position.and_then(|index| first_row.get(index)) {
            param.set_output(value.clone());
        }
    }
}

fn persist_error_code(err: &DataError) -> &'static str {
    match err {
        DataError::Validation(_) => "validation_failed",
        DataError::Concurrency { .. } => "concurrency_conflict",
        _ => "store_error",
    }
}
