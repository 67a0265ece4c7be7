//! Per-type tracked collections and their staged changes.
//!
//! # Invariants
//! - Every tracked entry has exactly one state; `Detached` entries are removed.
//! - Keyed entries are indexed once; two entries never share a key.
//! - Flush outcomes are buffered in `pending` and only applied after the
//!   surrounding transaction commits.
//! - A tracked key that a no-tracking query also returned only accepts
//!   updates and deletes again after an explicit attach.

use super::flush::{delete_row, insert_row, update_row};
use crate::error::{DataError, DataResult, ValidationErrors};
use crate::model::entity::{describe_key, Entity, EntityState, EntryId};
use rusqlite::types::Value;
use rusqlite::Connection;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::rc::Rc;

type Snapshot = Vec<(&'static str, Value)>;

struct TrackedEntry<T> {
    state: EntityState,
    current: T,
    original: Snapshot,
}

enum Pending<T> {
    Inserted { entry: EntryId, entity: T },
    Updated { entry: EntryId, token: Option<i64> },
    Deleted { entry: EntryId },
}

pub(crate) struct SetState<T: Entity> {
    entries: BTreeMap<EntryId, TrackedEntry<T>>,
    by_key: HashMap<T::Key, EntryId>,
    /// Tracked keys with an outstanding no-tracking copy.
    untracked_copies: HashSet<T::Key>,
    next_entry: u64,
    pending: Vec<Pending<T>>,
}

impl<T: Entity> SetState<T> {
    pub(crate) fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            by_key: HashMap::new(),
            untracked_copies: HashSet::new(),
            next_entry: 1,
            pending: Vec::new(),
        }
    }

    fn allocate(&mut self) -> EntryId {
        let entry = EntryId(self.next_entry);
        self.next_entry += 1;
        entry
    }

    fn entry_for(&self, entity: &T) -> Option<EntryId> {
        entity
            .key()
            .and_then(|key| self.by_key.get(&key).copied())
    }

    fn track(&mut self, entity: T, state: EntityState) -> EntryId {
        let entry = self.allocate();
        if let Some(key) = entity.key() {
            self.by_key.insert(key, entry);
        }
        let original = entity.write_columns();
        self.entries.insert(
            entry,
            TrackedEntry {
                state,
                current: entity,
                original,
            },
        );
        entry
    }

    fn untrack(&mut self, entry: EntryId) {
        if let Some(removed) = self.entries.remove(&entry) {
            if let Some(key) = removed.current.key() {
                if self.by_key.get(&key) == Some(&entry) {
                    self.by_key.remove(&key);
                    self.untracked_copies.remove(&key);
                }
            }
        }
    }

    /// Records that a no-tracking query handed out a copy of `entity`.
    ///
    /// The copy and the tracked value share a key, so updates for that key
    /// can no longer be attributed to the tracked value.
    pub(crate) fn note_untracked_copy(&mut self, entity: &T) {
        if let Some(key) = entity.key() {
            if self.by_key.contains_key(&key) {
                self.untracked_copies.insert(key);
            }
        }
    }

    /// Entry of a tracked entity that may take a caller-supplied value.
    fn writable_entry(&self, entity: &T) -> DataResult<EntryId> {
        let entry = self.entry_for(entity).ok_or_else(|| not_tracked(entity))?;
        let ambiguous = entity
            .key()
            .is_some_and(|key| self.untracked_copies.contains(&key));
        if ambiguous {
            return Err(DataError::InvalidOperation(format!(
                "{} `{}` was also loaded without tracking; attach the value to update it",
                T::TABLE,
                describe_key(entity.key().as_ref())
            )));
        }
        Ok(entry)
    }

    /// Registers a row loaded by a tracking query, resolving identity.
    pub(crate) fn track_loaded(&mut self, entity: T) -> T {
        if let Some(entry) = self.entry_for(&entity) {
            if let Some(tracked) = self.entries.get(&entry) {
                return tracked.current.clone();
            }
        }
        self.track(entity.clone(), EntityState::Unchanged);
        entity
    }

    /// Applies one state transition requested by a caller.
    pub(crate) fn mark(&mut self, entity: T, state: EntityState) -> DataResult<EntryId> {
        let existing = self.entry_for(&entity);
        match state {
            EntityState::Added => {
                if existing.is_some() {
                    return Err(DataError::InvalidOperation(format!(
                        "{} `{}` is already tracked",
                        T::TABLE,
                        describe_key(entity.key().as_ref())
                    )));
                }
                Ok(self.track(entity, EntityState::Added))
            }
            EntityState::Unchanged => match existing {
                Some(entry) => {
                    if let Some(key) = entity.key() {
                        self.untracked_copies.remove(&key);
                    }
                    if let Some(tracked) = self.entries.get_mut(&entry) {
                        tracked.original = entity.write_columns();
                        tracked.current = entity;
                        tracked.state = EntityState::Unchanged;
                    }
                    Ok(entry)
                }
                None => {
                    if entity.key().is_none() {
                        return Err(DataError::InvalidOperation(format!(
                            "cannot attach {} without a key",
                            T::TABLE
                        )));
                    }
                    Ok(self.track(entity, EntityState::Unchanged))
                }
            },
            EntityState::Modified => {
                let entry = self.writable_entry(&entity)?;
                if let Some(tracked) = self.entries.get_mut(&entry) {
                    tracked.current = entity;
                    if tracked.state != EntityState::Added {
                        tracked.state = EntityState::Modified;
                    }
                }
                Ok(entry)
            }
            EntityState::Deleted => {
                let entry = self.writable_entry(&entity)?;
                let was_added = self
                    .entries
                    .get(&entry)
                    .is_some_and(|tracked| tracked.state == EntityState::Added);
                if was_added {
                    self.untrack(entry);
                } else if let Some(tracked) = self.entries.get_mut(&entry) {
                    tracked.current = entity;
                    tracked.state = EntityState::Deleted;
                }
                Ok(entry)
            }
            EntityState::Detached => {
                let entry = existing.ok_or_else(|| not_tracked(&entity))?;
                self.untrack(entry);
                Ok(entry)
            }
        }
    }

    /// Replaces the current value of a tracked entity without a transition.
    pub(crate) fn replace_current(&mut self, entity: T) -> DataResult<EntryId> {
        let entry = self.writable_entry(&entity)?;
        if let Some(tracked) = self.entries.get_mut(&entry) {
            tracked.current = entity;
        }
        Ok(entry)
    }

    pub(crate) fn find(&self, key: &T::Key) -> Option<(EntityState, T)> {
        let entry = self.by_key.get(key)?;
        self.entries
            .get(entry)
            .map(|tracked| (tracked.state, tracked.current.clone()))
    }

    pub(crate) fn entry_state(&self, entry: EntryId) -> EntityState {
        self.entries
            .get(&entry)
            .map_or(EntityState::Detached, |tracked| tracked.state)
    }

    pub(crate) fn get(&self, entry: EntryId) -> Option<T> {
        self.entries.get(&entry).map(|tracked| tracked.current.clone())
    }

    pub(crate) fn local(&self) -> Vec<T> {
        self.entries
            .values()
            .filter(|tracked| tracked.state != EntityState::Deleted)
            .map(|tracked| tracked.current.clone())
            .collect()
    }

    pub(crate) fn count_in(&self, state: EntityState) -> usize {
        self.entries
            .values()
            .filter(|tracked| tracked.state == state)
            .count()
    }
}

fn not_tracked<T: Entity>(entity: &T) -> DataError {
    DataError::NotTracked {
        entity: T::TABLE,
        key: describe_key(entity.key().as_ref()),
    }
}

/// Shared handle to the tracked collection of `T` in one context.
pub struct EntitySet<T: Entity> {
    state: Rc<RefCell<SetState<T>>>,
}

impl<T: Entity> Clone for EntitySet<T> {
    fn clone(&self) -> Self {
        Self {
            state: Rc::clone(&self.state),
        }
    }
}

impl<T: Entity> EntitySet<T> {
    pub(crate) fn from_state(state: Rc<RefCell<SetState<T>>>) -> Self {
        Self { state }
    }

    pub(crate) fn inner(&self) -> &RefCell<SetState<T>> {
        &self.state
    }

    /// Tracked, non-deleted values in tracking order.
    pub fn local(&self) -> Vec<T> {
        self.state.borrow().local()
    }

    pub fn state_of(&self, key: &T::Key) -> EntityState {
        self.state
            .borrow()
            .find(key)
            .map_or(EntityState::Detached, |(state, _)| state)
    }

    pub fn entry_state(&self, entry: EntryId) -> EntityState {
        self.state.borrow().entry_state(entry)
    }

    /// Current value of a tracked entry, including store-generated keys once
    /// persisted.
    pub fn get(&self, entry: EntryId) -> Option<T> {
        self.state.borrow().get(entry)
    }

    pub fn count_in(&self, state: EntityState) -> usize {
        self.state.borrow().count_in(state)
    }

    /// Whether this set is the same collection as `other`.
    pub fn same_set(&self, other: &EntitySet<T>) -> bool {
        Rc::ptr_eq(&self.state, &other.state)
    }
}

/// Type-erased view used by `persist()` to flush every set of a context.
pub(crate) trait StagedSet {
    fn table(&self) -> &'static str;
    fn detect_changes(&self);
    fn has_changes(&self) -> bool;
    fn staged_counts(&self) -> (usize, usize, usize);
    fn validate(&self, errors: &mut ValidationErrors);
    fn flush_writes(&self, conn: &Connection) -> DataResult<usize>;
    fn flush_deletes(&self, conn: &Connection) -> DataResult<usize>;
    fn accept_changes(&self);
    fn discard_pending(&self);
}

impl<T: Entity> StagedSet for RefCell<SetState<T>> {
    fn table(&self) -> &'static str {
        T::TABLE
    }

    fn detect_changes(&self) {
        let mut set = self.borrow_mut();
        for tracked in set.entries.values_mut() {
            if tracked.state == EntityState::Unchanged
                && tracked.current.write_columns() != tracked.original
            {
                tracked.state = EntityState::Modified;
            }
        }
    }

    fn has_changes(&self) -> bool {
        self.borrow()
            .entries
            .values()
            .any(|tracked| tracked.state.is_staged())
    }

    fn staged_counts(&self) -> (usize, usize, usize) {
        let set = self.borrow();
        (
            set.count_in(EntityState::Added),
            set.count_in(EntityState::Modified),
            set.count_in(EntityState::Deleted),
        )
    }

    fn validate(&self, errors: &mut ValidationErrors) {
        let set = self.borrow();
        for tracked in set.entries.values() {
            if matches!(tracked.state, EntityState::Added | EntityState::Modified) {
                errors.extend(tracked.current.validate());
            }
        }
    }

    fn flush_writes(&self, conn: &Connection) -> DataResult<usize> {
        let mut set = self.borrow_mut();
        let mut affected = 0;
        let mut pending = Vec::new();

        for (entry, tracked) in &set.entries {
            match tracked.state {
                EntityState::Added => {
                    let mut inserted = tracked.current.clone();
                    insert_row(conn, &mut inserted)?;
                    pending.push(Pending::Inserted {
                        entry: *entry,
                        entity: inserted,
                    });
                    affected += 1;
                }
                EntityState::Modified => {
                    let token = update_row(conn, &tracked.current)?;
                    pending.push(Pending::Updated {
                        entry: *entry,
                        token,
                    });
                    affected += 1;
                }
                _ => {}
            }
        }

        set.pending.extend(pending);
        Ok(affected)
    }

    fn flush_deletes(&self, conn: &Connection) -> DataResult<usize> {
        let mut set = self.borrow_mut();
        let mut affected = 0;
        let mut pending = Vec::new();

        for (entry, tracked) in &set.entries {
            if tracked.state == EntityState::Deleted {
                delete_row(conn, &tracked.current)?;
                pending.push(Pending::Deleted { entry: *entry });
                affected += 1;
            }
        }

        set.pending.extend(pending);
        Ok(affected)
    }

    fn accept_changes(&self) {
        let mut set = self.borrow_mut();
        let pending = std::mem::take(&mut set.pending);
        for outcome in pending {
            match outcome {
                Pending::Inserted { entry, entity } => {
                    if let Some(key) = entity.key() {
                        set.by_key.insert(key, entry);
                    }
                    if let Some(tracked) = set.entries.get_mut(&entry) {
                        tracked.original = entity.write_columns();
                        tracked.current = entity;
                        tracked.state = EntityState::Unchanged;
                    }
                }
                Pending::Updated { entry, token } => {
                    if let Some(tracked) = set.entries.get_mut(&entry) {
                        if let Some(token) = token {
                            tracked.current.set_concurrency_token(token);
                        }
                        tracked.original = tracked.current.write_columns();
                        tracked.state = EntityState::Unchanged;
                    }
                }
                Pending::Deleted { entry } => set.untrack(entry),
            }
        }
    }

    fn discard_pending(&self) {
        self.borrow_mut().pending.clear();
    }
}
