//! In-memory cache of column task lists.
//!
//! Storage is canonical: exactly one list per [`ColumnKey`]. Every other key
//! shape ([`ScopeKey::Status`], [`ScopeKey::Named`]) resolves to that list, so
//! all aliases of a column always read back the same order. Lists are
//! replaced wholesale under a write lock; readers get an owned snapshot and can
//! never observe a half-applied move.
//!
//! Each column carries a version bumped on every write and on every
//! invalidation. Writers that computed their update from an older read
//! (rollback, refresh) use [`TaskStoreView::apply_if_unchanged`] so they never
//! clobber a newer write, nor restore a list that was already known to be out
//! of date.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use tokio::sync::mpsc;

use taskboard_proto::task::{Task, TaskId};

use super::{BoardEvent, ColumnKey, Scope, ScopeKey};

/// Errors from cache writes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The key is a named alias that was never registered.
    #[error("unknown cache key: {0}")]
    UnknownAlias(ScopeKey),
}

#[derive(Debug, Default)]
struct ColumnEntry {
    tasks: Vec<Task>,
    version: u64,
    stale: bool,
    needs_renumber: bool,
}

#[derive(Debug, Default)]
struct StoreState {
    columns: HashMap<ColumnKey, ColumnEntry>,
    named: HashMap<String, ColumnKey>,
}

impl StoreState {
    fn bump(&mut self, column: ColumnKey, tasks: Vec<Task>) -> u64 {
        let entry = self.columns.entry(column).or_default();
        entry.tasks = tasks;
        entry.version += 1;
        entry.version
    }

    fn version(&self, column: ColumnKey) -> u64 {
        self.columns.get(&column).map_or(0, |entry| entry.version)
    }
}

/// The board's task cache, shared by the coordinator and the rendering layer.
pub struct TaskStoreView {
    scope: Scope,
    state: RwLock<StoreState>,
    events: mpsc::Sender<BoardEvent>,
}

impl TaskStoreView {
    /// Creates an empty cache for a session scope.
    ///
    /// Returns the store and the receiver for [`BoardEvent`]s that the UI
    /// layer should consume.
    #[must_use]
    pub fn new(scope: Scope, event_buffer: usize) -> (Self, mpsc::Receiver<BoardEvent>) {
        let (events, rx) = mpsc::channel(event_buffer.max(1));
        let store = Self {
            scope,
            state: RwLock::new(StoreState::default()),
            events,
        };
        (store, rx)
    }

    /// The session scope that status-only keys resolve against.
    #[must_use]
    pub const fn scope(&self) -> Scope {
        self.scope
    }

    /// Resolves any key to its canonical column.
    #[must_use]
    pub fn resolve(&self, key: &ScopeKey) -> Option<ColumnKey> {
        match key {
            ScopeKey::Column(column) => Some(*column),
            ScopeKey::Status(status) => Some(ColumnKey::new(*status, self.scope)),
            ScopeKey::Named(name) => self.state.read().named.get(name).copied(),
        }
    }

    /// Registers a named per-filter key as an alias of `column`.
    ///
    /// Re-registering a name points it at the new column.
    pub fn register_alias(&self, name: impl Into<String>, column: ColumnKey) {
        let name = name.into();
        tracing::debug!(alias = %name, column = %column, "cache alias registered");
        self.state.write().named.insert(name, column);
    }

    /// Every key that addresses `column`.
    #[must_use]
    pub fn all_keys_for(&self, column: ColumnKey) -> HashSet<ScopeKey> {
        let mut keys = HashSet::from([ScopeKey::Column(column)]);
        if column.scope == self.scope {
            keys.insert(ScopeKey::Status(column.status));
        }
        let state = self.state.read();
        keys.extend(
            state
                .named
                .iter()
                .filter(|(_, target)| **target == column)
                .map(|(name, _)| ScopeKey::Named(name.clone())),
        );
        keys
    }

    /// Snapshot of the list behind `key`. Unknown or never-loaded keys read
    /// as empty.
    #[must_use]
    pub fn read(&self, key: &ScopeKey) -> Vec<Task> {
        self.resolve(key)
            .map(|column| self.column(column))
            .unwrap_or_default()
    }

    /// Snapshot of a column's list.
    #[must_use]
    pub fn column(&self, column: ColumnKey) -> Vec<Task> {
        self.state
            .read()
            .columns
            .get(&column)
            .map(|entry| entry.tasks.clone())
            .unwrap_or_default()
    }

    /// Snapshot of a column's list together with its version, read under one
    /// lock acquisition.
    #[must_use]
    pub fn snapshot(&self, column: ColumnKey) -> (Vec<Task>, u64) {
        let state = self.state.read();
        let tasks = state
            .columns
            .get(&column)
            .map(|entry| entry.tasks.clone())
            .unwrap_or_default();
        (tasks, state.version(column))
    }

    /// Current version of a column; `0` if it was never written.
    #[must_use]
    pub fn version(&self, column: ColumnKey) -> u64 {
        self.state.read().version(column)
    }

    /// Replaces the list behind `key`, and therefore behind every alias of
    /// the same column.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UnknownAlias`] if `key` resolves to no column.
    pub fn write(&self, key: &ScopeKey, tasks: Vec<Task>) -> Result<(), StoreError> {
        let column = self
            .resolve(key)
            .ok_or_else(|| StoreError::UnknownAlias(key.clone()))?;
        self.apply(vec![(column, tasks)]);
        Ok(())
    }

    /// Replaces several columns in one atomic step and returns the new
    /// version of each, in input order.
    pub fn apply(&self, writes: Vec<(ColumnKey, Vec<Task>)>) -> Vec<u64> {
        let columns: Vec<ColumnKey> = writes.iter().map(|(column, _)| *column).collect();
        let versions = {
            let mut state = self.state.write();
            writes
                .into_iter()
                .map(|(column, tasks)| state.bump(column, tasks))
                .collect()
        };
        for column in columns {
            self.emit(BoardEvent::ColumnChanged { column });
        }
        versions
    }

    /// Like [`apply`](Self::apply), but only if every column in `expected`
    /// is still at the given version.
    ///
    /// Returns the new versions, or `None` if another write got there first
    /// and nothing was written.
    pub fn apply_if_unchanged(
        &self,
        expected: &[(ColumnKey, u64)],
        writes: Vec<(ColumnKey, Vec<Task>)>,
    ) -> Option<Vec<u64>> {
        let columns: Vec<ColumnKey> = writes.iter().map(|(column, _)| *column).collect();
        let versions = {
            let mut state = self.state.write();
            if expected
                .iter()
                .any(|(column, version)| state.version(*column) != *version)
            {
                return None;
            }
            writes
                .into_iter()
                .map(|(column, tasks)| state.bump(column, tasks))
                .collect()
        };
        for column in columns {
            self.emit(BoardEvent::ColumnChanged { column });
        }
        Some(versions)
    }

    /// Installs a freshly fetched list and clears the stale mark, unless the
    /// column was written since `expected_version` was read.
    pub fn replace_fetched(
        &self,
        column: ColumnKey,
        expected_version: u64,
        tasks: Vec<Task>,
    ) -> bool {
        {
            let mut state = self.state.write();
            if state.version(column) != expected_version {
                return false;
            }
            state.bump(column, tasks);
            if let Some(entry) = state.columns.get_mut(&column) {
                entry.stale = false;
            }
        }
        self.emit(BoardEvent::ColumnChanged { column });
        true
    }

    /// Drops a task from whichever column caches it, returning that column.
    pub fn remove_task(&self, task_id: TaskId) -> Option<ColumnKey> {
        let column = {
            let mut state = self.state.write();
            let (column, entry) = state
                .columns
                .iter_mut()
                .find(|(_, entry)| entry.tasks.iter().any(|task| task.id == task_id))?;
            entry.tasks.retain(|task| task.id != task_id);
            entry.version += 1;
            *column
        };
        self.emit(BoardEvent::ColumnChanged { column });
        Some(column)
    }

    /// Marks a column as out of date with the server.
    ///
    /// The version moves on as well, so conditional writes prepared from the
    /// invalidated list are refused.
    pub fn invalidate(&self, column: ColumnKey) {
        {
            let mut state = self.state.write();
            let entry = state.columns.entry(column).or_default();
            entry.stale = true;
            entry.version += 1;
        }
        self.emit(BoardEvent::ColumnInvalidated { column });
    }

    /// Whether a column is marked out of date.
    #[must_use]
    pub fn is_stale(&self, column: ColumnKey) -> bool {
        self.state
            .read()
            .columns
            .get(&column)
            .is_some_and(|entry| entry.stale)
    }

    /// Flags a column for renumbering on the next successful sync.
    pub fn mark_renumber(&self, column: ColumnKey) {
        self.state.write().columns.entry(column).or_default().needs_renumber = true;
    }

    /// Whether a column is flagged for renumbering.
    #[must_use]
    pub fn needs_renumber(&self, column: ColumnKey) -> bool {
        self.state
            .read()
            .columns
            .get(&column)
            .is_some_and(|entry| entry.needs_renumber)
    }

    /// Clears the renumber flag.
    pub fn clear_renumber(&self, column: ColumnKey) {
        if let Some(entry) = self.state.write().columns.get_mut(&column) {
            entry.needs_renumber = false;
        }
    }

    /// Finds the column and display index of a cached task.
    #[must_use]
    pub fn locate(&self, task_id: TaskId) -> Option<(ColumnKey, usize)> {
        let state = self.state.read();
        state.columns.iter().find_map(|(column, entry)| {
            entry
                .tasks
                .iter()
                .position(|task| task.id == task_id)
                .map(|index| (*column, index))
        })
    }

    /// Columns that currently have a cached list.
    #[must_use]
    pub fn columns(&self) -> Vec<ColumnKey> {
        let mut columns: Vec<ColumnKey> = self.state.read().columns.keys().copied().collect();
        columns.sort();
        columns
    }

    /// Best-effort event emission; a full or closed channel drops the event.
    pub(crate) fn emit(&self, event: BoardEvent) {
        if let Err(err) = self.events.try_send(event) {
            tracing::debug!(error = %err, "board event dropped");
        }
    }
}
