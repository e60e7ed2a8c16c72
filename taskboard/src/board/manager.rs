//! Board facade for one session scope.
//!
//! `BoardManager` owns the cache and the reorder coordinator, loads the
//! three columns, and offers the authoritative edits that are not drags:
//! creating and deleting tasks, the status buttons, and form saves. Those go to the
//! backend first and refresh the affected columns afterwards.

use std::sync::Arc;

use tokio::sync::mpsc;

use taskboard_proto::api::DEFAULT_LIST_LIMIT;
use taskboard_proto::patch::{NewTask, TaskPatch};
use taskboard_proto::task::{Task, TaskId, TaskStatus, validate_title};

use super::allocator::{DEFAULT_SPACING, PositionAllocator};
use super::coordinator::{MoveOutcome, MoveRequest, ReorderCoordinator};
use super::drag::DropResult;
use super::store::TaskStoreView;
use super::{BoardError, BoardEvent, ColumnKey, MoveError, Scope};
use crate::remote::TaskApi;

/// Default capacity of the board event channel.
pub const DEFAULT_EVENT_BUFFER: usize = 256;

/// Tunables for a board session.
#[derive(Debug, Clone, PartialEq)]
pub struct BoardSettings {
    /// Gap between positions on an empty column and after renumbering.
    pub spacing: f64,
    /// Capacity of the [`BoardEvent`] channel.
    pub event_buffer: usize,
    /// Page size for column fetches.
    pub page_limit: u32,
    /// Whether committed moves re-fetch their columns.
    pub reconcile_after_commit: bool,
}

impl Default for BoardSettings {
    fn default() -> Self {
        Self {
            spacing: DEFAULT_SPACING,
            event_buffer: DEFAULT_EVENT_BUFFER,
            page_limit: DEFAULT_LIST_LIMIT,
            reconcile_after_commit: true,
        }
    }
}

/// The board of one scope: three cached columns plus the operations on them.
pub struct BoardManager<A> {
    coordinator: ReorderCoordinator<A>,
}

impl<A: TaskApi> BoardManager<A> {
    /// Creates an empty board.
    ///
    /// Returns the board and the receiver for its [`BoardEvent`]s.
    ///
    /// # Errors
    ///
    /// Returns [`BoardError::InvalidSpacing`] if the configured spacing is
    /// not a finite positive number.
    pub fn new(
        api: Arc<A>,
        scope: Scope,
        settings: &BoardSettings,
    ) -> Result<(Self, mpsc::Receiver<BoardEvent>), BoardError> {
        let allocator = PositionAllocator::with_spacing(settings.spacing)
            .ok_or(BoardError::InvalidSpacing(settings.spacing))?;
        let (store, events) = TaskStoreView::new(scope, settings.event_buffer);
        let coordinator = ReorderCoordinator::new(Arc::new(store), api, allocator)
            .with_reconcile(settings.reconcile_after_commit)
            .with_page_limit(settings.page_limit);
        Ok((Self { coordinator }, events))
    }

    /// The session scope.
    #[must_use]
    pub fn scope(&self) -> Scope {
        self.store().scope()
    }

    /// The shared cache.
    #[must_use]
    pub fn store(&self) -> &Arc<TaskStoreView> {
        self.coordinator.store()
    }

    /// The reorder coordinator.
    #[must_use]
    pub const fn coordinator(&self) -> &ReorderCoordinator<A> {
        &self.coordinator
    }

    fn column_key(&self, status: TaskStatus) -> ColumnKey {
        ColumnKey::new(status, self.scope())
    }

    /// Fetches all three columns.
    ///
    /// # Errors
    ///
    /// Returns the first fetch failure.
    pub async fn load(&self) -> Result<(), BoardError> {
        for status in TaskStatus::ALL {
            self.coordinator.refresh(self.column_key(status)).await?;
        }
        tracing::debug!(scope = %self.scope(), "board loaded");
        Ok(())
    }

    /// Re-fetches one column.
    ///
    /// # Errors
    ///
    /// Returns the fetch failure; the column stays stale.
    pub async fn refresh(&self, status: TaskStatus) -> Result<bool, BoardError> {
        Ok(self.coordinator.refresh(self.column_key(status)).await?)
    }

    /// Ordered snapshot of one column.
    #[must_use]
    pub fn column(&self, status: TaskStatus) -> Vec<Task> {
        self.store().column(self.column_key(status))
    }

    /// Registers a per-filter view name as an alias of one column.
    pub fn register_alias(&self, name: impl Into<String>, status: TaskStatus) {
        self.store().register_alias(name, self.column_key(status));
    }

    /// Whether a drag of `task_id` is still waiting for the backend.
    #[must_use]
    pub fn is_moving(&self, task_id: TaskId) -> bool {
        self.coordinator.is_moving(task_id)
    }

    /// Executes a drag-release event.
    ///
    /// # Errors
    ///
    /// See [`ReorderCoordinator::handle_drop`].
    pub async fn handle_drop(&self, event: DropResult) -> Result<Option<MoveOutcome>, MoveError> {
        self.coordinator.handle_drop(event).await
    }

    /// Moves a cached task to `index` of the `to` column, as a drag would.
    ///
    /// # Errors
    ///
    /// Returns [`BoardError::TaskNotCached`] if the task is not on the board,
    /// or [`BoardError::Move`] if the move is refused before reaching the
    /// cache.
    pub async fn move_task(
        &self,
        task_id: TaskId,
        to: TaskStatus,
        index: usize,
    ) -> Result<MoveOutcome, BoardError> {
        let (from, source_index) = self
            .store()
            .locate(task_id)
            .ok_or(BoardError::TaskNotCached(task_id))?;
        let request = MoveRequest::new(task_id, from, source_index, self.column_key(to), index);
        Ok(self.coordinator.reorder(request).await?)
    }

    /// Changes a task's status through the backend (the "move to" buttons),
    /// then refreshes the columns it left and entered.
    ///
    /// # Errors
    ///
    /// Returns [`BoardError::TaskNotCached`] or the backend failure.
    pub async fn set_status(
        &self,
        task_id: TaskId,
        status: TaskStatus,
    ) -> Result<Task, BoardError> {
        self.edit(task_id, TaskPatch::status(status)).await
    }

    /// Saves an edit form through the backend, then refreshes the affected
    /// columns.
    ///
    /// # Errors
    ///
    /// Returns [`BoardError::Title`] for a rejected title,
    /// [`BoardError::TaskNotCached`] if the task is not on the board, or the
    /// backend failure.
    pub async fn edit(&self, task_id: TaskId, patch: TaskPatch) -> Result<Task, BoardError> {
        if let Some(title) = &patch.title {
            validate_title(title).map_err(BoardError::Title)?;
        }
        let (from, _) = self
            .store()
            .locate(task_id)
            .ok_or(BoardError::TaskNotCached(task_id))?;
        let updated = self.coordinator.api().patch_task(task_id, &patch).await?;
        tracing::info!(task_id = %task_id, status = %updated.status, "task updated");

        self.refresh_after_edit(from).await;
        let to = self.column_key(updated.status);
        if to != from {
            self.refresh_after_edit(to).await;
        }
        Ok(updated)
    }

    /// Creates a task through the backend and refreshes its column.
    ///
    /// # Errors
    ///
    /// Returns [`BoardError::Title`] for a rejected title, or the backend
    /// failure.
    pub async fn create(&self, mut new: NewTask) -> Result<Task, BoardError> {
        validate_title(&new.title).map_err(BoardError::Title)?;
        if new.project_id.is_none() {
            new.project_id = self.scope().project_id();
        }
        let created = self.coordinator.api().create_task(&new).await?;
        tracing::info!(task_id = %created.id, status = %created.status, "task created");
        self.refresh_after_edit(self.column_key(created.status)).await;
        Ok(created)
    }

    /// Deletes a task through the backend, drops it from the cache, and
    /// refreshes the column it was in.
    ///
    /// # Errors
    ///
    /// Returns [`BoardError::TaskNotCached`] if the task is not on the board,
    /// or the backend failure; the cache is left as it was.
    pub async fn delete(&self, task_id: TaskId) -> Result<(), BoardError> {
        let (from, _) = self
            .store()
            .locate(task_id)
            .ok_or(BoardError::TaskNotCached(task_id))?;
        self.coordinator.api().delete_task(task_id).await?;
        tracing::info!(task_id = %task_id, "task deleted");

        let column = self.store().remove_task(task_id).unwrap_or(from);
        self.refresh_after_edit(column).await;
        Ok(())
    }

    async fn refresh_after_edit(&self, column: ColumnKey) {
        self.store().invalidate(column);
        if let Err(error) = self.coordinator.refresh(column).await {
            tracing::warn!(column = %column, error = %error, "refresh after edit failed");
        }
    }
}
