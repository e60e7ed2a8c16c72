//! In-memory task table.
//!
//! The [`TaskStore`] plays the role of the database behind the REST
//! endpoints. Every operation takes the lock once, so a patch is applied
//! atomically with respect to concurrent lists.

use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::RwLock;

use taskboard_proto::api::{ListQuery, TaskList};
use taskboard_proto::patch::{NewTask, TaskPatch};
use taskboard_proto::task::{Task, TaskId, TaskStatus, UserId, validate_title};

/// Gap left after the last task of a column when a task is appended.
pub const APPEND_SPACING: f64 = 1000.0;

/// Errors returned by [`TaskStore`] operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// No task with this id exists.
    #[error("task {0} not found")]
    NotFound(TaskId),

    /// The request violates a field rule.
    #[error("{0}")]
    Validation(String),
}

#[derive(Debug, Default)]
struct Table {
    tasks: HashMap<TaskId, Task>,
    last_id: u64,
}

/// Task table shared by all request handlers.
#[derive(Debug, Default)]
pub struct TaskStore {
    table: RwLock<Table>,
}

impl TaskStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or overwrites a task, keeping its id.
    pub async fn insert(&self, task: Task) {
        let mut table = self.table.write().await;
        table.last_id = table.last_id.max(task.id.get());
        table.tasks.insert(task.id, task);
    }

    /// Creates a task for `creator`.
    ///
    /// Without an explicit position the task goes after the last task of its
    /// column in the same project.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Validation`] for an empty or oversized title.
    pub async fn create(&self, new: NewTask, creator: UserId) -> Result<Task, StoreError> {
        validate_title(&new.title).map_err(|reason| StoreError::Validation(reason.to_string()))?;
        if new.position.is_some_and(|position| !position.is_finite()) {
            return Err(StoreError::Validation("position must be a finite number".to_string()));
        }

        let mut table = self.table.write().await;
        let status = new.status.unwrap_or(TaskStatus::Todo);
        let position = new.position.unwrap_or_else(|| {
            table
                .tasks
                .values()
                .filter(|task| task.status == status && task.project_id == new.project_id)
                .map(|task| task.position)
                .max_by(f64::total_cmp)
                .unwrap_or(0.0)
                + APPEND_SPACING
        });
        table.last_id += 1;
        let task = new.into_task(TaskId::new(table.last_id), position, creator, Utc::now());
        table.tasks.insert(task.id, task.clone());
        tracing::debug!(
            task_id = %task.id,
            status = %task.status,
            position = task.position,
            "task created"
        );
        Ok(task)
    }

    /// Returns a copy of one task.
    pub async fn get(&self, id: TaskId) -> Option<Task> {
        self.table.read().await.tasks.get(&id).cloned()
    }

    /// Lists one page of the tasks matching `query`'s status and project
    /// filters.
    pub async fn list(&self, query: &ListQuery, default_limit: u32, max_limit: u32) -> TaskList {
        let matching: Vec<Task> = self
            .table
            .read()
            .await
            .tasks
            .values()
            .filter(|task| query.status.is_none_or(|status| task.status == status))
            .filter(|task| query.project_id.is_none_or(|project| task.project_id == Some(project)))
            .cloned()
            .collect();
        TaskList::paginate_with(matching, query, default_limit, max_limit)
    }

    /// Applies a partial update and returns the updated task.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Validation`] for a rejected title or a
    /// non-finite position, and [`StoreError::NotFound`] for an unknown id.
    pub async fn patch(&self, id: TaskId, patch: &TaskPatch) -> Result<Task, StoreError> {
        if let Some(title) = &patch.title {
            validate_title(title).map_err(|reason| StoreError::Validation(reason.to_string()))?;
        }
        if patch.position.is_some_and(|position| !position.is_finite()) {
            return Err(StoreError::Validation("position must be a finite number".to_string()));
        }

        let mut table = self.table.write().await;
        let task = table.tasks.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        task.apply(patch, Utc::now());
        tracing::debug!(
            task_id = %id,
            status = %task.status,
            position = task.position,
            "task patched"
        );
        Ok(task.clone())
    }

    /// Deletes a task. Returns `true` if it existed.
    pub async fn remove(&self, id: TaskId) -> bool {
        self.table.write().await.tasks.remove(&id).is_some()
    }

    /// Number of stored tasks.
    pub async fn len(&self) -> usize {
        self.table.read().await.tasks.len()
    }

    /// Returns `true` if no tasks are stored.
    pub async fn is_empty(&self) -> bool {
        self.table.read().await.tasks.is_empty()
    }
}
