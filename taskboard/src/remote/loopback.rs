//! In-process task backend.
//!
//! Keeps tasks in memory and applies the same list, patch, create, and
//! delete rules as the task server. Tests can queue failures and hold patch requests at a
//! gate to control the order in which concurrent moves settle.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use taskboard_proto::api::{ListQuery, TaskList};
use taskboard_proto::patch::{NewTask, TaskPatch};
use taskboard_proto::task::{Task, TaskId, TaskStatus, UserId, validate_title};

use super::{RemoteError, TaskApi};
use crate::board::DEFAULT_SPACING;

#[derive(Debug, Default)]
struct LoopbackState {
    tasks: HashMap<TaskId, Task>,
    next_id: u64,
    failures: VecDeque<RemoteError>,
    task_failures: HashMap<TaskId, RemoteError>,
    patches: Vec<(TaskId, TaskPatch)>,
    list_calls: usize,
}

/// Task backend living in the same process.
#[derive(Debug, Default)]
pub struct LoopbackTaskApi {
    state: Mutex<LoopbackState>,
    gate: Mutex<Option<Arc<Semaphore>>>,
    waiting: AtomicUsize,
}

impl LoopbackTaskApi {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend holding `tasks`.
    #[must_use]
    pub fn seeded(tasks: impl IntoIterator<Item = Task>) -> Self {
        let api = Self::new();
        for task in tasks {
            api.seed(task);
        }
        api
    }

    /// Inserts or overwrites a task as if another client had written it.
    pub fn seed(&self, task: Task) {
        let mut state = self.state.lock();
        state.next_id = state.next_id.max(task.id.get());
        state.tasks.insert(task.id, task);
    }

    /// Server-side copy of a task.
    #[must_use]
    pub fn task(&self, id: TaskId) -> Option<Task> {
        self.state.lock().tasks.get(&id).cloned()
    }

    /// Makes the next patch or delete request fail with `error`.
    pub fn fail_next(&self, error: RemoteError) {
        self.state.lock().failures.push_back(error);
    }

    /// Makes the next patch request for `id` fail with `error`.
    pub fn fail_task(&self, id: TaskId, error: RemoteError) {
        self.state.lock().task_failures.insert(id, error);
    }

    /// Every patch received, in arrival order, including refused ones.
    #[must_use]
    pub fn patches(&self) -> Vec<(TaskId, TaskPatch)> {
        self.state.lock().patches.clone()
    }

    /// Number of list requests served.
    #[must_use]
    pub fn list_calls(&self) -> usize {
        self.state.lock().list_calls
    }

    /// Holds every subsequent patch request until it is released.
    pub fn hold_patches(&self) {
        *self.gate.lock() = Some(Arc::new(Semaphore::new(0)));
    }

    /// Lets `count` held patch requests proceed, in arrival order.
    pub fn release_patches(&self, count: usize) {
        if let Some(gate) = self.gate.lock().as_ref() {
            gate.add_permits(count);
        }
    }

    /// Number of patch requests currently held at the gate.
    #[must_use]
    pub fn held_patches(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    async fn pass_gate(&self) -> Result<(), RemoteError> {
        let gate = self.gate.lock().clone();
        let Some(gate) = gate else {
            return Ok(());
        };
        self.waiting.fetch_add(1, Ordering::SeqCst);
        let permit = gate.acquire_owned().await;
        self.waiting.fetch_sub(1, Ordering::SeqCst);
        permit
            .map(tokio::sync::OwnedSemaphorePermit::forget)
            .map_err(|_| RemoteError::Network("loopback gate closed".to_string()))
    }
}

impl TaskApi for LoopbackTaskApi {
    async fn list_tasks(&self, query: &ListQuery) -> Result<TaskList, RemoteError> {
        let mut state = self.state.lock();
        state.list_calls += 1;
        let matching: Vec<Task> = state
            .tasks
            .values()
            .filter(|task| query.status.is_none_or(|status| task.status == status))
            .filter(|task| query.project_id.is_none_or(|project| task.project_id == Some(project)))
            .cloned()
            .collect();
        Ok(TaskList::paginate(matching, query))
    }

    async fn patch_task(&self, id: TaskId, patch: &TaskPatch) -> Result<Task, RemoteError> {
        self.state.lock().patches.push((id, patch.clone()));
        self.pass_gate().await?;

        let mut state = self.state.lock();
        if let Some(error) = state.task_failures.remove(&id) {
            return Err(error);
        }
        if let Some(error) = state.failures.pop_front() {
            return Err(error);
        }
        if let Some(title) = &patch.title {
            validate_title(title).map_err(|reason| RemoteError::Validation(reason.to_string()))?;
        }
        let task = state.tasks.get_mut(&id).ok_or(RemoteError::NotFound(id))?;
        task.apply(patch, Utc::now());
        Ok(task.clone())
    }

    async fn create_task(&self, new: &NewTask) -> Result<Task, RemoteError> {
        validate_title(&new.title).map_err(|reason| RemoteError::Validation(reason.to_string()))?;
        let mut state = self.state.lock();
        let status = new.status.unwrap_or(TaskStatus::Todo);
        let position = new.position.unwrap_or_else(|| {
            state
                .tasks
                .values()
                .filter(|task| task.status == status && task.project_id == new.project_id)
                .map(|task| task.position)
                .max_by(f64::total_cmp)
                .map_or(DEFAULT_SPACING, |max| max + DEFAULT_SPACING)
        });
        state.next_id += 1;
        let task = new
            .clone()
            .into_task(TaskId::new(state.next_id), position, UserId::new(0), Utc::now());
        state.tasks.insert(task.id, task.clone());
        Ok(task)
    }

    async fn delete_task(&self, id: TaskId) -> Result<(), RemoteError> {
        let mut state = self.state.lock();
        if let Some(error) = state.failures.pop_front() {
            return Err(error);
        }
        state.tasks.remove(&id);
        Ok(())
    }
}
