//! Task backend abstraction.
//!
//! Defines the [`TaskApi`] trait the board uses to read and write tasks.
//! Implementations:
//! - [`http::HttpTaskApi`]: the `/api/v1/tasks` REST endpoints over HTTP
//! - [`loopback::LoopbackTaskApi`]: in-process backend for tests and offline use

pub mod http;
pub mod loopback;

use std::future::Future;

use taskboard_proto::api::{ListQuery, TaskList};
use taskboard_proto::patch::{NewTask, TaskPatch};
use taskboard_proto::task::{Task, TaskId};

/// Errors reported by a task backend.
///
/// Cloneable so a failed move can carry its cause both in its outcome and in
/// the event sent to the rendering layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    /// The backend could not be reached or answered with garbage.
    #[error("network error: {0}")]
    Network(String),

    /// The backend rejected the request as invalid.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The task does not exist on the backend.
    #[error("task {0} not found")]
    NotFound(TaskId),

    /// The caller is not allowed to perform the operation.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Any other non-success response.
    #[error("server error {status}: {message}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// Message from the error envelope, or the raw body.
        message: String,
    },
}

/// Async access to the task backend.
///
/// All methods are independent requests; the board never assumes two calls
/// are applied in the order they were issued.
pub trait TaskApi: Send + Sync {
    /// Fetches one page of tasks matching `query`, ordered by
    /// `position ASC, id ASC`.
    fn list_tasks(
        &self,
        query: &ListQuery,
    ) -> impl Future<Output = Result<TaskList, RemoteError>> + Send;

    /// Applies a partial update and returns the stored task.
    fn patch_task(
        &self,
        id: TaskId,
        patch: &TaskPatch,
    ) -> impl Future<Output = Result<Task, RemoteError>> + Send;

    /// Creates a task and returns it with its server-assigned id.
    fn create_task(&self, task: &NewTask) -> impl Future<Output = Result<Task, RemoteError>> + Send;

    /// Deletes a task. Deleting a task that is already gone succeeds.
    fn delete_task(&self, id: TaskId) -> impl Future<Output = Result<(), RemoteError>> + Send;
}

/// Fetches every page of `query`, following `next_cursor` until it is `0`.
///
/// # Errors
///
/// Returns the first [`RemoteError`] a page request fails with.
pub async fn fetch_all<A: TaskApi>(
    api: &A,
    query: ListQuery,
    page_limit: u32,
) -> Result<Vec<Task>, RemoteError> {
    let mut tasks = Vec::new();
    let mut cursor = 0;
    loop {
        let page = api
            .list_tasks(&query.clone().with_limit(page_limit).after(cursor))
            .await?;
        let exhausted =
            page.items.is_empty() || page.next_cursor == 0 || page.next_cursor == cursor;
        tasks.extend(page.items);
        if exhausted {
            break;
        }
        cursor = page.next_cursor;
    }
    Ok(tasks)
}
