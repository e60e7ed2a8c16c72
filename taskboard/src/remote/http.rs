//! REST client for the `/api/v1/tasks` endpoints.

use std::time::Duration;

use reqwest::StatusCode;
use serde::de::DeserializeOwned;

use taskboard_proto::api::{DataEnvelope, Deleted, ErrorEnvelope, ListQuery, TaskList};
use taskboard_proto::patch::{NewTask, TaskPatch};
use taskboard_proto::task::{Task, TaskId};

use super::{RemoteError, TaskApi};

/// Path of the task collection relative to the API base URL.
pub const TASKS_PATH: &str = "/api/v1/tasks";

/// Task backend reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpTaskApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTaskApi {
    /// Creates a client for the server at `base_url` (e.g. `http://127.0.0.1:8080`).
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Network`] if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("taskboard/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| RemoteError::Network(err.to_string()))?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { client, base_url })
    }

    /// Base URL requests are sent to.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn collection_url(&self) -> String {
        format!("{}{TASKS_PATH}", self.base_url)
    }

    fn task_url(&self, id: TaskId) -> String {
        format!("{}{TASKS_PATH}/{id}", self.base_url)
    }

    async fn decode<T: DeserializeOwned>(
        response: reqwest::Response,
        task: Option<TaskId>,
    ) -> Result<T, RemoteError> {
        let status = response.status();
        let body = response.bytes().await.map_err(network)?;
        if status.is_success() {
            return serde_json::from_slice::<DataEnvelope<T>>(&body)
                .map(|envelope| envelope.data)
                .map_err(|err| RemoteError::Network(format!("malformed response: {err}")));
        }
        let message = serde_json::from_slice::<ErrorEnvelope>(&body).map_or_else(
            |_| String::from_utf8_lossy(&body).trim().to_string(),
            |envelope| envelope.error.message,
        );
        Err(status_error(status, message, task))
    }
}

fn network(err: reqwest::Error) -> RemoteError {
    RemoteError::Network(err.to_string())
}

/// Maps a non-success status to the matching [`RemoteError`].
fn status_error(status: StatusCode, message: String, task: Option<TaskId>) -> RemoteError {
    match (status, task) {
        (StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY, _) => {
            RemoteError::Validation(message)
        }
        (StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN, _) => {
            RemoteError::PermissionDenied(message)
        }
        (StatusCode::NOT_FOUND, Some(id)) => RemoteError::NotFound(id),
        _ => RemoteError::Server {
            status: status.as_u16(),
            message,
        },
    }
}

impl TaskApi for HttpTaskApi {
    async fn list_tasks(&self, query: &ListQuery) -> Result<TaskList, RemoteError> {
        tracing::trace!(status = ?query.status, cursor = ?query.cursor, "listing tasks");
        let response = self
            .client
            .get(self.collection_url())
            .query(query)
            .send()
            .await
            .map_err(network)?;
        Self::decode(response, None).await
    }

    async fn patch_task(&self, id: TaskId, patch: &TaskPatch) -> Result<Task, RemoteError> {
        tracing::trace!(task_id = %id, "patching task");
        let response = self
            .client
            .patch(self.task_url(id))
            .json(patch)
            .send()
            .await
            .map_err(network)?;
        Self::decode(response, Some(id)).await
    }

    async fn create_task(&self, task: &NewTask) -> Result<Task, RemoteError> {
        tracing::trace!(title = %task.title, "creating task");
        let response = self
            .client
            .post(self.collection_url())
            .json(task)
            .send()
            .await
            .map_err(network)?;
        Self::decode(response, None).await
    }

    async fn delete_task(&self, id: TaskId) -> Result<(), RemoteError> {
        tracing::trace!(task_id = %id, "deleting task");
        let response = self
            .client
            .delete(self.task_url(id))
            .send()
            .await
            .map_err(network)?;
        let _: Deleted = Self::decode(response, Some(id)).await?;
        Ok(())
    }
}
