//! HTTP handlers for `/api/v1/tasks`.
//!
//! Every success is wrapped as `{"data": ...}` and every failure as
//! `{"error": {"code": ..., "message": ...}}`. A body that is not JSON at all
//! is `bad_json`; JSON that does not fit the request type is `validation`.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::rejection::{PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;

use taskboard_proto::api::{
    CODE_BAD_JSON, CODE_NOT_FOUND, CODE_VALIDATION, DEFAULT_LIST_LIMIT, DataEnvelope, Deleted,
    ErrorEnvelope, ListQuery, MAX_LIST_LIMIT,
};
use taskboard_proto::patch::{NewTask, TaskPatch};
use taskboard_proto::task::{TaskId, UserId};

use crate::store::{StoreError, TaskStore};

/// Collection route.
pub const TASKS_ROUTE: &str = "/api/v1/tasks";

/// Single-task route.
pub const TASK_ROUTE: &str = "/api/v1/tasks/{id}";

/// The server runs single-user; every task is created by this user.
pub const LOCAL_USER: UserId = UserId::new(1);

/// Shared state of the task server.
#[derive(Debug)]
pub struct AppState {
    /// The task table.
    pub store: TaskStore,
    /// Page size when a list request names none.
    pub default_limit: u32,
    /// Largest page size honoured.
    pub max_limit: u32,
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(TaskStore::new())
    }
}

impl AppState {
    /// Creates state around `store` with the default page sizes.
    #[must_use]
    pub const fn new(store: TaskStore) -> Self {
        Self::with_limits(store, DEFAULT_LIST_LIMIT, MAX_LIST_LIMIT)
    }

    /// Creates state with custom page sizes from the resolved
    /// [`crate::config::ServerConfig`].
    #[must_use]
    pub const fn with_limits(store: TaskStore, default_limit: u32, max_limit: u32) -> Self {
        Self {
            store,
            default_limit,
            max_limit,
        }
    }
}

/// Request failures, rendered as an [`ErrorEnvelope`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    /// The body is not valid JSON.
    #[error("invalid JSON body")]
    BadJson,

    /// The request is well-formed JSON but breaks a field rule.
    #[error("{0}")]
    Validation(String),

    /// The task does not exist.
    #[error("task not found")]
    NotFound,
}

impl ApiError {
    const fn status(&self) -> StatusCode {
        match self {
            Self::BadJson | Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
        }
    }

    const fn code(&self) -> &'static str {
        match self {
            Self::BadJson => CODE_BAD_JSON,
            Self::Validation(_) => CODE_VALIDATION,
            Self::NotFound => CODE_NOT_FOUND,
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => Self::NotFound,
            StoreError::Validation(message) => Self::Validation(message),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        tracing::debug!(code = self.code(), error = %self, "request rejected");
        let envelope = ErrorEnvelope::new(self.code(), self.to_string());
        (self.status(), Json(envelope)).into_response()
    }
}

/// Parses a request body in two steps so syntax errors and shape errors get
/// different codes.
fn decode_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    let value: serde_json::Value = serde_json::from_slice(body).map_err(|_| ApiError::BadJson)?;
    serde_json::from_value(value).map_err(|err| ApiError::Validation(err.to_string()))
}

fn task_id(path: Result<Path<u64>, PathRejection>) -> Result<TaskId, ApiError> {
    path.map(|Path(id)| TaskId::new(id)).map_err(|_| ApiError::NotFound)
}

async fn list_tasks(
    State(state): State<Arc<AppState>>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(query) = query.map_err(|err| ApiError::Validation(err.body_text()))?;
    let page = state
        .store
        .list(&query, state.default_limit, state.max_limit)
        .await;
    tracing::trace!(
        status = ?query.status,
        items = page.items.len(),
        next_cursor = page.next_cursor,
        "listed tasks"
    );
    Ok(Json(DataEnvelope { data: page }))
}

async fn create_task(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let new: NewTask = decode_body(&body)?;
    let task = state.store.create(new, LOCAL_USER).await?;
    tracing::info!(task_id = %task.id, status = %task.status, "created task");
    Ok((StatusCode::CREATED, Json(DataEnvelope { data: task })))
}

async fn get_task(
    State(state): State<Arc<AppState>>,
    path: Result<Path<u64>, PathRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let id = task_id(path)?;
    let task = state.store.get(id).await.ok_or(ApiError::NotFound)?;
    Ok(Json(DataEnvelope { data: task }))
}

async fn patch_task(
    State(state): State<Arc<AppState>>,
    path: Result<Path<u64>, PathRejection>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let id = task_id(path)?;
    let patch: TaskPatch = decode_body(&body)?;
    let task = state.store.patch(id, &patch).await?;
    tracing::info!(task_id = %id, status = %task.status, position = task.position, "patched task");
    Ok(Json(DataEnvelope { data: task }))
}

async fn delete_task(
    State(state): State<Arc<AppState>>,
    path: Result<Path<u64>, PathRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let id = task_id(path)?;
    // Deleting an absent task still succeeds.
    if state.store.remove(id).await {
        tracing::info!(task_id = %id, "deleted task");
    }
    Ok(Json(DataEnvelope {
        data: Deleted::default(),
    }))
}

/// Builds the router over shared state.
pub fn router(state: Arc<AppState>) -> axum::Router {
    axum::Router::new()
        .route(TASKS_ROUTE, get(list_tasks).post(create_task))
        .route(TASK_ROUTE, get(get_task).patch(patch_task).delete(delete_task))
        .with_state(state)
}

/// Starts the task server on `addr` with an empty store.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(addr: &str) -> Result<(SocketAddr, JoinHandle<()>), std::io::Error> {
    start_server_with_state(addr, Arc::new(AppState::default())).await
}

/// Starts the task server with pre-built [`AppState`].
///
/// Binding to port `0` lets the OS pick a port; the bound address is
/// returned together with the serving task.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<AppState>,
) -> Result<(SocketAddr, JoinHandle<()>), std::io::Error> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "task server error");
        }
    });

    Ok((bound_addr, handle))
}
