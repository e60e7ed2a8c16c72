//! REST envelope types for the `/api/v1/tasks` endpoints.
//!
//! Successful responses wrap their payload as `{"data": ...}`; failures carry
//! `{"error": {"code": ..., "message": ...}}`.

use serde::{Deserialize, Serialize};

use crate::task::{ProjectId, Task, TaskStatus};

/// Default page size for task listing.
pub const DEFAULT_LIST_LIMIT: u32 = 50;

/// Largest page size a server will honour.
pub const MAX_LIST_LIMIT: u32 = 100;

/// Error code for a request body that is not valid JSON.
pub const CODE_BAD_JSON: &str = "bad_json";
/// Error code for a semantically invalid request.
pub const CODE_VALIDATION: &str = "validation";
/// Error code for a missing session.
pub const CODE_UNAUTHORIZED: &str = "unauthorized";
/// Error code for an operation the caller may not perform.
pub const CODE_FORBIDDEN: &str = "forbidden";
/// Error code for an unknown task.
pub const CODE_NOT_FOUND: &str = "not_found";

/// Query parameters of `GET /api/v1/tasks`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListQuery {
    /// Only tasks in this column.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    /// Only tasks in this project.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<ProjectId>,
    /// Page size.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    /// Id of the last task of the previous page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<u64>,
}

impl ListQuery {
    /// Lists one column, optionally restricted to a project.
    #[must_use]
    pub const fn column(status: TaskStatus, project_id: Option<ProjectId>) -> Self {
        Self {
            status: Some(status),
            project_id,
            limit: None,
            cursor: None,
        }
    }

    /// Sets the page size.
    #[must_use]
    pub const fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Continues after the given cursor; `0` means "from the start".
    #[must_use]
    pub const fn after(mut self, cursor: u64) -> Self {
        self.cursor = if cursor == 0 { None } else { Some(cursor) };
        self
    }
}

/// One page of tasks ordered by `position ASC, id ASC`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskList {
    /// Tasks in display order.
    pub items: Vec<Task>,
    /// Cursor for the next page, `0` when there is none.
    pub next_cursor: u64,
}

impl TaskList {
    /// Cuts one page out of the tasks matching a query.
    ///
    /// Tasks are ordered by `position ASC, id ASC`. The cursor is the id of
    /// the last task of the previous page; the page resumes right after that
    /// task in the same ordering. `next_cursor` is the last id of a full page
    /// and `0` once the listing is exhausted.
    #[must_use]
    pub fn paginate(matching: Vec<Task>, query: &ListQuery) -> Self {
        Self::paginate_with(matching, query, DEFAULT_LIST_LIMIT, MAX_LIST_LIMIT)
    }

    /// Like [`paginate`](Self::paginate) with explicit page-size bounds. A
    /// missing or zero limit means `default_limit`; larger limits are capped
    /// at `max_limit`.
    #[must_use]
    pub fn paginate_with(
        mut matching: Vec<Task>,
        query: &ListQuery,
        default_limit: u32,
        max_limit: u32,
    ) -> Self {
        matching.sort_by(|a, b| a.position.total_cmp(&b.position).then(a.id.cmp(&b.id)));
        let limit = query
            .limit
            .filter(|limit| *limit > 0)
            .unwrap_or(default_limit)
            .min(max_limit)
            .max(1);
        let limit = usize::try_from(limit).unwrap_or(usize::MAX);

        let start = query
            .cursor
            .and_then(|cursor| matching.iter().position(|task| task.id.get() == cursor))
            .map_or(0, |index| index + 1);
        let items: Vec<Task> = matching.into_iter().skip(start).take(limit).collect();
        let next_cursor = if items.len() == limit {
            items.last().map_or(0, |task| task.id.get())
        } else {
            0
        };
        Self { items, next_cursor }
    }
}

/// Success envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataEnvelope<T> {
    /// The payload.
    pub data: T,
}

/// Error details inside an [`ErrorEnvelope`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable code such as `not_found`.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

/// Failure envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// The error details.
    pub error: ErrorBody,
}

impl ErrorEnvelope {
    /// Builds an envelope from a code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorBody {
                code: code.into(),
                message: message.into(),
            },
        }
    }
}

/// Body of a successful delete: `{"ok": "true"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deleted {
    /// Always `"true"`.
    pub ok: String,
}

impl Default for Deleted {
    fn default() -> Self {
        Self {
            ok: "true".to_string(),
        }
    }
}
