//! Request bodies for creating and partially updating tasks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::task::{ProjectId, Task, TaskId, TaskStatus, TaskTag, UserId};

/// A partial update to a task. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskPatch {
    /// New title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// New description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// New status (`completed` accepted on input).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    /// New assignee.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee_id: Option<UserId>,
    /// New sort key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<f64>,
    /// New repository linkage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_full_name: Option<String>,
    /// New branch hint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_hint: Option<String>,
    /// New tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<TaskTag>,
}

impl TaskPatch {
    /// The patch a drag-and-drop move sends: the position always, the status
    /// only when the task changed column.
    #[must_use]
    pub fn reorder(status: Option<TaskStatus>, position: f64) -> Self {
        Self {
            status,
            position: Some(position),
            ..Self::default()
        }
    }

    /// A status-only change (the "move to" buttons).
    #[must_use]
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// A position-only change.
    #[must_use]
    pub fn position(position: f64) -> Self {
        Self {
            position: Some(position),
            ..Self::default()
        }
    }

    /// Returns `true` if the patch changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl Task {
    /// Applies a partial update the way the task server does.
    ///
    /// Entering `in_progress` stamps `started_at` once; entering `done`
    /// stamps `completed_at` once; any other status clears `completed_at`.
    pub fn apply(&mut self, patch: &TaskPatch, now: DateTime<Utc>) {
        if let Some(title) = &patch.title {
            self.title.clone_from(title);
        }
        if let Some(description) = &patch.description {
            self.description = Some(description.clone());
        }
        if let Some(position) = patch.position {
            self.position = position;
        }
        if let Some(assignee) = patch.assignee_id {
            self.assignee_id = Some(assignee);
        }
        if let Some(repo) = &patch.repo_full_name {
            self.repo_full_name = Some(repo.clone());
        }
        if let Some(branch) = &patch.branch_hint {
            self.branch_hint = Some(branch.clone());
        }
        if let Some(tag) = patch.tag {
            self.tag = Some(tag);
        }
        if let Some(status) = patch.status {
            let previous = self.status;
            self.status = status;
            if previous != TaskStatus::InProgress
                && status == TaskStatus::InProgress
                && self.started_at.is_none()
            {
                self.started_at = Some(now);
            }
            if status == TaskStatus::Done {
                self.completed_at.get_or_insert(now);
            } else {
                self.completed_at = None;
            }
        }
        self.updated_at = now;
    }
}

/// Body of a task creation request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
    /// Title (required, non-empty).
    pub title: String,
    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Initial status, `todo` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    /// Initial position; the server appends to the column when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<f64>,
    /// Repository linkage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_full_name: Option<String>,
    /// Branch hint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_hint: Option<String>,
    /// Project scope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<ProjectId>,
    /// Assignee.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee_id: Option<UserId>,
    /// Tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<TaskTag>,
}

impl NewTask {
    /// A creation request with only a title.
    #[must_use]
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    /// Builds the stored task once the server has picked an id and position.
    ///
    /// The title is trimmed, the status defaults to `todo`, and a task born
    /// in `in_progress` or `done` gets the matching lifecycle stamp.
    #[must_use]
    pub fn into_task(self, id: TaskId, position: f64, creator: UserId, now: DateTime<Utc>) -> Task {
        let status = self.status.unwrap_or(TaskStatus::Todo);
        Task {
            id,
            title: self.title.trim().to_string(),
            description: self.description,
            status,
            position,
            creator_id: creator,
            assignee_id: self.assignee_id,
            repo_full_name: self.repo_full_name,
            branch_hint: self.branch_hint,
            tag: self.tag,
            project_id: self.project_id,
            started_at: (status == TaskStatus::InProgress).then_some(now),
            completed_at: (status == TaskStatus::Done).then_some(now),
            created_at: now,
            updated_at: now,
        }
    }
}
