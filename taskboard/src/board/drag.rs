//! Decoding of drag-and-drop release events.
//!
//! The drag collaborator reports `draggableId` (`task-<id>`), the source
//! location, and an optional destination. A missing destination means the
//! gesture was cancelled or dropped outside every column.

use serde::{Deserialize, Serialize};

use taskboard_proto::task::{TaskId, TaskStatus};

use super::ScopeKey;
use super::coordinator::MoveRequest;

/// Prefix of draggable ids produced by the board.
pub const DRAGGABLE_PREFIX: &str = "task-";

/// Errors decoding a drop event.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DragError {
    /// The draggable id does not name a task.
    #[error("draggable id {0:?} does not name a task")]
    InvalidDraggableId(String),
}

/// One end of a drag gesture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraggableLocation {
    /// Column the location is in.
    pub droppable_id: String,
    /// Display index within that column.
    pub index: usize,
}

impl DraggableLocation {
    /// Creates a location.
    pub fn new(droppable_id: impl Into<String>, index: usize) -> Self {
        Self {
            droppable_id: droppable_id.into(),
            index,
        }
    }

    /// Cache key the droppable id addresses: status names map to the
    /// status-only key, anything else to a named alias.
    #[must_use]
    pub fn scope_key(&self) -> ScopeKey {
        self.droppable_id.parse::<TaskStatus>().map_or_else(
            |_| ScopeKey::Named(self.droppable_id.clone()),
            ScopeKey::Status,
        )
    }
}

/// A gesture-release event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DropResult {
    /// Identifier of the dragged card.
    pub draggable_id: String,
    /// Where the card started.
    pub source: DraggableLocation,
    /// Where it was released, if over a column.
    pub destination: Option<DraggableLocation>,
}

impl DropResult {
    /// Converts the event into a move request.
    ///
    /// Returns `Ok(None)` for gestures that change nothing: a cancelled drop
    /// or a release at the starting index of the starting column.
    ///
    /// # Errors
    ///
    /// Returns [`DragError::InvalidDraggableId`] if the draggable id does not
    /// decode to a task id.
    pub fn into_request(self) -> Result<Option<MoveRequest>, DragError> {
        let Some(destination) = self.destination else {
            return Ok(None);
        };
        if destination == self.source {
            return Ok(None);
        }
        let task_id = decode_task_id(&self.draggable_id)?;
        Ok(Some(MoveRequest {
            task_id,
            source: self.source.scope_key(),
            source_index: self.source.index,
            destination: destination.scope_key(),
            destination_index: destination.index,
        }))
    }
}

/// Extracts the task id from `task-<id>` (a bare number is accepted too).
///
/// # Errors
///
/// Returns [`DragError::InvalidDraggableId`] when no id can be parsed.
pub fn decode_task_id(draggable_id: &str) -> Result<TaskId, DragError> {
    let raw = draggable_id
        .strip_prefix(DRAGGABLE_PREFIX)
        .unwrap_or(draggable_id);
    raw.parse::<u64>()
        .map(TaskId::new)
        .map_err(|_| DragError::InvalidDraggableId(draggable_id.to_string()))
}

/// Draggable id for a task card.
#[must_use]
pub fn draggable_id(task_id: TaskId) -> String {
    format!("{DRAGGABLE_PREFIX}{task_id}")
}
