//! Kanban board engine: ordering, cache, and optimistic reordering.
//!
//! Tasks are cached per logical column ([`ColumnKey`]) in a [`TaskStoreView`].
//! A drag gesture is turned into a [`MoveRequest`] and executed by the
//! [`ReorderCoordinator`], which writes the new order into the cache before
//! the backend confirms it and rolls back precisely if the backend refuses.

pub mod allocator;
pub mod coordinator;
pub mod drag;
pub mod manager;
pub mod store;

pub use allocator::{Allocation, DEFAULT_SPACING, PositionAllocator};
pub use coordinator::{MoveOutcome, MovePhase, MoveRequest, ReorderCoordinator, Settlement};
pub use drag::{DragError, DraggableLocation, DropResult};
pub use manager::{BoardManager, BoardSettings};
pub use store::{StoreError, TaskStoreView};

use std::fmt;

use taskboard_proto::task::{ProjectId, TaskId, TaskStatus};
use uuid::Uuid;

use crate::remote::RemoteError;

/// Which slice of tasks a board session shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Scope {
    /// Every task of the user.
    Global,
    /// Only the tasks of one project.
    Project(ProjectId),
}

impl Scope {
    /// The project filter to send to the backend.
    #[must_use]
    pub const fn project_id(self) -> Option<ProjectId> {
        match self {
            Self::Global => None,
            Self::Project(id) => Some(id),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => f.write_str("global"),
            Self::Project(id) => write!(f, "project:{id}"),
        }
    }
}

/// Canonical identity of a logical column: one status within one scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ColumnKey {
    /// Status the column shows.
    pub status: TaskStatus,
    /// Scope the column belongs to.
    pub scope: Scope,
}

impl ColumnKey {
    /// Creates a column key.
    #[must_use]
    pub const fn new(status: TaskStatus, scope: Scope) -> Self {
        Self { status, scope }
    }
}

impl fmt::Display for ColumnKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.scope, self.status)
    }
}

/// Any key a cached list can be addressed by.
///
/// Several keys may alias the same [`ColumnKey`]; the store resolves them all
/// to one canonical list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ScopeKey {
    /// The canonical key itself.
    Column(ColumnKey),
    /// Status-only key, resolved against the session scope.
    Status(TaskStatus),
    /// A per-filter view registered as an alias of one column.
    Named(String),
}

impl From<ColumnKey> for ScopeKey {
    fn from(column: ColumnKey) -> Self {
        Self::Column(column)
    }
}

impl From<TaskStatus> for ScopeKey {
    fn from(status: TaskStatus) -> Self {
        Self::Status(status)
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Column(column) => write!(f, "{column}"),
            Self::Status(status) => write!(f, "{status}"),
            Self::Named(name) => write!(f, "@{name}"),
        }
    }
}

/// Identifier of one reorder operation (UUID v7, time-ordered).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MoveId(Uuid);

impl MoveId {
    /// Creates a new time-ordered move identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for MoveId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MoveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Notifications for the rendering layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoardEvent {
    /// A column's cached list was replaced.
    ColumnChanged {
        /// The column that changed.
        column: ColumnKey,
    },
    /// A column was marked stale and should be re-fetched.
    ColumnInvalidated {
        /// The stale column.
        column: ColumnKey,
    },
    /// A column was renumbered onto the integer ladder.
    ColumnRenumbered {
        /// The renumbered column.
        column: ColumnKey,
    },
    /// A move was applied optimistically and is awaiting the backend.
    MoveStarted {
        /// The operation.
        move_id: MoveId,
        /// The task being moved.
        task_id: TaskId,
    },
    /// The backend accepted a move.
    MoveCommitted {
        /// The operation.
        move_id: MoveId,
        /// The task that moved.
        task_id: TaskId,
    },
    /// The backend rejected a move; the task snaps back.
    MoveFailed {
        /// The operation.
        move_id: MoveId,
        /// The task whose move failed.
        task_id: TaskId,
        /// Human-readable reason, suitable for a notification.
        reason: String,
    },
}

/// Reasons a move request is refused before it touches the cache.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MoveError {
    /// The source or destination key resolves to no column.
    #[error("unknown column key: {0}")]
    UnknownAlias(ScopeKey),
    /// The task is not in the source column's cached list.
    #[error("task {task_id} is not in column {column}")]
    TaskNotInColumn {
        /// The task that was dragged.
        task_id: TaskId,
        /// The column it was dragged from.
        column: ColumnKey,
    },
    /// The drag event could not be decoded.
    #[error("invalid drag event: {0}")]
    Drag(#[from] DragError),
}

/// Errors from board-level operations other than reorders.
#[derive(Debug, thiserror::Error)]
pub enum BoardError {
    /// The backend refused or could not be reached.
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),
    /// A move was refused before it reached the cache.
    #[error("move refused: {0}")]
    Move(#[from] MoveError),
    /// The task is not in any cached column.
    #[error("task {0} is not loaded on this board")]
    TaskNotCached(TaskId),
    /// The configured spacing is not a finite positive number.
    #[error("invalid position spacing: {0}")]
    InvalidSpacing(f64),
    /// The task title was rejected locally.
    #[error("invalid title: {0}")]
    Title(&'static str),
}
