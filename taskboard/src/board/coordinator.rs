//! Optimistic reorder execution.
//!
//! One call to [`ReorderCoordinator::reorder`] drives one gesture through
//! `Idle → Computing → OptimisticallyApplied → Committing → Settled`, with a
//! detour through `RollingBack` when the backend refuses the move. The cache
//! is written before the patch is sent and is only rewound if nothing else
//! wrote the affected columns in the meantime.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use parking_lot::Mutex;

use taskboard_proto::api::{DEFAULT_LIST_LIMIT, ListQuery};
use taskboard_proto::patch::TaskPatch;
use taskboard_proto::task::{Task, TaskId, TaskStatus};

use super::allocator::{Allocation, PositionAllocator};
use super::drag::DropResult;
use super::store::TaskStoreView;
use super::{BoardEvent, ColumnKey, MoveError, MoveId, ScopeKey};
use crate::remote::{RemoteError, TaskApi, fetch_all};

/// A request to move one task, as produced by the drag decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveRequest {
    /// The task being moved.
    pub task_id: TaskId,
    /// Key of the column the gesture started in.
    pub source: ScopeKey,
    /// Display index the gesture started at.
    pub source_index: usize,
    /// Key of the column the task was released over.
    pub destination: ScopeKey,
    /// Display index to insert at.
    pub destination_index: usize,
}

impl MoveRequest {
    /// Creates a move request.
    pub fn new(
        task_id: TaskId,
        source: impl Into<ScopeKey>,
        source_index: usize,
        destination: impl Into<ScopeKey>,
        destination_index: usize,
    ) -> Self {
        Self {
            task_id,
            source: source.into(),
            source_index,
            destination: destination.into(),
            destination_index,
        }
    }
}

/// How a move ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    /// The gesture changed nothing; no request was sent.
    NoOp,
    /// The backend accepted the move.
    Committed,
    /// The backend refused the move and the cache was restored to its
    /// pre-move state.
    RolledBack {
        /// Why the backend refused.
        error: RemoteError,
    },
    /// The backend refused the move, but a newer write had already touched
    /// the affected columns, so they were re-fetched instead of rewound.
    Superseded {
        /// Why the backend refused.
        error: RemoteError,
    },
}

impl Settlement {
    /// The backend error, if the move failed.
    #[must_use]
    pub const fn error(&self) -> Option<&RemoteError> {
        match self {
            Self::RolledBack { error } | Self::Superseded { error } => Some(error),
            Self::NoOp | Self::Committed => None,
        }
    }
}

/// Lifecycle state of one reorder operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MovePhase {
    /// Not started.
    Idle,
    /// Reading the affected columns and computing the new order.
    Computing,
    /// The new order is in the cache; nothing sent yet.
    OptimisticallyApplied,
    /// Waiting for the backend.
    Committing,
    /// Restoring the pre-move state after a refusal.
    RollingBack,
    /// Finished.
    Settled(Settlement),
}

impl MovePhase {
    /// Whether `next` is a legal successor of this phase.
    #[must_use]
    pub const fn can_advance_to(&self, next: &Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Computing)
                | (
                    Self::Computing,
                    Self::OptimisticallyApplied | Self::Settled(Settlement::NoOp)
                )
                | (Self::OptimisticallyApplied, Self::Committing)
                | (
                    Self::Committing,
                    Self::RollingBack | Self::Settled(Settlement::Committed)
                )
                | (
                    Self::RollingBack,
                    Self::Settled(Settlement::RolledBack { .. } | Settlement::Superseded { .. })
                )
        )
    }

    /// Whether this is the terminal phase.
    #[must_use]
    pub const fn is_settled(&self) -> bool {
        matches!(self, Self::Settled(_))
    }
}

/// Result of one reorder operation.
#[derive(Debug, Clone, PartialEq)]
pub struct MoveOutcome {
    /// Operation identifier.
    pub move_id: MoveId,
    /// The task that was dragged.
    pub task_id: TaskId,
    /// Resolved source column.
    pub from: ColumnKey,
    /// Resolved destination column.
    pub to: ColumnKey,
    /// Position the task was given, `None` for a no-op.
    pub position: Option<f64>,
    /// Whether the move changed the task's status.
    pub status_changed: bool,
    /// How the operation ended.
    pub settlement: Settlement,
    /// Every phase the operation went through, starting at `Idle`.
    pub phases: Vec<MovePhase>,
}

impl MoveOutcome {
    /// Whether the backend accepted the move.
    #[must_use]
    pub const fn is_committed(&self) -> bool {
        matches!(self.settlement, Settlement::Committed)
    }
}

/// Phase history of one operation, with transition checking.
#[derive(Debug)]
struct PhaseLog {
    move_id: MoveId,
    history: Vec<MovePhase>,
}

impl PhaseLog {
    fn new(move_id: MoveId) -> Self {
        Self {
            move_id,
            history: vec![MovePhase::Idle],
        }
    }

    fn advance(&mut self, next: MovePhase) {
        let legal = self
            .history
            .last()
            .is_none_or(|current| current.can_advance_to(&next));
        if !legal {
            tracing::warn!(
                move_id = %self.move_id,
                from = ?self.history.last(),
                to = ?next,
                "illegal move phase transition"
            );
        }
        debug_assert!(legal, "illegal move phase transition to {next:?}");
        tracing::debug!(move_id = %self.move_id, phase = ?next, "move phase");
        self.history.push(next);
    }

    fn into_history(self) -> Vec<MovePhase> {
        self.history
    }
}

/// Moves that have been applied to the cache but not yet settled.
#[derive(Debug, Default)]
struct InFlight {
    latest: HashMap<TaskId, MoveId>,
    columns: HashMap<ColumnKey, usize>,
}

/// Registration of one unsettled move. Dropping it (including when the
/// reorder future is dropped mid-flight) releases the registration.
struct PendingMove<'a> {
    registry: &'a Mutex<InFlight>,
    move_id: MoveId,
    task_id: TaskId,
    columns: Vec<ColumnKey>,
    released: bool,
}

impl<'a> PendingMove<'a> {
    fn register(
        registry: &'a Mutex<InFlight>,
        move_id: MoveId,
        task_id: TaskId,
        columns: Vec<ColumnKey>,
    ) -> Self {
        {
            let mut in_flight = registry.lock();
            in_flight.latest.insert(task_id, move_id);
            for column in &columns {
                *in_flight.columns.entry(*column).or_default() += 1;
            }
        }
        Self {
            registry,
            move_id,
            task_id,
            columns,
            released: false,
        }
    }

    fn release(&mut self) {
        if std::mem::replace(&mut self.released, true) {
            return;
        }
        let mut in_flight = self.registry.lock();
        if in_flight.latest.get(&self.task_id) == Some(&self.move_id) {
            in_flight.latest.remove(&self.task_id);
        }
        for column in &self.columns {
            if let Entry::Occupied(mut count) = in_flight.columns.entry(*column) {
                *count.get_mut() = count.get().saturating_sub(1);
                if *count.get() == 0 {
                    count.remove();
                }
            }
        }
    }
}

impl Drop for PendingMove<'_> {
    fn drop(&mut self) {
        self.release();
    }
}

/// The computed effect of a move, before it is written.
#[derive(Debug)]
struct Plan {
    moved: Task,
    allocation: Allocation,
    status_changed: bool,
    before: Vec<(ColumnKey, Vec<Task>)>,
    after: Vec<(ColumnKey, Vec<Task>)>,
    expected: Vec<(ColumnKey, u64)>,
}

/// Executes drag-and-drop moves against a shared cache and a task backend.
pub struct ReorderCoordinator<A> {
    store: Arc<TaskStoreView>,
    api: Arc<A>,
    allocator: PositionAllocator,
    page_limit: u32,
    reconcile_after_commit: bool,
    in_flight: Mutex<InFlight>,
}

impl<A: TaskApi> ReorderCoordinator<A> {
    /// Creates a coordinator over a cache and a backend.
    pub fn new(store: Arc<TaskStoreView>, api: Arc<A>, allocator: PositionAllocator) -> Self {
        Self {
            store,
            api,
            allocator,
            page_limit: DEFAULT_LIST_LIMIT,
            reconcile_after_commit: true,
            in_flight: Mutex::new(InFlight::default()),
        }
    }

    /// Whether committed moves re-fetch their columns (default on).
    #[must_use]
    pub fn with_reconcile(mut self, enabled: bool) -> Self {
        self.reconcile_after_commit = enabled;
        self
    }

    /// Page size used when re-fetching columns.
    #[must_use]
    pub fn with_page_limit(mut self, limit: u32) -> Self {
        self.page_limit = limit.max(1);
        self
    }

    /// The cache this coordinator writes.
    #[must_use]
    pub fn store(&self) -> &Arc<TaskStoreView> {
        &self.store
    }

    /// The backend this coordinator commits to.
    #[must_use]
    pub fn api(&self) -> &Arc<A> {
        &self.api
    }

    /// The allocator used for new positions.
    #[must_use]
    pub const fn allocator(&self) -> &PositionAllocator {
        &self.allocator
    }

    /// Whether a move of `task_id` is applied locally but not yet settled.
    #[must_use]
    pub fn is_moving(&self, task_id: TaskId) -> bool {
        self.in_flight.lock().latest.contains_key(&task_id)
    }

    fn is_column_busy(&self, column: ColumnKey) -> bool {
        self.in_flight.lock().columns.contains_key(&column)
    }

    /// Decodes and executes a drag-release event.
    ///
    /// Returns `Ok(None)` for gestures that change nothing (cancelled, or
    /// released where they started).
    ///
    /// # Errors
    ///
    /// Returns a [`MoveError`] if the event cannot be decoded or does not
    /// match the cache.
    pub async fn handle_drop(&self, event: DropResult) -> Result<Option<MoveOutcome>, MoveError> {
        match event.into_request()? {
            Some(request) => self.reorder(request).await.map(Some),
            None => {
                tracing::trace!("drop changed nothing");
                Ok(None)
            }
        }
    }

    /// Executes one move: optimistic cache write, backend patch, then
    /// commit or rollback.
    ///
    /// A refusal from the backend is not an `Err`: the operation still runs
    /// to completion and reports it through [`MoveOutcome::settlement`] and
    /// a [`BoardEvent::MoveFailed`].
    ///
    /// # Errors
    ///
    /// Returns a [`MoveError`], without touching the cache, if a key does not
    /// resolve or the task is not in the source column.
    pub async fn reorder(&self, request: MoveRequest) -> Result<MoveOutcome, MoveError> {
        let move_id = MoveId::new();
        let mut phases = PhaseLog::new(move_id);
        phases.advance(MovePhase::Computing);

        let from = self
            .store
            .resolve(&request.source)
            .ok_or_else(|| MoveError::UnknownAlias(request.source.clone()))?;
        let to = self
            .store
            .resolve(&request.destination)
            .ok_or_else(|| MoveError::UnknownAlias(request.destination.clone()))?;

        if from == to && request.source_index == request.destination_index {
            return Ok(no_op(&request, from, phases));
        }

        let (mut plan, versions) = loop {
            let Some(mut plan) = self.plan(&request, from, to)? else {
                tracing::debug!(
                    move_id = %move_id,
                    task_id = %request.task_id,
                    "task already at its destination slot"
                );
                return Ok(no_op(&request, from, phases));
            };
            let writes = std::mem::take(&mut plan.after);
            if let Some(versions) = self.store.apply_if_unchanged(&plan.expected, writes) {
                break (plan, versions);
            }
            tracing::debug!(move_id = %move_id, "cache changed while computing move, recomputing");
        };
        let applied: Vec<(ColumnKey, u64)> = plan
            .before
            .iter()
            .map(|(column, _)| *column)
            .zip(versions)
            .collect();
        phases.advance(MovePhase::OptimisticallyApplied);

        let task_id = request.task_id;
        let position = plan.allocation.position;
        if plan.allocation.needs_renumber {
            tracing::debug!(column = %to, "position gap exhausted, renumber scheduled");
            self.store.mark_renumber(to);
        }
        let mut pending = PendingMove::register(
            &self.in_flight,
            move_id,
            task_id,
            applied.iter().map(|(column, _)| *column).collect(),
        );
        self.store.emit(BoardEvent::MoveStarted { move_id, task_id });

        phases.advance(MovePhase::Committing);
        let status = plan.status_changed.then_some(plan.moved.status);
        let patch = TaskPatch::reorder(status, position);
        let result = self.api.patch_task(task_id, &patch).await;
        pending.release();

        let columns = distinct(from, to);
        let settlement = match result {
            Ok(_) => {
                phases.advance(MovePhase::Settled(Settlement::Committed));
                tracing::info!(
                    move_id = %move_id,
                    task_id = %task_id,
                    column = %to,
                    position,
                    "move committed"
                );
                self.store.emit(BoardEvent::MoveCommitted { move_id, task_id });
                self.after_commit(&columns).await;
                Settlement::Committed
            }
            Err(error) => {
                phases.advance(MovePhase::RollingBack);
                let before = std::mem::take(&mut plan.before);
                let settlement = if self.store.apply_if_unchanged(&applied, before).is_some() {
                    tracing::warn!(
                        move_id = %move_id,
                        task_id = %task_id,
                        error = %error,
                        "move rolled back"
                    );
                    self.refresh_stale(&columns).await;
                    Settlement::RolledBack {
                        error: error.clone(),
                    }
                } else {
                    tracing::warn!(
                        move_id = %move_id,
                        task_id = %task_id,
                        error = %error,
                        "move failed after a newer write, re-fetching instead of rolling back"
                    );
                    self.reconcile(&columns).await;
                    Settlement::Superseded {
                        error: error.clone(),
                    }
                };
                self.store.emit(BoardEvent::MoveFailed {
                    move_id,
                    task_id,
                    reason: error.to_string(),
                });
                phases.advance(MovePhase::Settled(settlement.clone()));
                settlement
            }
        };

        Ok(MoveOutcome {
            move_id,
            task_id,
            from,
            to,
            position: Some(position),
            status_changed: plan.status_changed,
            settlement,
            phases: phases.into_history(),
        })
    }

    /// Computes the new column contents for a move from fresh snapshots.
    ///
    /// Returns `None` if the task already sits where a same-column move would
    /// put it.
    fn plan(
        &self,
        request: &MoveRequest,
        from: ColumnKey,
        to: ColumnKey,
    ) -> Result<Option<Plan>, MoveError> {
        let (source, source_version) = self.store.snapshot(from);
        let index = source
            .iter()
            .position(|task| task.id == request.task_id)
            .ok_or(MoveError::TaskNotInColumn {
                task_id: request.task_id,
                column: from,
            })?;
        if index != request.source_index {
            tracing::debug!(
                task_id = %request.task_id,
                reported = request.source_index,
                actual = index,
                "stale source index, locating task by id"
            );
        }

        let mut depleted = source.clone();
        let moved = depleted.remove(index);
        let original_status = moved.status;

        if from == to {
            if index == request.destination_index.min(depleted.len()) {
                return Ok(None);
            }
            let (moved, allocation) =
                self.insert(&mut depleted, moved, request.destination_index, to.status);
            return Ok(Some(Plan {
                status_changed: moved.status != original_status,
                moved,
                allocation,
                before: vec![(from, source)],
                after: vec![(from, depleted)],
                expected: vec![(from, source_version)],
            }));
        }

        let (destination, destination_version) = self.store.snapshot(to);
        let mut augmented = destination.clone();
        let (moved, allocation) =
            self.insert(&mut augmented, moved, request.destination_index, to.status);
        Ok(Some(Plan {
            status_changed: moved.status != original_status,
            moved,
            allocation,
            before: vec![(from, source), (to, destination)],
            after: vec![(from, depleted), (to, augmented)],
            expected: vec![(from, source_version), (to, destination_version)],
        }))
    }

    /// Inserts `task` at `index` (clamped to the tail) with a position
    /// allocated from its new neighbours.
    fn insert(
        &self,
        list: &mut Vec<Task>,
        mut task: Task,
        index: usize,
        status: TaskStatus,
    ) -> (Task, Allocation) {
        list.retain(|other| other.id != task.id);
        let slot = index.min(list.len());
        let before = slot
            .checked_sub(1)
            .and_then(|prev| list.get(prev))
            .map(|task| task.position);
        let after = list.get(slot).map(|task| task.position);
        let allocation = self.allocator.allocate(before, after);
        task.status = status;
        task.position = allocation.position;
        list.insert(slot, task.clone());
        (task, allocation)
    }

    async fn after_commit(&self, columns: &[ColumnKey]) {
        for column in columns {
            if !self.store.needs_renumber(*column) {
                continue;
            }
            if let Err(error) = self.renumber_column(*column).await {
                tracing::warn!(
                    column = %column,
                    error = %error,
                    "renumber failed, will retry after next commit"
                );
            }
        }
        if self.reconcile_after_commit {
            self.reconcile(columns).await;
        } else {
            self.refresh_stale(columns).await;
        }
    }

    /// Re-fetches the columns among `columns` that are marked stale, such as
    /// those whose refresh an earlier move had to defer while this one was
    /// in flight.
    async fn refresh_stale(&self, columns: &[ColumnKey]) {
        let stale: Vec<ColumnKey> = columns
            .iter()
            .copied()
            .filter(|column| self.store.is_stale(*column))
            .collect();
        if !stale.is_empty() {
            self.reconcile(&stale).await;
        }
    }

    /// Marks columns stale and re-fetches them.
    async fn reconcile(&self, columns: &[ColumnKey]) {
        for column in columns {
            self.store.invalidate(*column);
            match self.refresh(*column).await {
                Ok(true) => {}
                Ok(false) => tracing::debug!(column = %column, "refresh deferred"),
                Err(error) => {
                    tracing::warn!(
                        column = %column,
                        error = %error,
                        "refresh failed, column left stale"
                    );
                }
            }
        }
    }

    /// Replaces a column with the backend's current list.
    ///
    /// Returns `Ok(false)` without installing anything if moves touching the
    /// column are still in flight, or if the cache was written while the
    /// fetch was outstanding; the column then stays stale.
    ///
    /// # Errors
    ///
    /// Returns the [`RemoteError`] of a failed page request.
    pub async fn refresh(&self, column: ColumnKey) -> Result<bool, RemoteError> {
        if self.is_column_busy(column) {
            return Ok(false);
        }
        let version = self.store.version(column);
        let query = ListQuery::column(column.status, column.scope.project_id());
        let mut tasks = fetch_all(self.api.as_ref(), query, self.page_limit).await?;
        tasks.sort_by(|a, b| a.position.total_cmp(&b.position).then(a.id.cmp(&b.id)));
        let crowded = tasks
            .windows(2)
            .any(|pair| pair[0].position.total_cmp(&pair[1].position).is_ge());

        if !self.store.replace_fetched(column, version, tasks) {
            tracing::debug!(column = %column, "fetched list raced a local write, discarded");
            return Ok(false);
        }
        if crowded {
            tracing::debug!(
                column = %column,
                "fetched column has tied positions, renumber scheduled"
            );
            self.store.mark_renumber(column);
        }
        tracing::debug!(column = %column, "column refreshed");
        Ok(true)
    }

    /// Rewrites every position in a column onto the integer ladder
    /// (`spacing, 2·spacing, …`), patching the tasks whose position changes.
    ///
    /// Skipped (returning `Ok(0)`) while moves touching the column are in
    /// flight. Returns the number of tasks patched.
    ///
    /// # Errors
    ///
    /// Returns the first failed patch; the renumber flag stays set and the
    /// column is marked stale.
    pub async fn renumber_column(&self, column: ColumnKey) -> Result<usize, RemoteError> {
        if self.is_column_busy(column) {
            tracing::debug!(column = %column, "renumber deferred, column busy");
            return Ok(0);
        }
        let (tasks, version) = self.store.snapshot(column);
        let ladder = self.allocator.renumber(tasks.len());
        let mut renumbered = Vec::with_capacity(tasks.len());
        let mut patched = 0;
        for (mut task, position) in tasks.into_iter().zip(ladder) {
            if task.position.total_cmp(&position).is_ne() {
                if let Err(error) = self
                    .api
                    .patch_task(task.id, &TaskPatch::position(position))
                    .await
                {
                    self.store.invalidate(column);
                    return Err(error);
                }
                patched += 1;
                task.position = position;
            }
            renumbered.push(task);
        }

        if self
            .store
            .apply_if_unchanged(&[(column, version)], vec![(column, renumbered)])
            .is_none()
        {
            self.store.invalidate(column);
        }
        self.store.clear_renumber(column);
        self.store.emit(BoardEvent::ColumnRenumbered { column });
        tracing::info!(column = %column, patched, "column renumbered");
        Ok(patched)
    }
}

fn no_op(request: &MoveRequest, column: ColumnKey, mut phases: PhaseLog) -> MoveOutcome {
    phases.advance(MovePhase::Settled(Settlement::NoOp));
    MoveOutcome {
        move_id: phases.move_id,
        task_id: request.task_id,
        from: column,
        to: column,
        position: None,
        status_changed: false,
        settlement: Settlement::NoOp,
        phases: phases.into_history(),
    }
}

fn distinct(from: ColumnKey, to: ColumnKey) -> Vec<ColumnKey> {
    if from == to { vec![from] } else { vec![from, to] }
}
