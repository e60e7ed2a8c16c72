//! Integration tests for drag-and-drop reordering.
//!
//! Drives `BoardManager` against the in-process backend and checks the
//! cache, the patches sent, and the server-side result of each move.

#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::float_cmp,
    clippy::similar_names
)]

use std::sync::Arc;

use tokio::sync::mpsc;

use taskboard::board::{
    BoardEvent, BoardManager, BoardSettings, ColumnKey, DraggableLocation, DropResult, MovePhase,
    Scope, ScopeKey, Settlement,
};
use taskboard::remote::loopback::LoopbackTaskApi;
use taskboard_proto::task::{Task, TaskId, TaskStatus};

// ---------------------------------------------------------------------------
// Helper functions
// ---------------------------------------------------------------------------

fn task(id: u64, status: TaskStatus, position: f64) -> Task {
    Task::new(TaskId::new(id), format!("T{id}"), status, position)
}

/// Loads a global board over a loopback backend seeded with `tasks`.
async fn board(
    tasks: Vec<Task>,
) -> (
    BoardManager<LoopbackTaskApi>,
    Arc<LoopbackTaskApi>,
    mpsc::Receiver<BoardEvent>,
) {
    let api = Arc::new(LoopbackTaskApi::seeded(tasks));
    let (board, events) =
        BoardManager::new(Arc::clone(&api), Scope::Global, &BoardSettings::default()).unwrap();
    board.load().await.unwrap();
    (board, api, events)
}

fn gesture(id: u64, from: (&str, usize), to: Option<(&str, usize)>) -> DropResult {
    DropResult {
        draggable_id: format!("task-{id}"),
        source: DraggableLocation::new(from.0, from.1),
        destination: to.map(|(column, index)| DraggableLocation::new(column, index)),
    }
}

fn ids(tasks: &[Task]) -> Vec<u64> {
    tasks.iter().map(|task| task.id.get()).collect()
}

fn positions(tasks: &[Task]) -> Vec<f64> {
    tasks.iter().map(|task| task.position).collect()
}

fn drain(events: &mut mpsc::Receiver<BoardEvent>) -> Vec<BoardEvent> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    seen
}

// ---------------------------------------------------------------------------
// Same-column moves
// ---------------------------------------------------------------------------

#[tokio::test]
async fn move_to_head_takes_half_of_first_position() {
    let (board, api, _events) = board(vec![
        task(1, TaskStatus::Todo, 1000.0),
        task(2, TaskStatus::Todo, 2000.0),
        task(3, TaskStatus::Todo, 3000.0),
    ])
    .await;

    let outcome = board
        .handle_drop(gesture(3, ("todo", 2), Some(("todo", 0))))
        .await
        .unwrap()
        .expect("move should not be a no-op");

    assert!(outcome.is_committed());
    assert!(!outcome.status_changed);
    let todo = board.column(TaskStatus::Todo);
    assert_eq!(ids(&todo), vec![3, 1, 2]);
    assert_eq!(positions(&todo), vec![500.0, 1000.0, 2000.0]);

    let patches = api.patches();
    assert_eq!(patches.len(), 1);
    assert_eq!(patches[0].0, TaskId::new(3));
    assert_eq!(patches[0].1.position, Some(500.0));
    assert!(patches[0].1.status.is_none(), "status is only sent on column change");
}

#[tokio::test]
async fn move_between_neighbours_takes_midpoint() {
    let (board, api, _events) = board(vec![
        task(1, TaskStatus::Todo, 1000.0),
        task(2, TaskStatus::Todo, 2000.0),
        task(3, TaskStatus::Todo, 3000.0),
    ])
    .await;

    board
        .handle_drop(gesture(1, ("todo", 0), Some(("todo", 1))))
        .await
        .unwrap();

    let todo = board.column(TaskStatus::Todo);
    assert_eq!(ids(&todo), vec![2, 1, 3]);
    assert_eq!(positions(&todo), vec![2000.0, 2500.0, 3000.0]);
    assert_eq!(api.task(TaskId::new(1)).unwrap().position, 2500.0);
}

#[tokio::test]
async fn move_to_tail_appends_one_spacing() {
    let (board, _api, _events) = board(vec![
        task(1, TaskStatus::Todo, 1000.0),
        task(2, TaskStatus::Todo, 2000.0),
    ])
    .await;

    board
        .handle_drop(gesture(1, ("todo", 0), Some(("todo", 1))))
        .await
        .unwrap();

    let todo = board.column(TaskStatus::Todo);
    assert_eq!(ids(&todo), vec![2, 1]);
    assert_eq!(positions(&todo), vec![2000.0, 3000.0]);
}

#[tokio::test]
async fn drop_at_origin_and_cancel_change_nothing() {
    let (board, api, _events) = board(vec![
        task(1, TaskStatus::Todo, 1000.0),
        task(2, TaskStatus::Todo, 2000.0),
    ])
    .await;

    let same = board
        .handle_drop(gesture(1, ("todo", 0), Some(("todo", 0))))
        .await
        .unwrap();
    let cancelled = board.handle_drop(gesture(1, ("todo", 0), None)).await.unwrap();

    assert!(same.is_none());
    assert!(cancelled.is_none());
    assert!(api.patches().is_empty());
    assert_eq!(ids(&board.column(TaskStatus::Todo)), vec![1, 2]);
}

// ---------------------------------------------------------------------------
// Cross-column moves
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cross_column_move_lands_between_destination_neighbours() {
    let (board, api, _events) = board(vec![
        task(1, TaskStatus::Todo, 1000.0),
        task(2, TaskStatus::Todo, 2000.0),
        task(3, TaskStatus::Todo, 3000.0),
        task(4, TaskStatus::Done, 500.0),
        task(5, TaskStatus::Done, 1500.0),
    ])
    .await;

    let outcome = board
        .handle_drop(gesture(1, ("todo", 0), Some(("done", 1))))
        .await
        .unwrap()
        .unwrap();

    assert!(outcome.is_committed());
    assert!(outcome.status_changed);
    assert_eq!(outcome.position, Some(1000.0));

    let todo = board.column(TaskStatus::Todo);
    assert_eq!(ids(&todo), vec![2, 3]);
    assert_eq!(positions(&todo), vec![2000.0, 3000.0]);
    let done = board.column(TaskStatus::Done);
    assert_eq!(ids(&done), vec![4, 1, 5]);
    assert_eq!(positions(&done), vec![500.0, 1000.0, 1500.0]);
    assert!(done.iter().all(|task| task.status == TaskStatus::Done));

    let patches = api.patches();
    assert_eq!(patches[0].1.status, Some(TaskStatus::Done));
    assert_eq!(patches[0].1.position, Some(1000.0));
    let stored = api.task(TaskId::new(1)).unwrap();
    assert_eq!(stored.status, TaskStatus::Done);
    assert!(stored.completed_at.is_some());
}

#[tokio::test]
async fn move_into_empty_column_gets_default_spacing() {
    let (board, _api, _events) = board(vec![task(1, TaskStatus::Todo, 1000.0)]).await;

    board
        .move_task(TaskId::new(1), TaskStatus::InProgress, 0)
        .await
        .unwrap();

    let doing = board.column(TaskStatus::InProgress);
    assert_eq!(ids(&doing), vec![1]);
    assert_eq!(positions(&doing), vec![1000.0]);
    assert!(board.column(TaskStatus::Todo).is_empty());
}

#[tokio::test]
async fn destination_index_past_the_end_is_clamped() {
    let (board, _api, _events) = board(vec![
        task(1, TaskStatus::Todo, 1000.0),
        task(2, TaskStatus::Done, 700.0),
    ])
    .await;

    board
        .handle_drop(gesture(1, ("todo", 0), Some(("done", 9))))
        .await
        .unwrap();

    let done = board.column(TaskStatus::Done);
    assert_eq!(ids(&done), vec![2, 1]);
    assert_eq!(positions(&done), vec![700.0, 1700.0]);
}

#[tokio::test]
async fn stale_source_index_is_resolved_by_task_id() {
    let (board, _api, _events) = board(vec![
        task(1, TaskStatus::Todo, 1000.0),
        task(2, TaskStatus::Todo, 2000.0),
        task(3, TaskStatus::Done, 1000.0),
    ])
    .await;

    // The renderer thinks task 2 is at index 0.
    let outcome = board
        .handle_drop(gesture(2, ("todo", 0), Some(("done", 0))))
        .await
        .unwrap()
        .unwrap();

    assert!(outcome.is_committed());
    assert_eq!(ids(&board.column(TaskStatus::Todo)), vec![1]);
    assert_eq!(ids(&board.column(TaskStatus::Done)), vec![2, 3]);
}

#[tokio::test]
async fn phase_history_of_a_committed_move() {
    let (board, _api, _events) = board(vec![task(1, TaskStatus::Todo, 1000.0)]).await;

    let outcome = board
        .move_task(TaskId::new(1), TaskStatus::Done, 0)
        .await
        .unwrap();

    assert_eq!(
        outcome.phases,
        vec![
            MovePhase::Idle,
            MovePhase::Computing,
            MovePhase::OptimisticallyApplied,
            MovePhase::Committing,
            MovePhase::Settled(Settlement::Committed),
        ]
    );
}

// ---------------------------------------------------------------------------
// Aliases and atomicity
// ---------------------------------------------------------------------------

#[tokio::test]
async fn aliases_observe_the_same_list() {
    let (board, _api, _events) = board(vec![
        task(1, TaskStatus::Todo, 1000.0),
        task(2, TaskStatus::Todo, 2000.0),
    ])
    .await;
    board.register_alias("my-todo", TaskStatus::Todo);

    board
        .handle_drop(gesture(2, ("my-todo", 1), Some(("my-todo", 0))))
        .await
        .unwrap();

    let store = board.store();
    let canonical = store.column(ColumnKey::new(TaskStatus::Todo, Scope::Global));
    assert_eq!(ids(&canonical), vec![2, 1]);
    assert_eq!(store.read(&ScopeKey::Named("my-todo".into())), canonical);
    assert_eq!(store.read(&ScopeKey::Status(TaskStatus::Todo)), canonical);
}

#[tokio::test]
async fn unknown_alias_is_refused_without_side_effects() {
    let (board, api, _events) = board(vec![task(1, TaskStatus::Todo, 1000.0)]).await;

    let result = board
        .handle_drop(gesture(1, ("todo", 0), Some(("somewhere-else", 0))))
        .await;

    assert!(result.is_err());
    assert!(api.patches().is_empty());
    assert_eq!(ids(&board.column(TaskStatus::Todo)), vec![1]);
}

#[tokio::test]
async fn task_is_in_exactly_one_column_while_in_flight() {
    let (board, api, _events) = board(vec![
        task(1, TaskStatus::Todo, 1000.0),
        task(2, TaskStatus::Done, 1000.0),
    ])
    .await;
    let board = Arc::new(board);
    api.hold_patches();

    let handle = tokio::spawn({
        let board = Arc::clone(&board);
        async move { board.move_task(TaskId::new(1), TaskStatus::Done, 0).await }
    });
    while api.held_patches() == 0 {
        tokio::task::yield_now().await;
    }

    let holders: Vec<TaskStatus> = TaskStatus::ALL
        .into_iter()
        .filter(|status| board.column(*status).iter().any(|t| t.id == TaskId::new(1)))
        .collect();
    assert_eq!(holders, vec![TaskStatus::Done]);
    assert!(board.is_moving(TaskId::new(1)));

    api.release_patches(1);
    assert!(handle.await.unwrap().unwrap().is_committed());
    assert!(!board.is_moving(TaskId::new(1)));
}

#[tokio::test]
async fn move_emits_started_and_committed_events() {
    let (board, _api, mut events) = board(vec![task(1, TaskStatus::Todo, 1000.0)]).await;
    drain(&mut events);

    let outcome = board
        .move_task(TaskId::new(1), TaskStatus::Done, 0)
        .await
        .unwrap();

    let seen = drain(&mut events);
    assert!(seen.contains(&BoardEvent::MoveStarted {
        move_id: outcome.move_id,
        task_id: TaskId::new(1),
    }));
    assert!(seen.contains(&BoardEvent::MoveCommitted {
        move_id: outcome.move_id,
        task_id: TaskId::new(1),
    }));
}

// ---------------------------------------------------------------------------
// Precision exhaustion
// ---------------------------------------------------------------------------

#[tokio::test]
async fn exhausted_gap_is_renumbered_after_commit() {
    let (board, api, mut events) = board(vec![
        task(1, TaskStatus::Todo, 1.0),
        task(2, TaskStatus::Todo, 1.0 + f64::EPSILON),
        task(3, TaskStatus::Done, 1000.0),
    ])
    .await;
    drain(&mut events);

    let outcome = board
        .handle_drop(gesture(3, ("done", 0), Some(("todo", 1))))
        .await
        .unwrap()
        .unwrap();
    assert!(outcome.is_committed());

    let todo = board.column(TaskStatus::Todo);
    assert_eq!(ids(&todo), vec![1, 3, 2]);
    assert_eq!(positions(&todo), vec![1000.0, 2000.0, 3000.0]);

    let column = ColumnKey::new(TaskStatus::Todo, Scope::Global);
    assert!(!board.store().needs_renumber(column));
    assert!(drain(&mut events).contains(&BoardEvent::ColumnRenumbered { column }));
    assert_eq!(api.task(TaskId::new(2)).unwrap().position, 3000.0);
}
