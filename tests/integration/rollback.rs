//! Integration tests for failed moves.
//!
//! A refused patch must restore the cache to exactly what it was before the
//! move, unless a newer write has landed on the same columns in the
//! meantime; then the columns are re-fetched instead.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::similar_names)]

use std::sync::Arc;

use tokio::sync::mpsc;

use taskboard::board::{
    BoardEvent, BoardManager, BoardSettings, ColumnKey, MovePhase, Scope, Settlement,
};
use taskboard::remote::RemoteError;
use taskboard::remote::loopback::LoopbackTaskApi;
use taskboard_proto::task::{Task, TaskId, TaskStatus};

// ---------------------------------------------------------------------------
// Helper functions
// ---------------------------------------------------------------------------

fn task(id: u64, status: TaskStatus, position: f64) -> Task {
    Task::new(TaskId::new(id), format!("T{id}"), status, position)
}

type Fixture = (
    Arc<BoardManager<LoopbackTaskApi>>,
    Arc<LoopbackTaskApi>,
    mpsc::Receiver<BoardEvent>,
);

async fn board(tasks: Vec<Task>) -> Fixture {
    board_with(tasks, &BoardSettings::default()).await
}

async fn board_with(tasks: Vec<Task>, settings: &BoardSettings) -> Fixture {
    let api = Arc::new(LoopbackTaskApi::seeded(tasks));
    let (board, events) = BoardManager::new(Arc::clone(&api), Scope::Global, settings).unwrap();
    board.load().await.unwrap();
    (Arc::new(board), api, events)
}

fn ids(tasks: &[Task]) -> Vec<u64> {
    tasks.iter().map(|task| task.id.get()).collect()
}

fn failures(events: &mut mpsc::Receiver<BoardEvent>) -> Vec<(TaskId, String)> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let BoardEvent::MoveFailed {
            task_id, reason, ..
        } = event
        {
            seen.push((task_id, reason));
        }
    }
    seen
}

async fn wait_for_held(api: &LoopbackTaskApi, count: usize) {
    while api.held_patches() < count {
        tokio::task::yield_now().await;
    }
}

fn assert_each_task_once(board: &BoardManager<LoopbackTaskApi>, expected: usize) {
    let mut seen: Vec<u64> = TaskStatus::ALL
        .into_iter()
        .flat_map(|status| ids(&board.column(status)))
        .collect();
    seen.sort_unstable();
    let total = seen.len();
    seen.dedup();
    assert_eq!(seen.len(), total, "a task is cached in two columns");
    assert_eq!(total, expected);
}

fn assert_nothing_stale(board: &BoardManager<LoopbackTaskApi>) {
    for status in TaskStatus::ALL {
        assert!(
            !board.store().is_stale(ColumnKey::new(status, Scope::Global)),
            "{status} left stale"
        );
    }
}

// ---------------------------------------------------------------------------
// Exact rollback
// ---------------------------------------------------------------------------

#[tokio::test]
async fn refused_cross_column_move_restores_both_columns() {
    let (board, api, mut events) = board(vec![
        task(1, TaskStatus::Todo, 1000.0),
        task(2, TaskStatus::Todo, 2000.0),
        task(3, TaskStatus::Done, 500.0),
    ])
    .await;
    let todo_before = board.column(TaskStatus::Todo);
    let done_before = board.column(TaskStatus::Done);

    api.fail_next(RemoteError::PermissionDenied("not your task".into()));
    let outcome = board
        .move_task(TaskId::new(1), TaskStatus::Done, 0)
        .await
        .unwrap();

    assert_eq!(
        outcome.settlement,
        Settlement::RolledBack {
            error: RemoteError::PermissionDenied("not your task".into())
        }
    );
    assert_eq!(board.column(TaskStatus::Todo), todo_before);
    assert_eq!(board.column(TaskStatus::Done), done_before);
    assert_eq!(api.task(TaskId::new(1)).unwrap().status, TaskStatus::Todo);

    let failed = failures(&mut events);
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].0, TaskId::new(1));
    assert!(failed[0].1.contains("not your task"));
}

#[tokio::test]
async fn refused_same_column_move_restores_order_and_positions() {
    let (board, api, _events) = board(vec![
        task(1, TaskStatus::Todo, 1000.0),
        task(2, TaskStatus::Todo, 2000.0),
        task(3, TaskStatus::Todo, 3000.0),
    ])
    .await;
    let before = board.column(TaskStatus::Todo);

    api.fail_next(RemoteError::Network("connection reset".into()));
    let outcome = board
        .move_task(TaskId::new(3), TaskStatus::Todo, 0)
        .await
        .unwrap();

    assert!(matches!(outcome.settlement, Settlement::RolledBack { .. }));
    assert_eq!(board.column(TaskStatus::Todo), before);
    assert_eq!(
        outcome.phases,
        vec![
            MovePhase::Idle,
            MovePhase::Computing,
            MovePhase::OptimisticallyApplied,
            MovePhase::Committing,
            MovePhase::RollingBack,
            MovePhase::Settled(outcome.settlement.clone()),
        ]
    );
    assert!(!board.is_moving(TaskId::new(3)));
}

#[tokio::test]
async fn rollback_never_duplicates_the_task() {
    let (board, api, _events) = board(vec![
        task(1, TaskStatus::Todo, 1000.0),
        task(2, TaskStatus::InProgress, 1000.0),
    ])
    .await;

    api.fail_next(RemoteError::Server {
        status: 500,
        message: "boom".into(),
    });
    board
        .move_task(TaskId::new(1), TaskStatus::InProgress, 1)
        .await
        .unwrap();

    let occurrences: usize = TaskStatus::ALL
        .into_iter()
        .map(|status| {
            board
                .column(status)
                .iter()
                .filter(|task| task.id == TaskId::new(1))
                .count()
        })
        .sum();
    assert_eq!(occurrences, 1);
    assert_eq!(ids(&board.column(TaskStatus::Todo)), vec![1]);
}

#[tokio::test]
async fn later_success_after_rollback_commits_normally() {
    let (board, api, _events) = board(vec![task(1, TaskStatus::Todo, 1000.0)]).await;

    api.fail_next(RemoteError::Network("timeout".into()));
    let failed = board
        .move_task(TaskId::new(1), TaskStatus::Done, 0)
        .await
        .unwrap();
    let retried = board
        .move_task(TaskId::new(1), TaskStatus::Done, 0)
        .await
        .unwrap();

    assert!(!failed.is_committed());
    assert!(retried.is_committed());
    assert_eq!(ids(&board.column(TaskStatus::Done)), vec![1]);
    assert_eq!(api.task(TaskId::new(1)).unwrap().status, TaskStatus::Done);
}

// ---------------------------------------------------------------------------
// Overlapping moves
// ---------------------------------------------------------------------------

#[tokio::test]
async fn failure_after_newer_write_re_fetches_instead_of_rolling_back() {
    let (board, api, mut events) = board(vec![
        task(1, TaskStatus::Todo, 1000.0),
        task(2, TaskStatus::Todo, 2000.0),
        task(3, TaskStatus::Todo, 3000.0),
    ])
    .await;
    api.hold_patches();
    api.fail_task(TaskId::new(1), RemoteError::Validation("locked".into()));

    let first = tokio::spawn({
        let board = Arc::clone(&board);
        async move { board.move_task(TaskId::new(1), TaskStatus::Done, 0).await }
    });
    wait_for_held(&api, 1).await;

    let second = tokio::spawn({
        let board = Arc::clone(&board);
        async move { board.move_task(TaskId::new(2), TaskStatus::Done, 1).await }
    });
    wait_for_held(&api, 2).await;
    assert_eq!(ids(&board.column(TaskStatus::Done)), vec![1, 2]);

    // The first patch is refused while the second is still outstanding.
    api.release_patches(1);
    let first = first.await.unwrap().unwrap();
    assert!(matches!(first.settlement, Settlement::Superseded { .. }));
    let done = ColumnKey::new(TaskStatus::Done, Scope::Global);
    assert!(board.store().is_stale(done));

    api.release_patches(1);
    let second = second.await.unwrap().unwrap();
    assert!(second.is_committed());

    assert_eq!(ids(&board.column(TaskStatus::Todo)), vec![1, 3]);
    assert_eq!(ids(&board.column(TaskStatus::Done)), vec![2]);
    assert!(!board.store().is_stale(done));

    let failed = failures(&mut events);
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].0, TaskId::new(1));
}

#[tokio::test]
async fn refresh_is_deferred_while_a_move_is_in_flight() {
    let (board, api, _events) = board(vec![task(1, TaskStatus::Todo, 1000.0)]).await;
    api.hold_patches();

    let pending = tokio::spawn({
        let board = Arc::clone(&board);
        async move { board.move_task(TaskId::new(1), TaskStatus::Done, 0).await }
    });
    wait_for_held(&api, 1).await;

    // The server still has the task in todo; installing that now would undo
    // the optimistic move.
    assert!(!board.refresh(TaskStatus::Done).await.unwrap());
    assert_eq!(ids(&board.column(TaskStatus::Done)), vec![1]);

    api.release_patches(1);
    assert!(pending.await.unwrap().unwrap().is_committed());
    assert!(board.refresh(TaskStatus::Done).await.unwrap());
    assert_eq!(ids(&board.column(TaskStatus::Done)), vec![1]);
}

#[tokio::test]
async fn chained_failures_never_duplicate_a_task() {
    let (board, api, _events) = board(vec![
        task(1, TaskStatus::Todo, 1000.0),
        task(2, TaskStatus::Done, 1000.0),
    ])
    .await;
    api.hold_patches();
    api.fail_task(TaskId::new(1), RemoteError::Validation("locked".into()));
    api.fail_task(TaskId::new(2), RemoteError::Validation("locked".into()));

    let first = tokio::spawn({
        let board = Arc::clone(&board);
        async move { board.move_task(TaskId::new(1), TaskStatus::Done, 0).await }
    });
    wait_for_held(&api, 1).await;

    // Moves task 2 out of a column that still holds the first move's
    // optimistic state.
    let second = tokio::spawn({
        let board = Arc::clone(&board);
        async move {
            board
                .move_task(TaskId::new(2), TaskStatus::InProgress, 0)
                .await
        }
    });
    wait_for_held(&api, 2).await;

    api.release_patches(1);
    let first = first.await.unwrap().unwrap();
    assert!(matches!(first.settlement, Settlement::Superseded { .. }));

    api.release_patches(1);
    let second = second.await.unwrap().unwrap();
    assert!(matches!(second.settlement, Settlement::Superseded { .. }));

    assert_eq!(ids(&board.column(TaskStatus::Todo)), vec![1]);
    assert_eq!(ids(&board.column(TaskStatus::Done)), vec![2]);
    assert!(board.column(TaskStatus::InProgress).is_empty());
    assert_each_task_once(&board, 2);
    assert_nothing_stale(&board);
}

#[tokio::test]
async fn deferred_refresh_runs_when_the_last_move_commits() {
    let settings = BoardSettings {
        reconcile_after_commit: false,
        ..BoardSettings::default()
    };
    let (board, api, _events) = board_with(
        vec![
            task(1, TaskStatus::Todo, 1000.0),
            task(2, TaskStatus::Done, 1000.0),
        ],
        &settings,
    )
    .await;
    api.hold_patches();
    api.fail_task(TaskId::new(1), RemoteError::Validation("locked".into()));

    let first = tokio::spawn({
        let board = Arc::clone(&board);
        async move { board.move_task(TaskId::new(1), TaskStatus::Done, 0).await }
    });
    wait_for_held(&api, 1).await;
    let second = tokio::spawn({
        let board = Arc::clone(&board);
        async move {
            board
                .move_task(TaskId::new(2), TaskStatus::InProgress, 0)
                .await
        }
    });
    wait_for_held(&api, 2).await;

    api.release_patches(1);
    let first = first.await.unwrap().unwrap();
    assert!(matches!(first.settlement, Settlement::Superseded { .. }));
    assert!(board
        .store()
        .is_stale(ColumnKey::new(TaskStatus::Done, Scope::Global)));

    api.release_patches(1);
    assert!(second.await.unwrap().unwrap().is_committed());

    assert_eq!(ids(&board.column(TaskStatus::Todo)), vec![1]);
    assert!(board.column(TaskStatus::Done).is_empty());
    assert_eq!(ids(&board.column(TaskStatus::InProgress)), vec![2]);
    assert_each_task_once(&board, 2);
    assert_nothing_stale(&board);
}
