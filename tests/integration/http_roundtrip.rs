//! End-to-end tests: the HTTP client and board against an in-process task
//! server on an OS-assigned port.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::float_cmp)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use taskboard::board::{BoardManager, BoardSettings, Scope, Settlement};
use taskboard::remote::http::HttpTaskApi;
use taskboard::remote::{RemoteError, TaskApi, fetch_all};
use taskboard_proto::api::ListQuery;
use taskboard_proto::patch::{NewTask, TaskPatch};
use taskboard_proto::task::{Task, TaskId, TaskStatus};
use taskboard_server::api::{AppState, start_server_with_state};
use taskboard_server::store::TaskStore;

// ---------------------------------------------------------------------------
// Helper functions
// ---------------------------------------------------------------------------

struct Server {
    addr: SocketAddr,
    state: Arc<AppState>,
    handle: JoinHandle<()>,
}

impl Server {
    fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    fn api(&self) -> HttpTaskApi {
        HttpTaskApi::new(self.url(), Duration::from_secs(5)).unwrap()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn start(tasks: Vec<Task>) -> Server {
    let store = TaskStore::new();
    for task in tasks {
        store.insert(task).await;
    }
    let state = Arc::new(AppState::new(store));
    let (addr, handle) = start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .unwrap();
    Server {
        addr,
        state,
        handle,
    }
}

fn task(id: u64, status: TaskStatus, position: f64) -> Task {
    Task::new(TaskId::new(id), format!("T{id}"), status, position)
}

fn ids(tasks: &[Task]) -> Vec<u64> {
    tasks.iter().map(|task| task.id.get()).collect()
}

// ---------------------------------------------------------------------------
// Client against server
// ---------------------------------------------------------------------------

#[tokio::test]
async fn board_moves_persist_on_the_server() {
    let server = start(vec![
        task(1, TaskStatus::Todo, 1000.0),
        task(2, TaskStatus::Todo, 2000.0),
        task(3, TaskStatus::Done, 500.0),
        task(4, TaskStatus::Done, 1500.0),
    ])
    .await;
    let settings = BoardSettings {
        page_limit: 1,
        ..BoardSettings::default()
    };
    let (board, _events) =
        BoardManager::new(Arc::new(server.api()), Scope::Global, &settings).unwrap();
    board.load().await.unwrap();
    assert_eq!(ids(&board.column(TaskStatus::Done)), vec![3, 4]);

    let outcome = board
        .move_task(TaskId::new(1), TaskStatus::Done, 1)
        .await
        .unwrap();

    assert!(outcome.is_committed());
    assert_eq!(ids(&board.column(TaskStatus::Done)), vec![3, 1, 4]);
    let stored = server.state.store.get(TaskId::new(1)).await.unwrap();
    assert_eq!(stored.status, TaskStatus::Done);
    assert_eq!(stored.position, 1000.0);
    assert!(stored.completed_at.is_some());
}

#[tokio::test]
async fn move_of_deleted_task_rolls_back() {
    let server = start(vec![
        task(1, TaskStatus::Todo, 1000.0),
        task(2, TaskStatus::Todo, 2000.0),
    ])
    .await;
    let (board, _events) =
        BoardManager::new(Arc::new(server.api()), Scope::Global, &BoardSettings::default())
            .unwrap();
    board.load().await.unwrap();
    let before = board.column(TaskStatus::Todo);

    // Someone else deletes the task after our load.
    assert!(server.state.store.remove(TaskId::new(2)).await);
    let outcome = board
        .move_task(TaskId::new(2), TaskStatus::Todo, 0)
        .await
        .unwrap();

    assert_eq!(
        outcome.settlement,
        Settlement::RolledBack {
            error: RemoteError::NotFound(TaskId::new(2))
        }
    );
    assert_eq!(board.column(TaskStatus::Todo), before);
}

#[tokio::test]
async fn create_and_patch_round_trip() {
    let server = start(Vec::new()).await;
    let api = server.api();

    let created = api.create_task(&NewTask::titled("  First card ")).await.unwrap();
    assert_eq!(created.title, "First card");
    assert_eq!(created.status, TaskStatus::Todo);
    assert_eq!(created.position, 1000.0);

    let patched = api
        .patch_task(created.id, &TaskPatch::reorder(Some(TaskStatus::InProgress), 250.0))
        .await
        .unwrap();
    assert_eq!(patched.status, TaskStatus::InProgress);
    assert_eq!(patched.position, 250.0);
    assert!(patched.started_at.is_some());
}

#[tokio::test]
async fn client_maps_server_errors() {
    let server = start(vec![task(1, TaskStatus::Todo, 1000.0)]).await;
    let api = server.api();

    let missing = api
        .patch_task(TaskId::new(404), &TaskPatch::position(1.0))
        .await
        .unwrap_err();
    assert_eq!(missing, RemoteError::NotFound(TaskId::new(404)));

    let blank = TaskPatch {
        title: Some("   ".into()),
        ..TaskPatch::default()
    };
    let invalid = api.patch_task(TaskId::new(1), &blank).await.unwrap_err();
    assert_eq!(invalid, RemoteError::Validation("title is required".into()));
}

#[tokio::test]
async fn unreachable_server_is_a_network_error() {
    // Reserve a port, then free it so nothing is listening there.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let api = HttpTaskApi::new(format!("http://{addr}/"), Duration::from_millis(500)).unwrap();
    let err = api.list_tasks(&ListQuery::default()).await.unwrap_err();
    assert!(matches!(err, RemoteError::Network(_)));
}

// ---------------------------------------------------------------------------
// Raw HTTP contract
// ---------------------------------------------------------------------------

#[tokio::test]
async fn list_pages_are_ordered_and_capped() {
    let server = start(
        (1..=120u32)
            .rev()
            .map(|n| task(u64::from(n), TaskStatus::Todo, f64::from(n)))
            .collect(),
    )
    .await;
    let client = reqwest::Client::new();

    let body: serde_json::Value = client
        .get(format!("{}/api/v1/tasks?status=todo&limit=1000", server.url()))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let items = body["data"]["items"].as_array().unwrap();
    assert_eq!(items.len(), 100);
    assert_eq!(items[0]["id"], 1);
    assert_eq!(body["data"]["next_cursor"], 100);

    let body: serde_json::Value = client
        .get(format!("{}/api/v1/tasks?limit=0", server.url()))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["data"]["items"].as_array().unwrap().len(), 50);

    let all = fetch_all(&server.api(), ListQuery::column(TaskStatus::Todo, None), 33)
        .await
        .unwrap();
    assert_eq!(all.len(), 120);
    assert!(all.windows(2).all(|pair| pair[0].position < pair[1].position));
}

#[tokio::test]
async fn malformed_json_is_bad_json() {
    let server = start(vec![task(1, TaskStatus::Todo, 1000.0)]).await;
    let client = reqwest::Client::new();

    let response = client
        .patch(format!("{}/api/v1/tasks/1", server.url()))
        .header("content-type", "application/json")
        .body("{\"status\":")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 400);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_json");
}

#[tokio::test]
async fn unknown_status_is_validation_and_synonym_is_accepted() {
    let server = start(vec![task(1, TaskStatus::Todo, 1000.0)]).await;
    let client = reqwest::Client::new();
    let url = format!("{}/api/v1/tasks/1", server.url());

    let response = client
        .patch(&url)
        .json(&serde_json::json!({ "status": "archived" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], "validation");

    let response = client
        .patch(&url)
        .json(&serde_json::json!({ "status": " Completed " }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["data"]["status"], "done");
}

#[tokio::test]
async fn get_and_delete_by_id() {
    let server = start(vec![task(7, TaskStatus::Done, 1000.0)]).await;
    let client = reqwest::Client::new();
    let url = format!("{}/api/v1/tasks/7", server.url());

    let response = client.get(&url).send().await.unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["data"]["title"], "T7");

    let response = client.delete(&url).send().await.unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body, serde_json::json!({ "data": { "ok": "true" } }));

    let response = client.get(&url).send().await.unwrap();
    assert_eq!(response.status(), 404);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], "not_found");
}

#[tokio::test]
async fn create_returns_created() {
    let server = start(Vec::new()).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/api/v1/tasks", server.url()))
        .json(&serde_json::json!({ "title": "From curl", "status": "in_progress" }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 201);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["data"]["status"], "in_progress");
    assert!(body["data"]["started_at"].is_string());
}

#[tokio::test]
async fn board_delete_reaches_the_server() {
    let server = start(vec![
        task(1, TaskStatus::Todo, 1000.0),
        task(2, TaskStatus::Todo, 2000.0),
    ])
    .await;
    let api = Arc::new(server.api());
    let (board, _events) =
        BoardManager::new(Arc::clone(&api), Scope::Global, &BoardSettings::default()).unwrap();
    board.load().await.unwrap();

    board.delete(TaskId::new(1)).await.unwrap();

    assert_eq!(ids(&board.column(TaskStatus::Todo)), vec![2]);
    assert!(server.state.store.get(TaskId::new(1)).await.is_none());
    // A second delete of the same id still succeeds.
    api.delete_task(TaskId::new(1)).await.unwrap();
}
