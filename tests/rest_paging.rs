//! RestStore against a live HTTP server.

#![cfg(feature = "http")]

mod support;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use dao_chain::query::{eq, Order};
use dao_chain::rest::{RestStore, ReqwestTransport};
use dao_chain::{Key, SelectOptions, Store, StoreExt};
use serde_json::{json, Value};
use support::{init_tracing, task, tasks, Task};

#[derive(Default)]
struct Backend {
    tasks: Mutex<Vec<Task>>,
    pages: AtomicUsize,
    queries: Mutex<Vec<HashMap<String, String>>>,
}

type Shared = Arc<Backend>;

async fn list(
    State(backend): State<Shared>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<Value> {
    backend.pages.fetch_add(1, Ordering::SeqCst);
    let start: usize = params.get("startIndex").and_then(|s| s.parse().ok()).unwrap_or(0);
    let max: usize = params.get("maxResults").and_then(|s| s.parse().ok()).unwrap_or(100);
    backend.queries.lock().unwrap().push(params);

    let tasks = backend.tasks.lock().unwrap();
    let items: Vec<&Task> = tasks.iter().skip(start).take(max).collect();
    Json(json!({ "items": items, "totalResults": tasks.len() }))
}

async fn create(State(backend): State<Shared>, Json(record): Json<Task>) -> Json<Task> {
    let mut tasks = backend.tasks.lock().unwrap();
    tasks.retain(|t| t.id != record.id);
    tasks.push(record.clone());
    Json(record)
}

async fn fetch(
    State(backend): State<Shared>,
    Path(id): Path<i64>,
) -> Result<Json<Task>, StatusCode> {
    let tasks = backend.tasks.lock().unwrap();
    tasks
        .iter()
        .find(|t| t.id == id)
        .cloned()
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn delete(State(backend): State<Shared>, Path(id): Path<i64>) -> StatusCode {
    let mut tasks = backend.tasks.lock().unwrap();
    let before = tasks.len();
    tasks.retain(|t| t.id != id);
    if tasks.len() < before {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

/// Bind to port 0 and return the collection URL.
async fn start_server(backend: Shared) -> String {
    let app = Router::new()
        .route("/tasks", get(list).post(create))
        .route("/tasks/:id", get(fetch).delete(delete))
        .with_state(backend);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/tasks")
}

fn backend_with(n: i64) -> Shared {
    let backend = Backend::default();
    *backend.tasks.lock().unwrap() = tasks(n);
    Arc::new(backend)
}

#[tokio::test]
async fn select_pages_through_the_collection() {
    init_tracing();
    let backend = backend_with(450);
    let url = start_server(backend.clone()).await;
    let store = RestStore::<Task, _>::new(ReqwestTransport::new(), url);

    let all = store.select_all().await.unwrap();
    assert_eq!(all.len(), 450);
    assert_eq!(all[449], task(450));
    assert_eq!(backend.pages.load(Ordering::SeqCst), 3);

    let starts: Vec<String> = backend
        .queries
        .lock()
        .unwrap()
        .iter()
        .map(|q| q["startIndex"].clone())
        .collect();
    assert_eq!(starts, ["0", "200", "400"]);
}

#[tokio::test]
async fn query_and_order_travel_as_parameters() {
    init_tracing();
    let backend = backend_with(30);
    let url = start_server(backend.clone()).await;
    let store = RestStore::<Task, _>::new(ReqwestTransport::new(), url).with_batch_size(10);

    let alpha = store
        .select_vec(
            &SelectOptions::new()
                .with_query(eq("project", "alpha"))
                .with_order(Order::asc("id"))
                .with_limit(5),
        )
        .await
        .unwrap();
    let ids: Vec<i64> = alpha.iter().map(|t| t.id).collect();
    assert_eq!(ids, vec![2, 4, 6, 8, 10]);

    let queries = backend.queries.lock().unwrap();
    assert!(queries[0].contains_key("q"));
    assert!(queries[0].contains_key("sort"));
    assert_eq!(queries[0]["maxResults"], "5");
}

#[tokio::test]
async fn writes_round_trip_over_http() {
    init_tracing();
    let backend = backend_with(3);
    let url = start_server(backend.clone()).await;
    let store = RestStore::<Task, _>::new(ReqwestTransport::new(), url);

    let mut renamed = task(2);
    renamed.title = "renamed".into();
    assert_eq!(store.put(renamed.clone()).await.unwrap(), renamed);
    assert_eq!(store.find(&Key::from(2)).await.unwrap(), renamed);

    assert_eq!(store.remove(&Key::from(1)).await.unwrap(), task(1));
    assert!(store.find(&Key::from(1)).await.unwrap_err().is_not_found());
    assert!(store.remove(&Key::from(1)).await.unwrap_err().is_not_found());
    assert_eq!(backend.tasks.lock().unwrap().len(), 2);
}
