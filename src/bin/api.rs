//! Taskhive 任务接口
//!
//! 启动: cargo run --bin taskhive-api --features web
//! - GET  /tasks                 任务列表（含 error）
//! - POST /tasks/:id/approve     审批通过
//! - POST /tasks/:id/cancel      取消任务
//! - POST /runs                  后台启动一次编排
//! - GET  /graph-events          SSE 实时事件流

#![cfg(feature = "web")]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use futures_util::stream::{self, Stream};
use serde::Deserialize;
use serde_json::{json, Value};

use taskhive::config::load_or_default;
use taskhive::core::{Task, TaskStatus};
use taskhive::hitl::Decision;
use taskhive::{observability, AgentBuilder, AgentError, Orchestrator};

type ApiError = (StatusCode, String);

fn internal(e: AgentError) -> ApiError {
    tracing::warn!("api error: {}", e);
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

fn not_found() -> ApiError {
    (StatusCode::NOT_FOUND, "Task not found".to_string())
}

fn find_task(orchestrator: &Orchestrator, task_id: &str) -> Result<Task, ApiError> {
    orchestrator
        .store()
        .get(task_id)
        .map_err(internal)?
        .ok_or_else(not_found)
}

/// GET /tasks
async fn list_tasks(State(orchestrator): State<Arc<Orchestrator>>) -> Result<Json<Vec<Task>>, ApiError> {
    orchestrator.store().list().map(Json).map_err(internal)
}

/// POST /tasks/:id/approve：有 HITL 快照时记录决定并在后台恢复运行
async fn approve_task(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(task_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let mut task = find_task(&orchestrator, &task_id)?;

    let decided = orchestrator
        .hitl()
        .decide_task(&task_id, Decision::Approved)
        .await
        .map_err(internal)?;
    if let Some(decided) = decided {
        let runner = Arc::clone(&orchestrator);
        tokio::spawn(async move {
            if let Err(e) = runner.conclude(decided).await {
                tracing::warn!("resume after approval failed: {}", e);
            }
        });
        return Ok(Json(json!({ "status": "ok" })));
    }

    task.approved = true;
    task.set_status(TaskStatus::InProgress)
        .map_err(|e| (StatusCode::CONFLICT, e.to_string()))?;
    orchestrator.store().update(&task).await.map_err(internal)?;
    Ok(Json(json!({ "status": "ok" })))
}

/// POST /tasks/:id/cancel：任意非终态都可取消，同时丢弃待审批快照
async fn cancel_task(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(task_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let mut task = find_task(&orchestrator, &task_id)?;
    task.set_status(TaskStatus::Cancelled)
        .map_err(|e| (StatusCode::CONFLICT, e.to_string()))?;
    orchestrator.store().update(&task).await.map_err(internal)?;
    orchestrator.hitl().discard(&task_id).map_err(internal)?;
    tracing::info!(task_id = %task_id, "task cancelled via api");
    Ok(Json(json!({ "status": "ok" })))
}

#[derive(Deserialize)]
struct RunRequest {
    prompt: String,
}

/// POST /runs
async fn start_run(
    State(orchestrator): State<Arc<Orchestrator>>,
    Json(req): Json<RunRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let prompt = req.prompt.trim().to_string();
    if prompt.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "prompt is empty".to_string()));
    }
    tokio::spawn(async move {
        if let Err(e) = orchestrator.run(&prompt).await {
            tracing::warn!("run failed: {}", e);
        }
    });
    Ok((StatusCode::ACCEPTED, Json(json!({ "status": "accepted" }))))
}

/// GET /graph-events：客户端断开时 Subscription 随流一起 drop，自动注销
async fn graph_events(
    State(orchestrator): State<Arc<Orchestrator>>,
) -> Sse<impl Stream<Item = Result<SseEvent, std::convert::Infallible>>> {
    let subscription = orchestrator.broker().subscribe();
    let events = stream::unfold(subscription, |mut sub| async move {
        let event = sub.recv().await?;
        let frame = SseEvent::default()
            .json_data(&event)
            .unwrap_or_else(|_| SseEvent::default().comment("unserialisable event"));
        Some((Ok(frame), sub))
    });
    Sse::new(events).keep_alive(
        KeepAlive::new()
            .interval(std::time::Duration::from_secs(15))
            .text("keepalive"),
    )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();
    let config_path = std::env::var("TASKHIVE_CONFIG").ok().map(PathBuf::from);
    let config = load_or_default(config_path);
    let orchestrator = Arc::new(
        AgentBuilder::new(config)
            .build()
            .context("Failed to build agent")?,
    );

    let app = Router::new()
        .route("/tasks", get(list_tasks))
        .route("/tasks/:id/approve", post(approve_task))
        .route("/tasks/:id/cancel", post(cancel_task))
        .route("/runs", post(start_run))
        .route("/graph-events", get(graph_events))
        .with_state(orchestrator);

    let port = std::env::var("TASKHIVE_API_PORT")
        .ok()
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(8080);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Taskhive API: http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
