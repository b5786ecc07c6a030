//! HTTP API: analysis submission, task polling/streaming, history,
//! the chat agent, strategy listing, session CRUD, and vision ticker
//! extraction. Mounted under `/api/v1`; admin auth gates everything except
//! `/health` and the `/auth/*` routes themselves.

use crate::agent::strategy::Strategy;
use crate::agent::{AgentExecutor, AgentProgress};
use crate::auth::middleware::AuthMiddlewareState;
use crate::auth::AuthState;
use crate::error::AppError;
use crate::llm::{ChatMessage, ChatRequest, LlmRouter};
use crate::models::{AnalysisReport, ConversationTurn, NewsItem, Task, Ticker};
use crate::persistence::Store;
use crate::pipeline::Pipeline;
use crate::queue::{TaskEventKind, TaskQueue};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use futures_util::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::{broadcast::error::RecvError, mpsc};

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub queue: Arc<TaskQueue>,
    pub store: Arc<Store>,
    pub llm: Arc<LlmRouter>,
    pub agent: Option<Arc<AgentExecutor>>,
    pub strategies: Arc<HashMap<String, Strategy>>,
    pub notify_channel: Option<String>,
}

/// Assemble the full router: public `/health`, protected analysis/history/
/// agent routes behind admin auth, and the auth routes themselves.
pub fn build_router(state: AppState, auth_state: AuthState, auth_mw: Arc<AuthMiddlewareState>) -> Router {
    let protected = Router::new()
        .route("/analysis/analyze", post(analyze))
        .route("/analysis/status/:task_id", get(get_status))
        .route("/analysis/tasks", get(list_tasks))
        .route("/analysis/tasks/stream", get(stream_tasks))
        .route("/history", get(list_history))
        .route("/history/:record_id", get(get_history_record))
        .route("/history/:record_id/news", get(get_history_news))
        .route("/agent/chat/stream", post(agent_chat_stream))
        .route("/agent/strategies", get(list_strategies))
        .route("/agent/chat/sessions", post(create_session))
        .route("/agent/chat/sessions/:session_id", get(get_session).delete(delete_session))
        .route("/stocks/extract-from-image", post(extract_from_image))
        .route_layer(axum::middleware::from_fn_with_state(auth_mw, crate::auth::auth_middleware))
        .with_state(state);

    let auth_routes = Router::new()
        .route("/auth/status", get(crate::auth::api::status))
        .route("/auth/login", post(crate::auth::api::login))
        .route("/auth/logout", post(crate::auth::api::logout))
        .route("/auth/change-password", post(crate::auth::api::change_password))
        .with_state(auth_state);

    Router::new().route("/health", get(health)).nest("/api/v1", protected.merge(auth_routes))
}

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

#[derive(Debug, Deserialize)]
struct AnalyzeRequest {
    ticker: String,
    #[serde(default)]
    report_type: Option<String>,
    #[serde(default, rename = "async")]
    is_async: bool,
}

/// POST /analysis/analyze.
async fn analyze(State(state): State<AppState>, Json(payload): Json<AnalyzeRequest>) -> Result<Response, AppError> {
    let ticker = Ticker::canonical(&payload.ticker);
    let report_type = payload.report_type.unwrap_or_else(|| "standard".to_string());
    let task = state.queue.enqueue(ticker.as_str(), &report_type)?;

    if payload.is_async {
        let pipeline = state.pipeline.clone();
        let queue = state.queue.clone();
        let notify_channel = state.notify_channel.clone();
        let task_id = task.task_id.clone();
        tokio::spawn(async move {
            queue.mark_started(&task_id);
            let _permit = queue.acquire_slot().await;
            let result = pipeline
                .run_for_ticker(&ticker, &report_type, Some((&queue, &task_id)), notify_channel.as_deref(), false)
                .await;
            if let Err(e) = result {
                queue.mark_failed(&task_id, e.to_string());
            }
        });
        return Ok((StatusCode::ACCEPTED, Json(task)).into_response());
    }

    state.queue.mark_started(&task.task_id);
    let _permit = state.queue.acquire_slot().await;
    let result = state
        .pipeline
        .run_for_ticker(&ticker, &report_type, Some((&state.queue, &task.task_id)), state.notify_channel.as_deref(), false)
        .await;
    match result {
        Ok(report) => Ok((StatusCode::OK, Json(report)).into_response()),
        Err(e) => {
            state.queue.mark_failed(&task.task_id, e.to_string());
            Err(e)
        }
    }
}

async fn get_status(State(state): State<AppState>, Path(task_id): Path<String>) -> Result<Json<Task>, AppError> {
    state.queue.get(&task_id).map(Json).ok_or(AppError::NotFound)
}

#[derive(Debug, Deserialize)]
struct TaskListQuery {
    status: Option<String>,
}

async fn list_tasks(State(state): State<AppState>, Query(q): Query<TaskListQuery>) -> Json<Vec<Task>> {
    let mut tasks = state.queue.list();
    if let Some(filter) = q.status {
        tasks.retain(|t| format!("{:?}", t.status).eq_ignore_ascii_case(&filter));
    }
    Json(tasks)
}

/// GET /analysis/tasks/stream: SSE of task lifecycle events.
async fn stream_tasks(State(state): State<AppState>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let connected = stream::once(async { Ok(Event::default().event("connected").data("{}")) });
    let rx = state.queue.subscribe();
    let events = stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => return Some((Some(event), rx)),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => return None,
            }
        }
    })
    .filter_map(|opt| async move { opt })
    .map(|event| {
        let kind = match event.kind {
            TaskEventKind::Created => "task_created",
            TaskEventKind::Started => "task_started",
            TaskEventKind::Heartbeat => "heartbeat",
            TaskEventKind::Completed => "task_completed",
            TaskEventKind::Failed => "task_failed",
        };
        let data = serde_json::to_string(&event).unwrap_or_default();
        Ok(Event::default().event(kind).data(data))
    });
    Sse::new(connected.chain(events)).keep_alive(KeepAlive::default())
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    ticker: String,
    #[serde(default = "default_history_limit")]
    limit: u32,
    #[serde(default)]
    since: Option<DateTime<Utc>>,
    #[serde(default)]
    until: Option<DateTime<Utc>>,
}

fn default_history_limit() -> u32 {
    20
}

async fn list_history(State(state): State<AppState>, Query(q): Query<HistoryQuery>) -> Result<Json<Vec<AnalysisReport>>, AppError> {
    let records = state.store.list_reports(&q.ticker, q.limit.max(1))?;
    let reports: Vec<AnalysisReport> = records
        .into_iter()
        .map(|r| r.report)
        .filter(|r| q.since.is_none_or(|s| r.meta.created_at >= s))
        .filter(|r| q.until.is_none_or(|u| r.meta.created_at <= u))
        .collect();
    Ok(Json(reports))
}

async fn get_history_record(State(state): State<AppState>, Path(record_id): Path<i64>) -> Result<Json<AnalysisReport>, AppError> {
    Ok(Json(state.store.get_report(record_id)?.report))
}

async fn get_history_news(State(state): State<AppState>, Path(record_id): Path<i64>) -> Result<Json<Vec<NewsItem>>, AppError> {
    state.store.get_report(record_id)?;
    Ok(Json(state.store.get_news_for_report(record_id)?))
}

async fn list_strategies(State(state): State<AppState>) -> Json<Vec<Strategy>> {
    Json(state.strategies.values().cloned().collect())
}

async fn create_session() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "session_id": uuid::Uuid::new_v4().to_string() }))
}

async fn get_session(State(state): State<AppState>, Path(session_id): Path<String>) -> Result<Json<Vec<ConversationTurn>>, AppError> {
    let turns = state.store.list_conversation(&session_id)?;
    if turns.is_empty() {
        return Err(AppError::NotFound);
    }
    Ok(Json(turns))
}

async fn delete_session(State(state): State<AppState>, Path(session_id): Path<String>) -> Result<StatusCode, AppError> {
    state.store.delete_session(&session_id)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct AgentChatRequest {
    session_id: String,
    message: String,
}

/// POST /agent/chat/stream: SSE multi-turn agent chat with tool-call events.
async fn agent_chat_stream(
    State(state): State<AppState>,
    Json(payload): Json<AgentChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let agent = state.agent.clone().ok_or_else(|| AppError::BadRequest("agent mode is disabled".into()))?;
    let (tx, rx) = mpsc::unbounded_channel::<(&'static str, serde_json::Value)>();

    let session_id = payload.session_id;
    let message = payload.message;
    tokio::spawn(async move {
        let _ = tx.send(("thinking", serde_json::json!({})));
        let tx_progress = tx.clone();
        let result = agent
            .run_chat(&session_id, &message, move |progress| {
                let item = match progress {
                    AgentProgress::ToolCall { name } => ("tool_start", serde_json::json!({ "tool": name })),
                    AgentProgress::ToolResult { name, ok } => ("tool_done", serde_json::json!({ "tool": name, "ok": ok })),
                    AgentProgress::Final { content } => ("generating", serde_json::json!({ "content": content })),
                };
                let _ = tx_progress.send(item);
            })
            .await;
        match result {
            Ok(content) => {
                let _ = tx.send(("done", serde_json::json!({ "content": content })));
            }
            Err(e) => {
                let _ = tx.send(("error", serde_json::json!({ "message": e.to_string() })));
            }
        }
    });

    let stream = stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) })
        .map(|(event, data)| Ok(Event::default().event(event).data(data.to_string())));
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// Images beyond this base64 payload size are rejected before a vision call
/// is attempted.
const MAX_IMAGE_BASE64_BYTES: usize = 6_000_000;

#[derive(Debug, Deserialize)]
struct ExtractImageRequest {
    image_base64: String,
}

#[derive(Debug, Serialize)]
struct ExtractImageResponse {
    tickers: Vec<String>,
}

async fn extract_from_image(State(state): State<AppState>, Json(payload): Json<ExtractImageRequest>) -> Result<Json<ExtractImageResponse>, ImageApiError> {
    if payload.image_base64.len() > MAX_IMAGE_BASE64_BYTES {
        return Err(ImageApiError::TooLarge);
    }
    let request = ChatRequest {
        messages: vec![ChatMessage {
            role: "user".into(),
            content: "List every stock ticker symbol visible in the attached image as a JSON array of strings, nothing else.".into(),
        }],
        tools: vec![],
        image_urls: vec![format!("data:image/jpeg;base64,{}", payload.image_base64)],
    };
    let response = state.llm.complete(&request).await.map_err(|_| ImageApiError::VisionFailed)?;
    let tickers: Vec<String> = serde_json::from_str(response.content.trim()).unwrap_or_default();
    Ok(Json(ExtractImageResponse { tickers }))
}

#[derive(Debug)]
enum ImageApiError {
    TooLarge,
    VisionFailed,
}

impl IntoResponse for ImageApiError {
    fn into_response(self) -> Response {
        match self {
            ImageApiError::TooLarge => (StatusCode::PAYLOAD_TOO_LARGE, "image payload too large").into_response(),
            ImageApiError::VisionFailed => (StatusCode::BAD_GATEWAY, "vision extraction failed").into_response(),
        }
    }
}
