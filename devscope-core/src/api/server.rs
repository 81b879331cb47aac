//! HTTP сервер снимков сессии отладки.

use crate::dna::ErrorFilter;
use crate::monitors::{MonitorState, SampleKind};
use crate::session::{DebugSession, SessionEvent};
use anyhow::{Context, Result};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

/// Состояние API сервера.
#[derive(Clone)]
pub struct ApiState {
    session: Arc<DebugSession>,
}

impl ApiState {
    pub fn new(session: Arc<DebugSession>) -> Self {
        Self { session }
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct SamplesQuery {
    kind: Option<SampleKind>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct NetworkQuery {
    #[serde(default)]
    failed: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GraphQuery {
    path: String,
}

/// Обработчик для endpoint `/health`.
async fn health_handler(State(state): State<ApiState>) -> Json<Value> {
    let monitors: serde_json::Map<String, Value> = state
        .session
        .monitor_states()
        .into_iter()
        .map(|(name, monitor_state)| (name.to_string(), json!(monitor_state)))
        .collect();
    let all_active = state
        .session
        .monitor_states()
        .iter()
        .all(|(_, s)| *s == MonitorState::Active);
    let status = if all_active { "ok" } else { "degraded" };
    Json(json!({
        "status": status,
        "service": "devscope-api",
        "monitors": monitors,
    }))
}

/// Создаёт роутер для API.
pub(crate) fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/stats", get(stats_handler))
        .route("/api/errors", get(errors_handler).delete(clear_errors_handler))
        .route("/api/errors/:id", get(error_handler).delete(delete_error_handler))
        .route("/api/errors/:id/resolve", post(resolve_error_handler))
        .route("/api/errors/:id/analyze", post(analyze_error_handler))
        .route("/api/network", get(network_handler))
        .route("/api/performance", get(performance_handler))
        .route("/api/state", get(state_handler))
        .route("/api/graph", get(graph_handler))
        .route("/api/events", post(ingest_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Обработчик для endpoint `/api/stats`.
async fn stats_handler(State(state): State<ApiState>) -> Result<Json<Value>, StatusCode> {
    Ok(Json(json!({
        "status": "ok",
        "session_stats": state.session.stats(),
    })))
}

/// Обработчик для endpoint `/api/errors`.
///
/// Параметры запроса повторяют поля [`ErrorFilter`]: `kind`, `min_severity`,
/// `resolved`, `file`. Записи отдаются от недавно встреченных к старым.
async fn errors_handler(
    State(state): State<ApiState>,
    Query(filter): Query<ErrorFilter>,
) -> Result<Json<Value>, StatusCode> {
    let errors = state.session.get_errors(Some(&filter));
    Ok(Json(json!({
        "status": "ok",
        "count": errors.len(),
        "errors": errors,
    })))
}

async fn error_handler(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    let record = state.session.get_error(&id).ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(json!({ "status": "ok", "error": record })))
}

async fn resolve_error_handler(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    let record = state
        .session
        .resolve_error(&id)
        .ok_or(StatusCode::NOT_FOUND)?;
    info!("API: error {} resolved", id);
    Ok(Json(json!({ "status": "ok", "error": record })))
}

/// Запускает AI-анализ записи. 502, если анализатор не настроен или упал.
async fn analyze_error_handler(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    if state.session.get_error(&id).is_none() {
        return Err(StatusCode::NOT_FOUND);
    }
    let analysis = state
        .session
        .analyze_error(&id)
        .await
        .ok_or(StatusCode::BAD_GATEWAY)?;
    Ok(Json(json!({ "status": "ok", "analysis": analysis })))
}

async fn delete_error_handler(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> StatusCode {
    if state.session.delete_error(&id) {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn clear_errors_handler(State(state): State<ApiState>) -> StatusCode {
    state.session.clear_errors();
    StatusCode::NO_CONTENT
}

/// Обработчик для endpoint `/api/network`. `?failed=true` оставляет только неудачные.
async fn network_handler(
    State(state): State<ApiState>,
    Query(query): Query<NetworkQuery>,
) -> Result<Json<Value>, StatusCode> {
    let requests = if query.failed {
        state.session.network().get_failed_requests()
    } else {
        state.session.get_requests()
    };
    Ok(Json(json!({
        "status": "ok",
        "count": requests.len(),
        "requests": requests,
    })))
}

/// Обработчик для endpoint `/api/performance`. `?kind=memory` фильтрует по виду.
async fn performance_handler(
    State(state): State<ApiState>,
    Query(query): Query<SamplesQuery>,
) -> Result<Json<Value>, StatusCode> {
    let samples = state.session.get_samples(query.kind);
    Ok(Json(json!({
        "status": "ok",
        "count": samples.len(),
        "first_paint_ms": state.session.performance().first_paint_ms(),
        "samples": samples,
    })))
}

async fn state_handler(State(state): State<ApiState>) -> Result<Json<Value>, StatusCode> {
    let transitions = state.session.get_transitions();
    Ok(Json(json!({
        "status": "ok",
        "count": transitions.len(),
        "transitions": transitions,
    })))
}

/// Граф зависимостей файла: `/api/graph?path=src/App.tsx`.
async fn graph_handler(
    State(state): State<ApiState>,
    Query(query): Query<GraphQuery>,
) -> Result<Json<Value>, StatusCode> {
    let graph = state
        .session
        .engine()
        .graphs()
        .get_dependency_graph(&query.path)
        .await;
    Ok(Json(json!({ "status": "ok", "graph": graph })))
}

/// Принимает событие инструментированного приложения.
///
/// 202, если событие принято; 409, если соответствующий монитор не активен.
async fn ingest_handler(
    State(state): State<ApiState>,
    Json(event): Json<SessionEvent>,
) -> StatusCode {
    if state.session.ingest(event).await {
        StatusCode::ACCEPTED
    } else {
        StatusCode::CONFLICT
    }
}

/// API сервер сессии отладки.
///
/// Сервер запускается в отдельной задаче и останавливается через handle.
///
/// # Примеры использования
///
/// ```no_run
/// use devscope_core::api::ApiServer;
/// use devscope_core::config::Config;
/// use devscope_core::DebugSession;
/// use std::net::SocketAddr;
/// use std::sync::Arc;
///
/// # async fn example() -> anyhow::Result<()> {
/// let config = Config::default();
/// let session = Arc::new(DebugSession::new(&config));
/// session.start(None)?;
///
/// let addr: SocketAddr = "127.0.0.1:7878".parse()?;
/// let handle = ApiServer::new(addr, session).start().await?;
///
/// // ...
///
/// handle.shutdown().await?;
/// # Ok(())
/// # }
/// ```
pub struct ApiServer {
    addr: SocketAddr,
    state: ApiState,
}

impl ApiServer {
    pub fn new(addr: SocketAddr, session: Arc<DebugSession>) -> Self {
        Self {
            addr,
            state: ApiState::new(session),
        }
    }

    /// Запускает API сервер в фоновой задаче.
    ///
    /// # Ошибки
    ///
    /// Возвращает ошибку, если не удалось занять адрес.
    pub async fn start(self) -> Result<ApiServerHandle> {
        let listener = TcpListener::bind(&self.addr)
            .await
            .with_context(|| format!("Failed to bind API server to {}", self.addr))?;
        let local_addr = listener
            .local_addr()
            .context("Failed to read API server local address")?;

        info!("API server listening on http://{}", local_addr);

        let server = axum::serve(listener, create_router(self.state));
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

        tokio::spawn(async move {
            let graceful = server.with_graceful_shutdown(async {
                shutdown_rx.await.ok();
            });

            if let Err(e) = graceful.await {
                error!("API server error: {}", e);
            } else {
                info!("API server stopped");
            }
        });

        Ok(ApiServerHandle {
            local_addr,
            shutdown_tx: Some(shutdown_tx),
        })
    }
}

/// Handle для управления API сервером.
pub struct ApiServerHandle {
    local_addr: SocketAddr,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl ApiServerHandle {
    /// Фактический адрес (при порте 0 - выбранный системой).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Останавливает API сервер.
    ///
    /// # Ошибки
    ///
    /// Возвращает ошибку, если серверная задача уже завершилась.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            tx.send(()).map_err(|_| {
                anyhow::anyhow!("Failed to send shutdown signal to API server (receiver dropped)")
            })?;
        }
        Ok(())
    }
}
