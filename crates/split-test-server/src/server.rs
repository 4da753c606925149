// crates/split-test-server/src/server.rs
// ============================================================================
// Module: REST Server
// Description: Axum routes and JSON error mapping for the experiment service.
// Purpose: Expose experiment lifecycle, allocation, and metrics over HTTP.
// Dependencies: split-test-core, split-test-config, axum, tokio
// ============================================================================

//! ## Overview
//! Every route parses a bounded JSON body, runs the blocking service call on
//! the tokio blocking pool, and answers with camelCase JSON. Failures map to
//! `{error, message}` with a stable [`ErrorKind`] label. Request bodies are
//! untrusted and limited to `server.max_body_bytes`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path as FsPath;
use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::DefaultBodyLimit;
use axum::extract::Path;
use axum::extract::Query;
use axum::extract::State;
use axum::extract::rejection::BytesRejection;
use axum::extract::rejection::QueryRejection;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use axum::routing::post;
use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;
use split_test_config::AuditConfig;
use split_test_config::AuditSinkKind;
use split_test_config::SplitTestConfig;
use split_test_config::StoreConfig;
use split_test_config::StoreType;
use split_test_core::ErrorKind;
use split_test_core::ExperimentError;
use split_test_core::InMemoryTestStore;
use split_test_core::PageSlug;
use split_test_core::SharedTestStore;
use split_test_core::TestDraft;
use split_test_core::TestId;
use split_test_core::TransitionRequest;
use split_test_core::VariantCounters;
use split_test_core::VariantId;
use split_test_core::VisitorId;
use split_test_core::conversion_rate;
use split_test_store_sqlite::SqliteTestStore;

use crate::audit::AuditOutcome;
use crate::audit::ExperimentAuditEvent;
use crate::audit::ExperimentAuditEventParams;
use crate::audit::ExperimentAuditSink;
use crate::audit::FileAuditSink;
use crate::audit::NoopAuditSink;
use crate::audit::StderrAuditSink;
use crate::service::ExperimentService;
use crate::service::ServiceOptions;

// ============================================================================
// SECTION: Server
// ============================================================================

/// Split Test REST server.
pub struct SplitTestServer {
    /// Validated configuration.
    config: SplitTestConfig,
    /// Shared experiment service.
    service: Arc<ExperimentService>,
}

impl SplitTestServer {
    /// Builds a server from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError`] when the config is invalid or the store or
    /// audit sink cannot be opened.
    pub fn from_config(config: SplitTestConfig) -> Result<Self, ServerError> {
        config.validate().map_err(|err| ServerError::Config(err.to_string()))?;
        let store = build_test_store(&config.store)?;
        let audit = build_audit_sink(&config.audit)?;
        let options = ServiceOptions {
            significance: config.experiments.significance_policy(),
            auto_winner: config.experiments.auto_winner.rule(),
            config_cache_entries: config.experiments.config_cache_entries,
        };
        let service = Arc::new(ExperimentService::new(store, options, audit));
        Ok(Self {
            config,
            service,
        })
    }

    /// Returns the shared experiment service.
    #[must_use]
    pub fn service(&self) -> Arc<ExperimentService> {
        Arc::clone(&self.service)
    }

    /// Serves HTTP requests until the listener fails.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError`] when binding or serving fails.
    pub async fn serve(self) -> Result<(), ServerError> {
        let addr =
            self.config.server.bind_addr().map_err(|err| ServerError::Config(err.to_string()))?;
        let app = build_router(Arc::clone(&self.service), self.config.server.max_body_bytes);
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|err| ServerError::Transport(format!("http bind failed: {err}")))?;
        self.service.audit().record(&ExperimentAuditEvent::new(ExperimentAuditEventParams {
            event: "server_started",
            test_id: None,
            variant_id: None,
            status: None,
            outcome: AuditOutcome::Applied,
            error_kind: None,
            message: Some(format!("listening on {addr}")),
        }));
        axum::serve(listener, app)
            .await
            .map_err(|_| ServerError::Transport("http server failed".to_string()))
    }
}

/// Builds the test store selected by configuration.
///
/// # Errors
///
/// Returns [`ServerError`] when the `SQLite` store cannot be opened.
pub fn build_test_store(config: &StoreConfig) -> Result<SharedTestStore, ServerError> {
    match config.store_type {
        StoreType::Memory => Ok(SharedTestStore::from_store(InMemoryTestStore::new())),
        StoreType::Sqlite => {
            let sqlite = config
                .sqlite_config()
                .ok_or_else(|| ServerError::Config("sqlite store requires path".to_string()))?;
            let store =
                SqliteTestStore::new(&sqlite).map_err(|err| ServerError::Init(err.to_string()))?;
            Ok(SharedTestStore::from_store(store))
        }
    }
}

/// Builds the audit sink selected by configuration.
///
/// # Errors
///
/// Returns [`ServerError`] when the audit file cannot be opened.
pub fn build_audit_sink(config: &AuditConfig) -> Result<Arc<dyn ExperimentAuditSink>, ServerError> {
    match config.sink {
        AuditSinkKind::Stderr => Ok(Arc::new(StderrAuditSink)),
        AuditSinkKind::None => Ok(Arc::new(NoopAuditSink)),
        AuditSinkKind::File => {
            let path = config
                .path
                .as_deref()
                .ok_or_else(|| ServerError::Config("audit.sink=file requires path".to_string()))?;
            open_file_sink(path)
        }
    }
}

/// Opens a file audit sink.
fn open_file_sink(path: &FsPath) -> Result<Arc<dyn ExperimentAuditSink>, ServerError> {
    let sink = FileAuditSink::new(path)
        .map_err(|err| ServerError::Init(format!("audit log open failed: {err}")))?;
    Ok(Arc::new(sink))
}

// ============================================================================
// SECTION: Router
// ============================================================================

/// Shared state for route handlers.
struct ServerState {
    /// Experiment service.
    service: Arc<ExperimentService>,
    /// Maximum allowed request body size.
    max_body_bytes: usize,
}

/// Builds the REST router over `service`.
#[must_use]
pub fn build_router(service: Arc<ExperimentService>, max_body_bytes: usize) -> Router {
    let state = Arc::new(ServerState {
        service,
        max_body_bytes,
    });
    Router::new()
        .route("/health", get(handle_health))
        .route("/experiments", get(handle_list).post(handle_create))
        .route("/experiments/{id}", get(handle_get).patch(handle_patch).delete(handle_delete))
        .route("/experiments/{id}/assignments", post(handle_assign))
        .route("/experiments/{id}/views", post(handle_view))
        .route("/experiments/{id}/conversions", post(handle_conversion))
        .route("/experiments/{id}/summary", get(handle_summary))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(state)
}

// ============================================================================
// SECTION: Payloads
// ============================================================================

/// Query string for `GET /experiments`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListQuery {
    /// Optional page filter.
    page_slug: Option<String>,
}

/// Body of `POST /experiments/{id}/assignments`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssignmentRequest {
    /// Visitor to allocate.
    visitor_id: VisitorId,
}

/// Body of `POST /experiments/{id}/views`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ViewRequest {
    /// Variant that was rendered.
    variant_id: VariantId,
}

/// Body of `POST /experiments/{id}/conversions`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConversionRequest {
    /// Variant that converted.
    variant_id: VariantId,
    /// Optional revenue in minor units.
    #[serde(default)]
    revenue_cents: Option<u64>,
}

/// Counter snapshot returned after a view or conversion.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CounterResponse {
    /// Test identifier.
    test_id: TestId,
    /// Variant identifier.
    variant_id: VariantId,
    /// Views after the update.
    views: u64,
    /// Conversions after the update.
    conversions: u64,
    /// Conversion rate in percent.
    conversion_rate: f64,
    /// Revenue in minor units, when any was reported.
    #[serde(skip_serializing_if = "Option::is_none")]
    revenue_cents: Option<u64>,
}

impl CounterResponse {
    /// Builds a response from store counters.
    fn new(test_id: TestId, counters: VariantCounters) -> Self {
        Self {
            test_id,
            conversion_rate: conversion_rate(counters.views, counters.conversions),
            variant_id: counters.variant_id,
            views: counters.views,
            conversions: counters.conversions,
            revenue_cents: counters.revenue_cents,
        }
    }
}

/// Health probe response.
#[derive(Debug, Serialize)]
struct HealthResponse {
    /// Overall status label.
    status: &'static str,
    /// Store readiness label.
    store: &'static str,
    /// Failure detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

// ============================================================================
// SECTION: Handlers
// ============================================================================

/// Handles `GET /health`.
async fn handle_health(State(state): State<Arc<ServerState>>) -> Response {
    let service = Arc::clone(&state.service);
    let readiness = tokio::task::spawn_blocking(move || service.readiness()).await;
    match readiness {
        Ok(Ok(())) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok",
                store: "ready",
                message: None,
            }),
        )
            .into_response(),
        Ok(Err(err)) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "degraded",
                store: "unavailable",
                message: Some(err.to_string()),
            }),
        )
            .into_response(),
        Err(_) => ApiError::internal("readiness check failed").into_response(),
    }
}

/// Handles `GET /experiments`.
async fn handle_list(
    State(state): State<Arc<ServerState>>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(query) = query.map_err(|rejection| {
        ApiError::validation(format!("invalid query string: {}", rejection.body_text()))
    })?;
    let page_slug = query.page_slug.map(PageSlug::new);
    let tests =
        run_blocking(&state, move |service| service.list_tests(page_slug.as_ref())).await?;
    Ok(Json(tests).into_response())
}

/// Handles `POST /experiments`.
async fn handle_create(
    State(state): State<Arc<ServerState>>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Response, ApiError> {
    let draft: TestDraft = parse_body(&state, body)?;
    let test = run_blocking(&state, move |service| service.create_test(&draft)).await?;
    Ok((StatusCode::CREATED, Json(test)).into_response())
}

/// Handles `GET /experiments/{id}`.
async fn handle_get(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let test_id = TestId::new(id);
    let test = run_blocking(&state, move |service| service.get_test(&test_id)).await?;
    Ok(Json(test).into_response())
}

/// Handles `PATCH /experiments/{id}`.
async fn handle_patch(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Response, ApiError> {
    let request: TransitionRequest = parse_body(&state, body)?;
    let test_id = TestId::new(id);
    let test = run_blocking(&state, move |service| service.transition(&test_id, &request)).await?;
    Ok(Json(test).into_response())
}

/// Handles `DELETE /experiments/{id}`.
async fn handle_delete(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let test_id = TestId::new(id);
    let deleted = run_blocking(&state, move |service| service.delete_test(&test_id)).await?;
    Ok(Json(deleted).into_response())
}

/// Handles `POST /experiments/{id}/assignments`.
async fn handle_assign(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Response, ApiError> {
    let request: AssignmentRequest = parse_body(&state, body)?;
    let test_id = TestId::new(id);
    let assignment =
        run_blocking(&state, move |service| service.assign(&test_id, &request.visitor_id))
            .await?;
    Ok(Json(assignment).into_response())
}

/// Handles `POST /experiments/{id}/views`.
async fn handle_view(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Response, ApiError> {
    let request: ViewRequest = parse_body(&state, body)?;
    let test_id = TestId::new(id);
    let response = run_blocking(&state, move |service| {
        let counters = service.record_view(&test_id, &request.variant_id)?;
        Ok(CounterResponse::new(test_id, counters))
    })
    .await?;
    Ok(Json(response).into_response())
}

/// Handles `POST /experiments/{id}/conversions`.
async fn handle_conversion(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Response, ApiError> {
    let request: ConversionRequest = parse_body(&state, body)?;
    let test_id = TestId::new(id);
    let response = run_blocking(&state, move |service| {
        let counters =
            service.record_conversion(&test_id, &request.variant_id, request.revenue_cents)?;
        Ok(CounterResponse::new(test_id, counters))
    })
    .await?;
    Ok(Json(response).into_response())
}

/// Handles `GET /experiments/{id}/summary`.
async fn handle_summary(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let test_id = TestId::new(id);
    let summary = run_blocking(&state, move |service| service.summary(&test_id)).await?;
    Ok(Json(summary).into_response())
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Parses a bounded JSON request body.
fn parse_body<T: DeserializeOwned>(
    state: &ServerState,
    body: Result<Bytes, BytesRejection>,
) -> Result<T, ApiError> {
    let bytes = body.map_err(|rejection| {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::payload_too_large(state.max_body_bytes)
        } else {
            ApiError::validation(rejection.body_text())
        }
    })?;
    if bytes.len() > state.max_body_bytes {
        return Err(ApiError::payload_too_large(state.max_body_bytes));
    }
    serde_json::from_slice(&bytes)
        .map_err(|err| ApiError::validation(format!("invalid request body: {err}")))
}

/// Runs a blocking service call on the blocking pool.
async fn run_blocking<T, F>(state: &ServerState, call: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&ExperimentService) -> Result<T, ExperimentError> + Send + 'static,
{
    let service = Arc::clone(&state.service);
    tokio::task::spawn_blocking(move || call(&service))
        .await
        .map_err(|_| ApiError::internal("blocking task failed"))?
        .map_err(ApiError::from)
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// JSON error body.
#[derive(Debug, Serialize)]
struct ErrorBody {
    /// Stable error kind label.
    error: ErrorKind,
    /// Human-readable message.
    message: String,
}

/// HTTP-facing error carrying a status and an [`ErrorKind`].
#[derive(Debug)]
pub struct ApiError {
    /// HTTP status.
    status: StatusCode,
    /// Stable error kind.
    kind: ErrorKind,
    /// Human-readable message.
    message: String,
}

impl ApiError {
    /// Returns the HTTP status.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Malformed request.
    fn validation(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            kind: ErrorKind::ValidationError,
            message: message.into(),
        }
    }

    /// Body above the configured limit.
    fn payload_too_large(max_body_bytes: usize) -> Self {
        Self {
            status: StatusCode::PAYLOAD_TOO_LARGE,
            kind: ErrorKind::ValidationError,
            message: format!("request body exceeds {max_body_bytes} bytes"),
        }
    }

    /// Server-side failure outside the store.
    fn internal(message: &str) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            kind: ErrorKind::StoreError,
            message: message.to_string(),
        }
    }
}

/// Returns the HTTP status for an error kind.
#[must_use]
pub const fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::ValidationError => StatusCode::BAD_REQUEST,
        ErrorKind::UnknownTestError | ErrorKind::UnknownVariantError => StatusCode::NOT_FOUND,
        ErrorKind::InvalidStateError
        | ErrorKind::OrphanConversionError
        | ErrorKind::ConcurrentModificationError
        | ErrorKind::TestNotRunningError => StatusCode::CONFLICT,
        ErrorKind::StoreError => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<ExperimentError> for ApiError {
    fn from(error: ExperimentError) -> Self {
        let kind = error.kind();
        Self {
            status: status_for(kind),
            kind,
            message: error.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorBody {
                error: self.kind,
                message: self.message,
            }),
        )
            .into_response()
    }
}

/// Server errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Configuration errors.
    #[error("config error: {0}")]
    Config(String),
    /// Initialization errors.
    #[error("init error: {0}")]
    Init(String),
    /// Transport errors.
    #[error("transport error: {0}")]
    Transport(String),
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests;
