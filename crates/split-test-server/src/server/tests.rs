// crates/split-test-server/src/server/tests.rs
// ============================================================================
// Module: REST Server Unit Tests
// Description: Handler-level tests for routes, bodies, and error mapping.
// Purpose: Validate the REST contract against an in-memory store.
// Dependencies: split-test-server, axum, tokio
// ============================================================================

//! ## Overview
//! Calls route handlers directly with in-memory fixtures and checks status
//! codes and camelCase JSON bodies.

// ============================================================================
// SECTION: Lint Configuration
// ============================================================================

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only handler assertions."
)]

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::Path;
use axum::extract::Query;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use serde_json::Value;
use serde_json::json;
use split_test_core::ErrorKind;
use split_test_core::InMemoryTestStore;
use split_test_core::SharedTestStore;

use super::ListQuery;
use super::ServerState;
use super::handle_assign;
use super::handle_conversion;
use super::handle_create;
use super::handle_delete;
use super::handle_get;
use super::handle_health;
use super::handle_list;
use super::handle_patch;
use super::handle_summary;
use super::handle_view;
use super::status_for;
use crate::audit::NoopAuditSink;
use crate::service::ExperimentService;
use crate::service::ServiceOptions;

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn state_with_limit(max_body_bytes: usize) -> Arc<ServerState> {
    let service = ExperimentService::new(
        SharedTestStore::from_store(InMemoryTestStore::new()),
        ServiceOptions::default(),
        Arc::new(NoopAuditSink),
    );
    Arc::new(ServerState {
        service: Arc::new(service),
        max_body_bytes,
    })
}

fn state() -> Arc<ServerState> {
    state_with_limit(64 * 1024)
}

fn body(value: &Value) -> Result<Bytes, axum::extract::rejection::BytesRejection> {
    Ok(Bytes::from(serde_json::to_vec(value).unwrap()))
}

fn into_response(result: Result<Response, super::ApiError>) -> Response {
    match result {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn read_json(response: Response) -> (StatusCode, Value) {
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

async fn create(state: &Arc<ServerState>, payload: Value) -> (StatusCode, Value) {
    read_json(into_response(handle_create(State(Arc::clone(state)), body(&payload)).await)).await
}

async fn patch(state: &Arc<ServerState>, id: &str, payload: Value) -> (StatusCode, Value) {
    read_json(into_response(
        handle_patch(State(Arc::clone(state)), Path(id.to_string()), body(&payload)).await,
    ))
    .await
}

async fn view(state: &Arc<ServerState>, id: &str, variant: &str) -> (StatusCode, Value) {
    read_json(into_response(
        handle_view(State(Arc::clone(state)), Path(id.to_string()), body(&json!({"variantId": variant})))
            .await,
    ))
    .await
}

async fn convert(state: &Arc<ServerState>, id: &str, payload: Value) -> (StatusCode, Value) {
    read_json(into_response(
        handle_conversion(State(Arc::clone(state)), Path(id.to_string()), body(&payload)).await,
    ))
    .await
}

fn hero_draft() -> Value {
    json!({
        "name": "Hero Test",
        "pageSlug": "home",
        "variants": [
            {"name": "A", "trafficPercentage": 50},
            {"name": "B", "trafficPercentage": 50}
        ]
    })
}

async fn running_hero(state: &Arc<ServerState>) -> String {
    let (status, created) = create(state, hero_draft()).await;
    assert_eq!(status, StatusCode::CREATED);
    let id = created["id"].as_str().unwrap().to_string();
    let (status, _) = patch(state, &id, json!({"status": "running"})).await;
    assert_eq!(status, StatusCode::OK);
    id
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[tokio::test]
async fn create_returns_draft_with_camel_case_fields() {
    let state = state();
    let (status, created) = create(&state, hero_draft()).await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(created["id"].as_str().unwrap().starts_with("exp-"));
    assert_eq!(created["status"], "draft");
    assert_eq!(created["pageSlug"], "home");
    assert_eq!(created["trafficSplit"]["A"], 50);
    assert_eq!(created["variants"][1]["id"], "variant-2");
    assert_eq!(created["variants"][1]["conversionRate"], 0.0);
    assert!(created["startDate"].is_null());
}

#[tokio::test]
async fn create_rejects_split_not_summing_to_hundred() {
    let state = state();
    let (status, error) = create(
        &state,
        json!({
            "name": "Bad",
            "pageSlug": "home",
            "variants": [
                {"name": "A", "trafficPercentage": 60},
                {"name": "B", "trafficPercentage": 30}
            ]
        }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["error"], "ValidationError");
    assert!(error["message"].as_str().unwrap().contains("90"));
}

#[tokio::test]
async fn malformed_json_is_a_validation_error() {
    let state = state();
    let response = into_response(
        handle_create(State(Arc::clone(&state)), Ok(Bytes::from_static(b"{not json"))).await,
    );
    let (status, error) = read_json(response).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["error"], "ValidationError");
}

#[tokio::test]
async fn oversized_body_is_rejected() {
    let state = state_with_limit(32);
    let (status, error) = create(&state, hero_draft()).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(error["error"], "ValidationError");
}

#[tokio::test]
async fn unknown_test_is_not_found() {
    let state = state();
    let response =
        into_response(handle_get(State(Arc::clone(&state)), Path("missing".to_string())).await);
    let (status, error) = read_json(response).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error["error"], "UnknownTestError");

    let (status, error) = view(&state, "missing", "variant-1").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error["error"], "UnknownTestError");
}

#[tokio::test]
async fn hero_test_flow_reports_leader() {
    let state = state();
    let id = running_hero(&state).await;

    for _ in 0 .. 100 {
        assert_eq!(view(&state, &id, "variant-1").await.0, StatusCode::OK);
        assert_eq!(view(&state, &id, "variant-2").await.0, StatusCode::OK);
    }
    for _ in 0 .. 10 {
        let (status, _) = convert(&state, &id, json!({"variantId": "variant-1"})).await;
        assert_eq!(status, StatusCode::OK);
    }
    for _ in 0 .. 5 {
        let (status, _) =
            convert(&state, &id, json!({"variantId": "variant-2", "revenueCents": 499})).await;
        assert_eq!(status, StatusCode::OK);
    }

    let response =
        into_response(handle_summary(State(Arc::clone(&state)), Path(id.clone())).await);
    let (status, summary) = read_json(response).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["totalViews"], 200);
    assert_eq!(summary["leadingVariantId"], "variant-1");
    assert_eq!(summary["variants"][0]["conversionRate"], 10.0);
    assert_eq!(summary["variants"][1]["conversionRate"], 5.0);
    assert_eq!(summary["variants"][1]["revenueCents"], 2_495);
    assert_eq!(summary["significance"]["percent"], 20.0);
    assert_eq!(summary["significance"]["label"], "directional");
}

#[tokio::test]
async fn orphan_conversion_is_a_conflict() {
    let state = state();
    let id = running_hero(&state).await;
    let (status, error) = convert(&state, &id, json!({"variantId": "variant-1"})).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error["error"], "OrphanConversionError");

    let (status, error) = view(&state, &id, "variant-9").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error["error"], "UnknownVariantError");
}

#[tokio::test]
async fn winner_can_only_be_declared_once() {
    let state = state();
    let id = running_hero(&state).await;
    let (status, completed) =
        patch(&state, &id, json!({"status": "completed", "winnerId": "variant-2"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(completed["status"], "completed");
    assert_eq!(completed["winnerId"], "variant-2");
    assert!(completed["endDate"].is_object());

    let (status, error) =
        patch(&state, &id, json!({"status": "completed", "winnerId": "variant-1"})).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error["error"], "InvalidStateError");

    let (status, error) = view(&state, &id, "variant-1").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error["error"], "TestNotRunningError");
}

#[tokio::test]
async fn assignment_is_sticky_and_falls_back_when_paused() {
    let state = state();
    let id = running_hero(&state).await;
    let assign = |visitor: &'static str| {
        let state = Arc::clone(&state);
        let id = id.clone();
        async move {
            read_json(into_response(
                handle_assign(State(state), Path(id), body(&json!({"visitorId": visitor}))).await,
            ))
            .await
        }
    };

    let (status, first) = assign("visitor-42").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["fallback"], false);
    assert!(first.get("reason").is_none());
    let (_, second) = assign("visitor-42").await;
    assert_eq!(first["variantId"], second["variantId"]);

    patch(&state, &id, json!({"status": "paused"})).await;
    let (status, paused) = assign("visitor-42").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(paused["fallback"], true);
    assert_eq!(paused["variantId"], "variant-1");
    assert_eq!(paused["reason"], "TestNotRunningError");
}

#[tokio::test]
async fn delete_is_refused_while_running() {
    let state = state();
    let id = running_hero(&state).await;
    let response =
        into_response(handle_delete(State(Arc::clone(&state)), Path(id.clone())).await);
    let (status, error) = read_json(response).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error["error"], "InvalidStateError");

    patch(&state, &id, json!({"status": "paused"})).await;
    let response =
        into_response(handle_delete(State(Arc::clone(&state)), Path(id.clone())).await);
    assert_eq!(response.status(), StatusCode::OK);
    let response = into_response(handle_get(State(Arc::clone(&state)), Path(id)).await);
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn list_filters_by_page() {
    let state = state();
    create(&state, hero_draft()).await;
    let mut other = hero_draft();
    other["pageSlug"] = json!("pricing");
    create(&state, other).await;

    let all = into_response(
        handle_list(State(Arc::clone(&state)), Ok(Query(ListQuery::default()))).await,
    );
    let (_, all) = read_json(all).await;
    assert_eq!(all.as_array().unwrap().len(), 2);

    let pricing = into_response(
        handle_list(
            State(Arc::clone(&state)),
            Ok(Query(ListQuery {
                page_slug: Some("pricing".to_string()),
            })),
        )
        .await,
    );
    let (_, pricing) = read_json(pricing).await;
    assert_eq!(pricing.as_array().unwrap().len(), 1);
    assert_eq!(pricing[0]["pageSlug"], "pricing");
}

#[tokio::test]
async fn list_rejects_malformed_query_with_error_body() {
    let uri: axum::http::Uri = "/experiments?pageSlug=home&pageSlug=pricing".parse().unwrap();
    let query = Query::<ListQuery>::try_from_uri(&uri);
    assert!(query.is_err());
    let response = into_response(handle_list(State(state()), query).await);
    let (status, error) = read_json(response).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["error"], "ValidationError");
    assert!(error["message"].as_str().unwrap().starts_with("invalid query string"));
}

#[tokio::test]
async fn health_reports_store_ready() {
    let (status, health) = read_json(handle_health(State(state())).await).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "ok");
    assert_eq!(health["store"], "ready");
}

#[test]
fn error_kinds_map_to_documented_statuses() {
    assert_eq!(status_for(ErrorKind::ValidationError), StatusCode::BAD_REQUEST);
    assert_eq!(status_for(ErrorKind::UnknownVariantError), StatusCode::NOT_FOUND);
    assert_eq!(status_for(ErrorKind::ConcurrentModificationError), StatusCode::CONFLICT);
    assert_eq!(status_for(ErrorKind::StoreError), StatusCode::INTERNAL_SERVER_ERROR);
}
