//! HTTP/JSON surface over the rate engine

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Json},
    routing::{get, post, put},
    Router,
};
use chrono::{DateTime, Utc};
use prometheus::{Encoder, Registry, TextEncoder};
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use tarifa_common::{CardId, NewRateCard, ProfitRule, RateEntry};
use tarifa_engine::{CardSettingsUpdate, RateEngine};

use crate::error::{ApiError, ApiResult};
use crate::scheduler::SchedulerStatus;
use crate::SERVICE_VERSION;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub engine: RateEngine,
    pub registry: Arc<Registry>,
    pub scheduler: Arc<SchedulerStatus>,
}

#[derive(Debug, Deserialize)]
pub struct SetActiveRequest {
    pub active: bool,
}

#[derive(Debug, Deserialize)]
pub struct SetRulesRequest {
    pub rules: Vec<ProfitRule>,
}

#[derive(Debug, Deserialize)]
pub struct PublishRequest {
    pub entries: Vec<RateEntry>,
    #[serde(default)]
    pub effective_at: Option<DateTime<Utc>>,
}

/// Build the service router
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT]);

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/api/v1/cards", post(create_card))
        .route("/api/v1/cards/:id/status", get(card_status))
        .route("/api/v1/cards/:id/active", post(set_active))
        .route("/api/v1/cards/:id/rules", put(set_rules))
        .route("/api/v1/cards/:id/settings", put(update_settings))
        .route("/api/v1/cards/:id/revisions", post(publish_revision).get(list_revisions))
        .route("/api/v1/cards/:id/revisions/:number/rollback", post(rollback))
        .route("/api/v1/cards/:id/derive", post(derive))
        .route("/api/v1/cards/:id/lookup/:number", get(lookup))
        .route("/api/v1/rebuild", post(rebuild))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "tarifa",
        "version": SERVICE_VERSION,
        "last_tick": state.scheduler.last_tick(),
    }))
}

async fn metrics(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&state.registry.gather(), &mut buffer)
        .map_err(|e| ApiError::Engine(tarifa_common::TarifaError::Internal(e.to_string())))?;

    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        buffer,
    ))
}

async fn create_card(
    State(state): State<AppState>,
    Json(request): Json<NewRateCard>,
) -> ApiResult<impl IntoResponse> {
    let card = state.engine.create_card(request).await?;
    Ok((StatusCode::CREATED, Json(card)))
}

async fn card_status(State(state): State<AppState>, Path(id): Path<CardId>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.engine.get_card_status(id).await?))
}

async fn set_active(
    State(state): State<AppState>,
    Path(id): Path<CardId>,
    Json(request): Json<SetActiveRequest>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.engine.set_card_active(id, request.active).await?))
}

async fn set_rules(
    State(state): State<AppState>,
    Path(id): Path<CardId>,
    Json(request): Json<SetRulesRequest>,
) -> ApiResult<impl IntoResponse> {
    let rule_set = state.engine.set_profit_rules(id, request.rules).await?;
    Ok(Json(rule_set.as_ref().clone()))
}

async fn update_settings(
    State(state): State<AppState>,
    Path(id): Path<CardId>,
    Json(update): Json<CardSettingsUpdate>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.engine.update_card_settings(id, update).await?))
}

async fn publish_revision(
    State(state): State<AppState>,
    Path(id): Path<CardId>,
    Json(request): Json<PublishRequest>,
) -> ApiResult<impl IntoResponse> {
    let revision = state
        .engine
        .publish_carrier_revision(id, request.entries, request.effective_at)
        .await?;
    Ok((StatusCode::CREATED, Json(revision)))
}

async fn list_revisions(State(state): State<AppState>, Path(id): Path<CardId>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.engine.list_revisions(id).await?))
}

async fn rollback(
    State(state): State<AppState>,
    Path((id, number)): Path<(CardId, u32)>,
) -> ApiResult<impl IntoResponse> {
    let revision = state.engine.rollback(id, number).await?;
    Ok((StatusCode::CREATED, Json(revision)))
}

async fn derive(State(state): State<AppState>, Path(id): Path<CardId>) -> ApiResult<impl IntoResponse> {
    let revision = state.engine.derive_customer_card(id).await?;
    Ok((StatusCode::CREATED, Json(revision)))
}

async fn lookup(
    State(state): State<AppState>,
    Path((id, number)): Path<(CardId, String)>,
) -> ApiResult<impl IntoResponse> {
    state
        .engine
        .rate_lookup(id, &number)
        .await?
        .map(Json)
        .ok_or(ApiError::NoRate(number))
}

async fn rebuild(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.engine.rebuild_stale_cards().await)
}
