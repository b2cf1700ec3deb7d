use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::{json, Value};

use super::domain::{
    PredictRequest, PredictResponse, RegistrationResponse, RoutesQuery,
    TransitRegistrationRequest,
};
use super::service::TransitService;
use crate::error::ApiError;

/// Router exposing health, scoring, registration and route lookup.
pub fn transit_router(service: Arc<TransitService>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/predict", post(predict_handler))
        .route("/transit/register", post(register_handler))
        .route("/routes", get(routes_handler))
        .with_state(service)
}

pub(crate) async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "ok", "time": Utc::now().timestamp_millis() }))
}

// Body and query extraction failures are caller errors and always map to 400.
fn malformed(rejection: impl std::fmt::Display) -> ApiError {
    ApiError::BadRequest(rejection.to_string())
}

pub(crate) async fn predict_handler(
    State(service): State<Arc<TransitService>>,
    payload: Result<Json<PredictRequest>, JsonRejection>,
) -> Result<Json<PredictResponse>, ApiError> {
    let Json(request) = payload.map_err(malformed)?;
    let score = service.predict(request).await?;
    Ok(Json(PredictResponse {
        success: true,
        score,
    }))
}

pub(crate) async fn register_handler(
    State(service): State<Arc<TransitService>>,
    payload: Result<Json<TransitRegistrationRequest>, JsonRejection>,
) -> Result<Json<RegistrationResponse>, ApiError> {
    let Json(request) = payload.map_err(malformed)?;
    Ok(Json(service.register(request).await?))
}

pub(crate) async fn routes_handler(
    State(service): State<Arc<TransitService>>,
    query: Result<Query<RoutesQuery>, QueryRejection>,
) -> Result<Json<Vec<Value>>, ApiError> {
    let Query(query) = query.map_err(malformed)?;
    Ok(Json(service.routes(query).await?))
}
