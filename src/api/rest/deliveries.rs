use std::sync::Arc;

use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;

use crate::error::AppError;
use crate::models::delivery::Delivery;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/deliveries", post(register_delivery))
        .route("/deliveries/available", get(list_available))
        .route("/deliveries/by-code", get(find_by_code))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterDeliveryRequest {
    pub code: String,
    pub destination: String,
    pub expected_fee: f64,
}

#[derive(Deserialize)]
pub struct ByCodeQuery {
    pub code: String,
}

async fn register_delivery(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RegisterDeliveryRequest>,
) -> Result<Json<Delivery>, AppError> {
    let delivery = state
        .backend
        .create(&payload.code, &payload.destination, payload.expected_fee)?;

    Ok(Json(delivery))
}

async fn list_available(State(state): State<Arc<AppState>>) -> Json<Vec<Delivery>> {
    Json(state.backend.available())
}

async fn find_by_code(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ByCodeQuery>,
) -> Result<Json<Delivery>, AppError> {
    let code = query.code.trim();
    let delivery = state
        .backend
        .find_latest_by_code(code)
        .ok_or_else(|| AppError::NotFound(format!("no delivery with code {code}")))?;

    Ok(Json(delivery))
}
