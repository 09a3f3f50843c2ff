use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::{Deserialize, Serialize};

use crate::collaborators::proof::ProofOfDelivery;
use crate::error::AppError;
use crate::models::delivery::{Delivery, DeliveryId};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/delivery", post(add_delivery).get(get_ongoing))
        .route("/delivery/start", post(start_delivery))
        .route("/delivery/cancel", post(cancel_delivery))
        .route("/delivery/end", post(end_delivery))
        .route("/delivery/navigation", get(get_navigation))
        .route("/history", get(get_history))
}

#[derive(Deserialize)]
pub struct AddDeliveryRequest {
    pub code: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndDeliveryRequest {
    pub id: DeliveryId,
    #[serde(default)]
    pub proof_of_delivery: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryResponse {
    pub deliveries: Vec<Delivery>,
    pub total_earnings: f64,
}

#[derive(Serialize)]
pub struct NavigationResponse {
    pub url: Option<String>,
}

async fn add_delivery(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<AddDeliveryRequest>,
) -> Result<Json<Delivery>, AppError> {
    let delivery = state.manager.add_delivery_by_code(&payload.code).await?;
    Ok(Json(delivery))
}

async fn get_ongoing(State(state): State<Arc<AppState>>) -> Json<Option<Delivery>> {
    Json(state.manager.ongoing())
}

async fn start_delivery(State(state): State<Arc<AppState>>) -> Result<Json<Delivery>, AppError> {
    let delivery = state.manager.start_ongoing().await?;
    Ok(Json(delivery))
}

async fn cancel_delivery(State(state): State<Arc<AppState>>) -> Result<Json<Delivery>, AppError> {
    let delivery = state.manager.cancel_ongoing()?;
    Ok(Json(delivery))
}

async fn end_delivery(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<EndDeliveryRequest>,
) -> Result<Json<Delivery>, AppError> {
    let proof = payload
        .proof_of_delivery
        .map(ProofOfDelivery::from_base64)
        .transpose()?;

    let delivery = state.manager.end_ongoing(&payload.id, proof).await?;
    Ok(Json(delivery))
}

async fn get_navigation(State(state): State<Arc<AppState>>) -> Json<NavigationResponse> {
    Json(NavigationResponse {
        url: state.navigator.current_route(),
    })
}

async fn get_history(State(state): State<Arc<AppState>>) -> Json<HistoryResponse> {
    let snapshot = state.manager.snapshot();

    Json(HistoryResponse {
        deliveries: snapshot.history,
        total_earnings: snapshot.total_earnings,
    })
}
