use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use karkhana_stones::{NewStoneLot, StoneLot};

use crate::error::AppError;
use crate::extract::{ApiJson, ApiPath};
use crate::middleware::{Actor, Role};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ReceiveStonesRequest {
    pub quantity: i32,
    pub note: Option<String>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/stones/lots", post(create_lot))
        .route("/v1/stones/lots/{id}", get(get_lot))
        .route("/v1/stones/lots/{id}/receipts", post(receive_stones))
}

/// POST /v1/stones/lots
pub async fn create_lot(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    ApiJson(req): ApiJson<NewStoneLot>,
) -> Result<(StatusCode, Json<StoneLot>), AppError> {
    actor.require(&[Role::Admin, Role::Manager])?;
    let lot = state.workshop.create_stone_lot(req).await?;
    Ok((StatusCode::CREATED, Json(lot)))
}

/// GET /v1/stones/lots/{id}
pub async fn get_lot(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Json<StoneLot>, AppError> {
    Ok(Json(state.workshop.get_stone_lot(id).await?))
}

/// POST /v1/stones/lots/{id}/receipts
pub async fn receive_stones(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(req): ApiJson<ReceiveStonesRequest>,
) -> Result<Json<StoneLot>, AppError> {
    actor.require(&[Role::Admin, Role::Manager])?;
    let lot = state.workshop.receive_stones(id, req.quantity, req.note).await?;
    Ok(Json(lot))
}
