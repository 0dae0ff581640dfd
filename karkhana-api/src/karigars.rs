use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use uuid::Uuid;

use karkhana_order::{Karigar, KarigarBalance, NewKarigar};

use crate::error::AppError;
use crate::extract::{ApiJson, ApiPath};
use crate::middleware::{Actor, Role};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/karigars", post(register_karigar))
        .route("/v1/karigars/{id}", get(get_karigar))
        .route("/v1/karigars/{id}/deactivate", post(deactivate_karigar))
        .route("/v1/karigars/{id}/balance", get(karigar_balance))
}

/// POST /v1/karigars
pub async fn register_karigar(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    ApiJson(req): ApiJson<NewKarigar>,
) -> Result<(StatusCode, Json<Karigar>), AppError> {
    actor.require(&[Role::Admin])?;
    let karigar = state.workshop.register_karigar(req).await?;
    Ok((StatusCode::CREATED, Json(karigar)))
}

/// GET /v1/karigars/{id}
pub async fn get_karigar(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Json<Karigar>, AppError> {
    Ok(Json(state.workshop.get_karigar(id).await?))
}

/// POST /v1/karigars/{id}/deactivate
pub async fn deactivate_karigar(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Json<Karigar>, AppError> {
    actor.require(&[Role::Admin])?;
    Ok(Json(state.workshop.deactivate_karigar(id).await?))
}

/// GET /v1/karigars/{id}/balance
/// Metal and stones the karigar is holding on open stages.
pub async fn karigar_balance(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Json<KarigarBalance>, AppError> {
    Ok(Json(state.workshop.karigar_balance(id).await?))
}
