use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post, put},
    Extension, Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use karkhana_core::IssueStageCommand;
use karkhana_order::reconcile::Reconciliation;
use karkhana_order::{AuditEntry, NewWorkOrder, StageReceipt, StageRecord, WorkOrder};

use crate::error::AppError;
use crate::extract::{ApiJson, ApiPath};
use crate::middleware::{Actor, Role};
use crate::state::AppState;

// ============================================================================
// Request Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ReassignKarigarRequest {
    pub karigar_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct DispatchRequest {
    pub reference: Option<String>,
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    pub reason: String,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/work-orders", post(create_work_order))
        .route("/v1/work-orders/{id}", get(get_work_order))
        .route("/v1/work-orders/{id}/stages", post(issue_stage))
        .route("/v1/work-orders/{id}/stages/current/receive", post(receive_stage))
        .route("/v1/work-orders/{id}/stages/current/karigar", put(reassign_karigar))
        .route("/v1/work-orders/{id}/dispatch", post(dispatch))
        .route("/v1/work-orders/{id}/cancel", post(cancel))
        .route("/v1/work-orders/{id}/reconciliation", get(reconciliation))
        .route("/v1/work-orders/{id}/audit", get(audit_trail))
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /v1/work-orders
pub async fn create_work_order(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    ApiJson(req): ApiJson<NewWorkOrder>,
) -> Result<(StatusCode, Json<WorkOrder>), AppError> {
    actor.require(&[Role::Admin, Role::Manager])?;
    let order = state.workshop.create_work_order(req, &actor.user).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

/// GET /v1/work-orders/{id}
pub async fn get_work_order(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Json<WorkOrder>, AppError> {
    Ok(Json(state.workshop.get_work_order(id).await?))
}

/// POST /v1/work-orders/{id}/stages
/// Issue the piece (and any stones) to a karigar for the next stage.
pub async fn issue_stage(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(req): ApiJson<IssueStageCommand>,
) -> Result<(StatusCode, Json<StageRecord>), AppError> {
    actor.require(&[Role::Admin, Role::Manager])?;
    let record = state.workshop.issue_stage(id, req, &actor.user).await?;
    state.metrics.stage_issued(&record);
    Ok((StatusCode::CREATED, Json(record)))
}

/// POST /v1/work-orders/{id}/stages/current/receive
/// Record the jamah of the open stage.
pub async fn receive_stage(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(req): ApiJson<StageReceipt>,
) -> Result<Json<StageRecord>, AppError> {
    actor.require(&[Role::Admin, Role::Manager])?;
    let record = state.workshop.receive_stage(id, req, &actor.user).await?;
    state.metrics.stage_received(&record);
    Ok(Json(record))
}

/// PUT /v1/work-orders/{id}/stages/current/karigar
pub async fn reassign_karigar(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(req): ApiJson<ReassignKarigarRequest>,
) -> Result<Json<StageRecord>, AppError> {
    actor.require(&[Role::Admin, Role::Manager])?;
    let record = state.workshop.reassign_karigar(id, req.karigar_id, &actor.user).await?;
    Ok(Json(record))
}

/// POST /v1/work-orders/{id}/dispatch
pub async fn dispatch(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(req): ApiJson<DispatchRequest>,
) -> Result<Json<WorkOrder>, AppError> {
    actor.require(&[Role::Admin, Role::Dispatcher])?;
    let order = state.workshop.dispatch(id, req.reference, req.note, &actor.user).await?;
    state.metrics.dispatched();
    Ok(Json(order))
}

/// POST /v1/work-orders/{id}/cancel
pub async fn cancel(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(req): ApiJson<CancelRequest>,
) -> Result<Json<WorkOrder>, AppError> {
    actor.require(&[Role::Admin])?;
    let order = state.workshop.cancel(id, req.reason, &actor.user).await?;
    Ok(Json(order))
}

/// GET /v1/work-orders/{id}/reconciliation
pub async fn reconciliation(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Json<Reconciliation>, AppError> {
    Ok(Json(state.workshop.reconciliation(id).await?))
}

/// GET /v1/work-orders/{id}/audit
pub async fn audit_trail(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Json<Vec<AuditEntry>>, AppError> {
    Ok(Json(state.workshop.audit_trail(id).await?))
}
