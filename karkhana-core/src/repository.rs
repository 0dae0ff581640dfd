use async_trait::async_trait;
use uuid::Uuid;

use karkhana_order::{AuditEntry, Karigar, StageRecord, WorkOrder};
use karkhana_stones::{MovementKind, StockError, StoneLot, StoneMovement};

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("{0} not found")]
    NotFound(String),
    /// Lost a race with another writer, a uniqueness rule, or stock ran out.
    #[error("{0}")]
    Conflict(String),
    #[error("Stored data is invalid: {0}")]
    Corrupt(String),
    #[error("Storage backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl From<StockError> for RepositoryError {
    fn from(err: StockError) -> Self {
        match err {
            StockError::NotFound(id) => RepositoryError::NotFound(format!("Stone lot {}", id)),
            other => RepositoryError::Conflict(other.to_string()),
        }
    }
}

pub type RepoResult<T> = Result<T, RepositoryError>;

/// Repository trait for work orders, their stage records and audit trail.
///
/// Every write carries the audit entry describing it and must persist both atomically.
/// Writes also carry the order version the change was computed from; if the stored order has
/// moved past it the write fails with `Conflict` and nothing is persisted.
#[async_trait]
pub trait WorkOrderRepository: Send + Sync {
    async fn create_work_order(&self, order: &WorkOrder, audit: &AuditEntry) -> RepoResult<()>;

    async fn get_work_order(&self, id: Uuid) -> RepoResult<Option<WorkOrder>>;

    /// Persist a stage record just appended to `order` (an issue or the dispatch), post its
    /// stone issues against stock and update the order header.
    async fn insert_stage(
        &self,
        order: &WorkOrder,
        expected_version: i64,
        stage: &StageRecord,
        audit: &AuditEntry,
    ) -> RepoResult<()>;

    /// Persist a change to a stage that is open in storage (jamah or reassignment). Fails with
    /// `Conflict` if the stored stage is no longer open.
    async fn update_open_stage(
        &self,
        order: &WorkOrder,
        expected_version: i64,
        stage: &StageRecord,
        audit: &AuditEntry,
    ) -> RepoResult<()>;

    /// Header-only change (cancellation).
    async fn update_work_order(&self, order: &WorkOrder, expected_version: i64, audit: &AuditEntry) -> RepoResult<()>;

    async fn list_audit(&self, work_order_id: Uuid) -> RepoResult<Vec<AuditEntry>>;

    async fn open_stages_for_karigar(&self, karigar_id: Uuid) -> RepoResult<Vec<StageRecord>>;
}

#[async_trait]
pub trait KarigarRepository: Send + Sync {
    async fn create_karigar(&self, karigar: &Karigar) -> RepoResult<()>;

    async fn get_karigar(&self, id: Uuid) -> RepoResult<Option<Karigar>>;

    async fn set_karigar_active(&self, id: Uuid, active: bool) -> RepoResult<()>;
}

#[async_trait]
pub trait StoneRepository: Send + Sync {
    /// Register a lot and journal its opening quantity.
    async fn create_lot(&self, lot: &StoneLot, opening_quantity: i32) -> RepoResult<StoneLot>;

    async fn get_lot(&self, id: Uuid) -> RepoResult<Option<StoneLot>>;

    async fn receive_stock(&self, lot_id: Uuid, quantity: i32, note: Option<String>) -> RepoResult<StoneLot>;
}

/// Stock journal lines a stage record implies: issues while it is open, returns and
/// breakage once it is received.
pub fn stone_movements_for(stage: &StageRecord) -> Vec<StoneMovement> {
    let mut movements = Vec::new();
    for line in &stage.stones {
        let lines = if stage.is_open() {
            vec![(MovementKind::Issue, line.issued)]
        } else {
            vec![(MovementKind::Return, line.returned), (MovementKind::Broken, line.broken)]
        };
        for (kind, quantity) in lines {
            if quantity > 0 {
                movements.push(
                    StoneMovement::new(line.stone_lot_id, kind, quantity)
                        .for_stage(stage.work_order_id, stage.id),
                );
            }
        }
    }
    movements
}
