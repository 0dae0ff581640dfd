use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use karkhana_order::{AuditEntry, Karigar, StageRecord, WorkOrder};
use karkhana_stones::{StockLedger, StoneLot};

use crate::repository::{
    stone_movements_for, KarigarRepository, RepoResult, RepositoryError, StoneRepository, WorkOrderRepository,
};

#[derive(Default)]
struct MemoryState {
    orders: HashMap<Uuid, WorkOrder>,
    audit: Vec<AuditEntry>,
    karigars: HashMap<Uuid, Karigar>,
    stock: StockLedger,
}

/// Process-local backend for tests and demo runs. Applies the same conflict rules as the
/// PostgreSQL store: one open stage per order, contiguous sequences, no negative stock.
#[derive(Default)]
pub struct InMemoryWorkshop {
    state: RwLock<MemoryState>,
}

impl InMemoryWorkshop {
    pub fn new() -> Self {
        Self::default()
    }
}

fn stored_order<'a>(state: &'a MemoryState, order: &WorkOrder, expected_version: i64) -> RepoResult<&'a WorkOrder> {
    let stored = state
        .orders
        .get(&order.id)
        .ok_or_else(|| RepositoryError::NotFound(format!("Work order {}", order.id)))?;
    if stored.version != expected_version {
        return Err(RepositoryError::Conflict(format!(
            "work order {} changed concurrently",
            order.order_number
        )));
    }
    Ok(stored)
}

#[async_trait]
impl WorkOrderRepository for InMemoryWorkshop {
    async fn create_work_order(&self, order: &WorkOrder, audit: &AuditEntry) -> RepoResult<()> {
        let mut state = self.state.write().await;
        if state.orders.values().any(|o| o.order_number == order.order_number) {
            return Err(RepositoryError::Conflict(format!(
                "work order number {} already exists",
                order.order_number
            )));
        }
        state.orders.insert(order.id, order.clone());
        state.audit.push(audit.clone());
        Ok(())
    }

    async fn get_work_order(&self, id: Uuid) -> RepoResult<Option<WorkOrder>> {
        Ok(self.state.read().await.orders.get(&id).cloned())
    }

    async fn insert_stage(
        &self,
        order: &WorkOrder,
        expected_version: i64,
        stage: &StageRecord,
        audit: &AuditEntry,
    ) -> RepoResult<()> {
        let mut state = self.state.write().await;
        let stored = stored_order(&state, order, expected_version)?;

        if stored.stages.len() as i32 + 1 != stage.sequence {
            return Err(RepositoryError::Conflict(format!(
                "work order {} changed concurrently",
                order.order_number
            )));
        }
        if stored.open_stage().is_some() {
            return Err(RepositoryError::Conflict(format!(
                "work order {} already has an open stage",
                order.order_number
            )));
        }

        state.stock.apply_all(stone_movements_for(stage))?;
        state.orders.insert(order.id, order.clone());
        state.audit.push(audit.clone());
        Ok(())
    }

    async fn update_open_stage(
        &self,
        order: &WorkOrder,
        expected_version: i64,
        stage: &StageRecord,
        audit: &AuditEntry,
    ) -> RepoResult<()> {
        let mut state = self.state.write().await;
        let stored = stored_order(&state, order, expected_version)?;

        let still_open = stored.stages.iter().any(|s| s.id == stage.id && s.is_open());
        if !still_open {
            return Err(RepositoryError::Conflict(format!(
                "stage {} of work order {} is no longer open",
                stage.stage, order.order_number
            )));
        }

        if !stage.is_open() {
            state.stock.apply_all(stone_movements_for(stage))?;
        }
        state.orders.insert(order.id, order.clone());
        state.audit.push(audit.clone());
        Ok(())
    }

    async fn update_work_order(&self, order: &WorkOrder, expected_version: i64, audit: &AuditEntry) -> RepoResult<()> {
        let mut state = self.state.write().await;
        stored_order(&state, order, expected_version)?;
        state.orders.insert(order.id, order.clone());
        state.audit.push(audit.clone());
        Ok(())
    }

    async fn list_audit(&self, work_order_id: Uuid) -> RepoResult<Vec<AuditEntry>> {
        let state = self.state.read().await;
        Ok(state
            .audit
            .iter()
            .filter(|entry| entry.work_order_id == work_order_id)
            .cloned()
            .collect())
    }

    async fn open_stages_for_karigar(&self, karigar_id: Uuid) -> RepoResult<Vec<StageRecord>> {
        let state = self.state.read().await;
        Ok(state
            .orders
            .values()
            .flat_map(|order| order.stages.iter())
            .filter(|stage| stage.is_open() && stage.karigar_id == Some(karigar_id))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl KarigarRepository for InMemoryWorkshop {
    async fn create_karigar(&self, karigar: &Karigar) -> RepoResult<()> {
        self.state.write().await.karigars.insert(karigar.id, karigar.clone());
        Ok(())
    }

    async fn get_karigar(&self, id: Uuid) -> RepoResult<Option<Karigar>> {
        Ok(self.state.read().await.karigars.get(&id).cloned())
    }

    async fn set_karigar_active(&self, id: Uuid, active: bool) -> RepoResult<()> {
        let mut state = self.state.write().await;
        let karigar = state
            .karigars
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("Karigar {}", id)))?;
        karigar.is_active = active;
        Ok(())
    }
}

#[async_trait]
impl StoneRepository for InMemoryWorkshop {
    async fn create_lot(&self, lot: &StoneLot, opening_quantity: i32) -> RepoResult<StoneLot> {
        let mut state = self.state.write().await;
        Ok(state.stock.register(lot.clone(), opening_quantity)?.clone())
    }

    async fn get_lot(&self, id: Uuid) -> RepoResult<Option<StoneLot>> {
        Ok(self.state.read().await.stock.get(&id).cloned())
    }

    async fn receive_stock(&self, lot_id: Uuid, quantity: i32, note: Option<String>) -> RepoResult<StoneLot> {
        let mut state = self.state.write().await;
        Ok(state.stock.receive(&lot_id, quantity, note)?.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{IssueStageCommand, WorkshopService};
    use karkhana_order::{AuditTrail, BusinessRules, NewWorkOrder, Stage, WorkOrderStatus};
    use rust_decimal_macros::dec;
    use std::sync::Arc;
    use tokio::sync::broadcast;

    #[tokio::test]
    async fn test_stale_write_conflicts() {
        let backend = Arc::new(InMemoryWorkshop::new());
        let (events, _) = broadcast::channel(4);
        let svc = WorkshopService::new(backend.clone(), backend.clone(), backend.clone(), BusinessRules::default(), events);

        let order = svc
            .create_work_order(
                NewWorkOrder {
                    order_number: "WO-6001".to_string(),
                    customer_name: "Farah Khan".to_string(),
                    customer_phone: None,
                    design_code: "RING-3".to_string(),
                    description: None,
                    metal_purity: None,
                    initial_weight: dec!(4.2),
                    due_date: None,
                },
                "manager",
            )
            .await
            .unwrap();

        // A cancel computed from this snapshot races the issue below.
        let mut stale = backend.get_work_order(order.id).await.unwrap().unwrap();
        let loaded = stale.version;

        let command = IssueStageCommand { stage: Stage::Framing, karigar_id: None, issue_weight: None, stones: vec![], note: None };
        svc.issue_stage(order.id, command, "manager").await.unwrap();

        let previous = stale.status;
        stale.cancel("customer withdrew".to_string()).unwrap();
        let audit = AuditTrail::cancelled(&stale, previous, "manager");
        let err = backend.update_work_order(&stale, loaded, &audit).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));

        let stored = backend.get_work_order(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, WorkOrderStatus::InProgress);
        assert!(stored.open_stage().is_some());
        assert_eq!(backend.list_audit(order.id).await.unwrap().len(), 2);
    }
}
