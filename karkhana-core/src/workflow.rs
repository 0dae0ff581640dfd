use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};
use uuid::Uuid;

use karkhana_order::reconcile::{self, KarigarBalance, Reconciliation};
use karkhana_order::{
    AuditEntry, AuditTrail, BusinessRules, Karigar, NewKarigar, NewWorkOrder, Stage, StageIssue, StageReceipt,
    StageRecord, StoneIssue, WorkOrder,
};
use karkhana_shared::models::events::{
    StageIssuedEvent, StageReceivedEvent, WorkOrderCancelledEvent, WorkOrderDispatchedEvent, WorkshopEvent,
};
use karkhana_stones::{validate_lot, NewStoneLot, StoneLot};

use crate::memory::InMemoryWorkshop;
use crate::repository::{KarigarRepository, StoneRepository, WorkOrderRepository};
use crate::{ServiceError, ServiceResult};

/// Stones asked for by lot; the carat weight is looked up from the lot.
#[derive(Debug, Clone, Deserialize)]
pub struct StoneRequest {
    pub stone_lot_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IssueStageCommand {
    pub stage: Stage,
    pub karigar_id: Option<Uuid>,
    pub issue_weight: Option<Decimal>,
    #[serde(default)]
    pub stones: Vec<StoneRequest>,
    pub note: Option<String>,
}

/// Runs the stage workflow against the repositories and announces what happened.
pub struct WorkshopService {
    work_orders: Arc<dyn WorkOrderRepository>,
    karigars: Arc<dyn KarigarRepository>,
    stones: Arc<dyn StoneRepository>,
    rules: BusinessRules,
    events: broadcast::Sender<WorkshopEvent>,
}

impl WorkshopService {
    pub fn new(
        work_orders: Arc<dyn WorkOrderRepository>,
        karigars: Arc<dyn KarigarRepository>,
        stones: Arc<dyn StoneRepository>,
        rules: BusinessRules,
        events: broadcast::Sender<WorkshopEvent>,
    ) -> Self {
        Self {
            work_orders,
            karigars,
            stones,
            rules,
            events,
        }
    }

    /// Service over a fresh [`InMemoryWorkshop`].
    pub fn in_memory(rules: BusinessRules, event_buffer: usize) -> Self {
        let backend = Arc::new(InMemoryWorkshop::new());
        let (events, _) = broadcast::channel(event_buffer);
        Self::new(backend.clone(), backend.clone(), backend, rules, events)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkshopEvent> {
        self.events.subscribe()
    }

    // ------------------------------------------------------------------------
    // Work orders
    // ------------------------------------------------------------------------

    pub async fn create_work_order(&self, input: NewWorkOrder, actor: &str) -> ServiceResult<WorkOrder> {
        let order = WorkOrder::create(input)?;
        let audit = AuditTrail::created(&order, actor);
        self.work_orders.create_work_order(&order, &audit).await?;

        info!("Work order {} created by {} at {}g", order.order_number, actor, order.initial_weight);
        Ok(order)
    }

    pub async fn get_work_order(&self, id: Uuid) -> ServiceResult<WorkOrder> {
        self.work_orders
            .get_work_order(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Work order {}", id)))
    }

    pub async fn issue_stage(&self, id: Uuid, command: IssueStageCommand, actor: &str) -> ServiceResult<StageRecord> {
        let mut order = self.get_work_order(id).await?;
        let loaded = order.version;
        order.ensure_active()?;

        if let Some(karigar_id) = command.karigar_id {
            self.assignable_karigar(karigar_id, command.stage).await?;
        }

        let mut stones = Vec::with_capacity(command.stones.len());
        for request in &command.stones {
            let lot = self.get_stone_lot(request.stone_lot_id).await?;
            if lot.quantity_on_hand < request.quantity {
                return Err(ServiceError::Conflict(format!(
                    "lot {} has {} stones, {} requested",
                    lot.lot_code, lot.quantity_on_hand, request.quantity
                )));
            }
            stones.push(StoneIssue {
                stone_lot_id: lot.id,
                carat_per_piece: lot.carat_per_piece,
                quantity: request.quantity,
            });
        }

        let previous_weight = order.current_weight;
        let record = order
            .issue_stage(
                StageIssue {
                    stage: command.stage,
                    karigar_id: command.karigar_id,
                    issue_weight: command.issue_weight,
                    stones,
                    note: command.note,
                },
                &self.rules,
            )?
            .clone();

        let audit = AuditTrail::stage_issued(&order, previous_weight, &record, actor);
        self.work_orders.insert_stage(&order, loaded, &record, &audit).await?;

        info!(
            "Work order {} issued to {} (seq {}) at {}g",
            order.order_number, record.stage, record.sequence, record.issue_weight
        );
        self.publish(WorkshopEvent::StageIssued(StageIssuedEvent {
            work_order_id: order.id,
            order_number: order.order_number.clone(),
            stage: record.stage.to_string(),
            sequence: record.sequence,
            karigar_id: record.karigar_id,
            issue_weight: record.issue_weight,
            stones_issued: record.stones_issued(),
            timestamp: Utc::now().timestamp(),
        }));
        Ok(record)
    }

    pub async fn receive_stage(&self, id: Uuid, receipt: StageReceipt, actor: &str) -> ServiceResult<StageRecord> {
        let mut order = self.get_work_order(id).await?;
        let loaded = order.version;
        let record = order.receive_stage(receipt, &self.rules)?.clone();

        let audit = AuditTrail::stage_received(&order, &record, actor);
        self.work_orders.update_open_stage(&order, loaded, &record, &audit).await?;

        let loss = record.weight_loss.unwrap_or_default();
        if record.loss_exceeds_tolerance {
            warn!(
                "Work order {} {} loss {}g exceeds tolerance (karigar {:?})",
                order.order_number, record.stage, loss, record.karigar_id
            );
        } else {
            info!("Work order {} {} received, loss {}g", order.order_number, record.stage, loss);
        }

        self.publish(WorkshopEvent::StageReceived(StageReceivedEvent {
            work_order_id: order.id,
            order_number: order.order_number.clone(),
            stage: record.stage.to_string(),
            sequence: record.sequence,
            karigar_id: record.karigar_id,
            jamah_weight: record.jamah_weight.unwrap_or_default(),
            weight_loss: loss,
            loss_exceeds_tolerance: record.loss_exceeds_tolerance,
            timestamp: Utc::now().timestamp(),
        }));
        Ok(record)
    }

    pub async fn reassign_karigar(&self, id: Uuid, karigar_id: Uuid, actor: &str) -> ServiceResult<StageRecord> {
        let mut order = self.get_work_order(id).await?;
        let loaded = order.version;
        order.ensure_active()?;
        let stage = order
            .open_stage()
            .map(|s| s.stage)
            .ok_or(karkhana_order::WorkflowError::NoOpenStage)?;
        self.assignable_karigar(karigar_id, stage).await?;

        let previous = order.reassign_stage(karigar_id)?;
        let record = order
            .open_stage()
            .cloned()
            .ok_or(karkhana_order::WorkflowError::NoOpenStage)?;

        let audit = AuditTrail::karigar_reassigned(&order, &record, previous, actor);
        self.work_orders.update_open_stage(&order, loaded, &record, &audit).await?;

        info!("Work order {} {} reassigned to karigar {}", order.order_number, record.stage, karigar_id);
        Ok(record)
    }

    pub async fn dispatch(
        &self,
        id: Uuid,
        reference: Option<String>,
        note: Option<String>,
        actor: &str,
    ) -> ServiceResult<WorkOrder> {
        let mut order = self.get_work_order(id).await?;
        let loaded = order.version;
        let record = order.dispatch(reference, note)?.clone();

        let audit = AuditTrail::dispatched(&order, &record, actor);
        self.work_orders.insert_stage(&order, loaded, &record, &audit).await?;

        info!("Work order {} dispatched at {}g", order.order_number, order.current_weight);
        self.publish(WorkshopEvent::WorkOrderDispatched(WorkOrderDispatchedEvent {
            work_order_id: order.id,
            order_number: order.order_number.clone(),
            final_weight: order.current_weight,
            reference: order.dispatch_reference.clone(),
            timestamp: Utc::now().timestamp(),
        }));
        Ok(order)
    }

    pub async fn cancel(&self, id: Uuid, reason: String, actor: &str) -> ServiceResult<WorkOrder> {
        let mut order = self.get_work_order(id).await?;
        let loaded = order.version;
        let previous = order.status;
        order.cancel(reason)?;

        let audit = AuditTrail::cancelled(&order, previous, actor);
        self.work_orders.update_work_order(&order, loaded, &audit).await?;

        info!("Work order {} cancelled by {}", order.order_number, actor);
        self.publish(WorkshopEvent::WorkOrderCancelled(WorkOrderCancelledEvent {
            work_order_id: order.id,
            order_number: order.order_number.clone(),
            reason: order.cancellation_reason.clone().unwrap_or_default(),
            timestamp: Utc::now().timestamp(),
        }));
        Ok(order)
    }

    pub async fn reconciliation(&self, id: Uuid) -> ServiceResult<Reconciliation> {
        let order = self.get_work_order(id).await?;
        Ok(reconcile::reconcile(&order))
    }

    pub async fn audit_trail(&self, id: Uuid) -> ServiceResult<Vec<AuditEntry>> {
        self.get_work_order(id).await?;
        let mut entries = self.work_orders.list_audit(id).await?;
        entries.sort_by_key(|entry| entry.created_at);
        Ok(entries)
    }

    // ------------------------------------------------------------------------
    // Karigars
    // ------------------------------------------------------------------------

    pub async fn register_karigar(&self, input: NewKarigar) -> ServiceResult<Karigar> {
        let karigar = Karigar::register(input)?;
        self.karigars.create_karigar(&karigar).await?;
        info!("Karigar {} registered", karigar.name);
        Ok(karigar)
    }

    pub async fn get_karigar(&self, id: Uuid) -> ServiceResult<Karigar> {
        self.karigars
            .get_karigar(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Karigar {}", id)))
    }

    pub async fn deactivate_karigar(&self, id: Uuid) -> ServiceResult<Karigar> {
        let mut karigar = self.get_karigar(id).await?;
        self.karigars.set_karigar_active(id, false).await?;
        karigar.is_active = false;
        info!("Karigar {} deactivated", karigar.name);
        Ok(karigar)
    }

    pub async fn karigar_balance(&self, id: Uuid) -> ServiceResult<KarigarBalance> {
        self.get_karigar(id).await?;
        let stages = self.work_orders.open_stages_for_karigar(id).await?;
        Ok(reconcile::karigar_balance(id, &stages))
    }

    async fn assignable_karigar(&self, karigar_id: Uuid, stage: Stage) -> ServiceResult<Karigar> {
        let karigar = self.get_karigar(karigar_id).await?;
        karigar.check_assignable(stage)?;
        Ok(karigar)
    }

    // ------------------------------------------------------------------------
    // Stone inventory
    // ------------------------------------------------------------------------

    pub async fn create_stone_lot(&self, input: NewStoneLot) -> ServiceResult<StoneLot> {
        let (lot, opening_quantity) = input.into_lot();
        validate_lot(&lot)?;
        if opening_quantity < 0 {
            return Err(ServiceError::Validation("opening_quantity cannot be negative".to_string()));
        }
        let lot = self.stones.create_lot(&lot, opening_quantity).await?;
        info!("Stone lot {} registered with {} pieces", lot.lot_code, lot.quantity_on_hand);
        Ok(lot)
    }

    pub async fn get_stone_lot(&self, id: Uuid) -> ServiceResult<StoneLot> {
        self.stones
            .get_lot(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Stone lot {}", id)))
    }

    pub async fn receive_stones(&self, id: Uuid, quantity: i32, note: Option<String>) -> ServiceResult<StoneLot> {
        if quantity <= 0 {
            return Err(ServiceError::Validation("quantity must be positive".to_string()));
        }
        self.get_stone_lot(id).await?;
        let lot = self.stones.receive_stock(id, quantity, note).await?;
        info!("Received {} stones into lot {}", quantity, lot.lot_code);
        Ok(lot)
    }

    fn publish(&self, event: WorkshopEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}
