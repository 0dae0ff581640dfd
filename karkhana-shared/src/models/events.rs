use rust_decimal::Decimal;
use uuid::Uuid;

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq)]
pub struct StageIssuedEvent {
    pub work_order_id: Uuid,
    pub order_number: String,
    pub stage: String,
    pub sequence: i32,
    pub karigar_id: Option<Uuid>,
    pub issue_weight: Decimal,
    pub stones_issued: i32,
    pub timestamp: i64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq)]
pub struct StageReceivedEvent {
    pub work_order_id: Uuid,
    pub order_number: String,
    pub stage: String,
    pub sequence: i32,
    pub karigar_id: Option<Uuid>,
    pub jamah_weight: Decimal,
    pub weight_loss: Decimal,
    pub loss_exceeds_tolerance: bool,
    pub timestamp: i64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq)]
pub struct WorkOrderDispatchedEvent {
    pub work_order_id: Uuid,
    pub order_number: String,
    pub final_weight: Decimal,
    pub reference: Option<String>,
    pub timestamp: i64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq)]
pub struct WorkOrderCancelledEvent {
    pub work_order_id: Uuid,
    pub order_number: String,
    pub reason: String,
    pub timestamp: i64,
}

/// Everything the live workshop board subscribes to.
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkshopEvent {
    StageIssued(StageIssuedEvent),
    StageReceived(StageReceivedEvent),
    WorkOrderDispatched(WorkOrderDispatchedEvent),
    WorkOrderCancelled(WorkOrderCancelledEvent),
}

impl WorkshopEvent {
    pub fn name(&self) -> &'static str {
        match self {
            WorkshopEvent::StageIssued(_) => "stage_issued",
            WorkshopEvent::StageReceived(_) => "stage_received",
            WorkshopEvent::WorkOrderDispatched(_) => "work_order_dispatched",
            WorkshopEvent::WorkOrderCancelled(_) => "work_order_cancelled",
        }
    }

    pub fn work_order_id(&self) -> Uuid {
        match self {
            WorkshopEvent::StageIssued(e) => e.work_order_id,
            WorkshopEvent::StageReceived(e) => e.work_order_id,
            WorkshopEvent::WorkOrderDispatched(e) => e.work_order_id,
            WorkshopEvent::WorkOrderCancelled(e) => e.work_order_id,
        }
    }
}
