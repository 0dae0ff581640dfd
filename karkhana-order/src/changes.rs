use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::models::{StageRecord, WorkOrder, WorkOrderStatus};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    Created,
    StageIssued,
    StageReceived,
    KarigarReassigned,
    Dispatched,
    Cancelled,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Created => "CREATED",
            AuditAction::StageIssued => "STAGE_ISSUED",
            AuditAction::StageReceived => "STAGE_RECEIVED",
            AuditAction::KarigarReassigned => "KARIGAR_REASSIGNED",
            AuditAction::Dispatched => "DISPATCHED",
            AuditAction::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATED" => Ok(AuditAction::Created),
            "STAGE_ISSUED" => Ok(AuditAction::StageIssued),
            "STAGE_RECEIVED" => Ok(AuditAction::StageReceived),
            "KARIGAR_REASSIGNED" => Ok(AuditAction::KarigarReassigned),
            "DISPATCHED" => Ok(AuditAction::Dispatched),
            "CANCELLED" => Ok(AuditAction::Cancelled),
            other => Err(format!("unknown audit action: {}", other)),
        }
    }
}

/// Append-only record of one change to a work order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEntry {
    pub id: Uuid,
    pub work_order_id: Uuid,
    pub action: AuditAction,
    pub before: Option<Value>,
    pub after: Option<Value>,
    pub actor: String,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    fn new(work_order_id: Uuid, action: AuditAction, actor: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            work_order_id,
            action,
            before: None,
            after: None,
            actor: actor.to_string(),
            note: None,
            created_at: Utc::now(),
        }
    }
}

/// Builds audit entries from the state of a work order around a change.
pub struct AuditTrail;

impl AuditTrail {
    pub fn created(order: &WorkOrder, actor: &str) -> AuditEntry {
        let mut entry = AuditEntry::new(order.id, AuditAction::Created, actor);
        entry.after = Some(json!({
            "order_number": order.order_number,
            "design_code": order.design_code,
            "initial_weight": order.initial_weight,
            "status": order.status,
        }));
        entry
    }

    pub fn stage_issued(order: &WorkOrder, previous_weight: rust_decimal::Decimal, record: &StageRecord, actor: &str) -> AuditEntry {
        let mut entry = AuditEntry::new(order.id, AuditAction::StageIssued, actor);
        entry.before = Some(json!({ "current_weight": previous_weight }));
        entry.after = Some(json!({
            "stage": record.stage,
            "sequence": record.sequence,
            "karigar_id": record.karigar_id,
            "issue_weight": record.issue_weight,
            "issue_adjustment": record.issue_adjustment,
            "stones_issued": record.stones_issued(),
        }));
        entry.note = record.note.clone();
        entry
    }

    pub fn stage_received(order: &WorkOrder, record: &StageRecord, actor: &str) -> AuditEntry {
        let mut entry = AuditEntry::new(order.id, AuditAction::StageReceived, actor);
        entry.before = Some(json!({
            "stage": record.stage,
            "issue_weight": record.issue_weight,
        }));
        entry.after = Some(json!({
            "jamah_weight": record.jamah_weight,
            "metal_added": record.metal_added,
            "stone_weight_added": record.stone_weight_added,
            "weight_loss": record.weight_loss,
            "loss_exceeds_tolerance": record.loss_exceeds_tolerance,
            "stones": record.stones,
        }));
        entry.note = record.note.clone();
        entry
    }

    pub fn karigar_reassigned(order: &WorkOrder, record: &StageRecord, previous: Option<Uuid>, actor: &str) -> AuditEntry {
        let mut entry = AuditEntry::new(order.id, AuditAction::KarigarReassigned, actor);
        entry.before = Some(json!({ "stage": record.stage, "karigar_id": previous }));
        entry.after = Some(json!({ "stage": record.stage, "karigar_id": record.karigar_id }));
        entry
    }

    pub fn dispatched(order: &WorkOrder, record: &StageRecord, actor: &str) -> AuditEntry {
        let mut entry = AuditEntry::new(order.id, AuditAction::Dispatched, actor);
        entry.before = Some(json!({ "status": WorkOrderStatus::InProgress }));
        entry.after = Some(json!({
            "status": order.status,
            "final_weight": record.jamah_weight,
            "reference": order.dispatch_reference,
        }));
        entry.note = record.note.clone();
        entry
    }

    pub fn cancelled(order: &WorkOrder, previous: WorkOrderStatus, actor: &str) -> AuditEntry {
        let mut entry = AuditEntry::new(order.id, AuditAction::Cancelled, actor);
        entry.before = Some(json!({ "status": previous }));
        entry.after = Some(json!({ "status": order.status }));
        entry.note = order.cancellation_reason.clone();
        entry
    }
}
