use chrono::{DateTime, NaiveDate, Utc};
use karkhana_shared::Masked;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::pipeline::WorkflowError;

/// Workshop stages a piece passes through.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Framing,
    Setting,
    Polish,
    Repair,
    Dispatch,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Framing,
        Stage::Setting,
        Stage::Polish,
        Stage::Repair,
        Stage::Dispatch,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Framing => "FRAMING",
            Stage::Setting => "SETTING",
            Stage::Polish => "POLISH",
            Stage::Repair => "REPAIR",
            Stage::Dispatch => "DISPATCH",
        }
    }

    /// Stages where stones may be handed to the karigar.
    pub fn carries_stones(&self) -> bool {
        matches!(self, Stage::Setting | Stage::Repair)
    }

    /// Stages that may follow once `from` has been received. `None` means nothing was worked yet.
    pub fn successors(from: Option<Stage>) -> &'static [Stage] {
        match from {
            None => &[Stage::Framing],
            Some(Stage::Framing) => &[Stage::Setting, Stage::Polish, Stage::Repair],
            Some(Stage::Setting) => &[Stage::Polish, Stage::Repair],
            Some(Stage::Polish) => &[Stage::Dispatch, Stage::Repair],
            Some(Stage::Repair) => &[Stage::Setting, Stage::Polish],
            Some(Stage::Dispatch) => &[],
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .iter()
            .find(|stage| stage.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown stage: {}", s))
    }
}

/// Work order status in the lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkOrderStatus {
    Created,
    InProgress,
    Dispatched,
    Cancelled,
}

impl WorkOrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkOrderStatus::Created => "CREATED",
            WorkOrderStatus::InProgress => "IN_PROGRESS",
            WorkOrderStatus::Dispatched => "DISPATCHED",
            WorkOrderStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, WorkOrderStatus::Dispatched | WorkOrderStatus::Cancelled)
    }
}

impl fmt::Display for WorkOrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkOrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATED" => Ok(WorkOrderStatus::Created),
            "IN_PROGRESS" => Ok(WorkOrderStatus::InProgress),
            "DISPATCHED" => Ok(WorkOrderStatus::Dispatched),
            "CANCELLED" => Ok(WorkOrderStatus::Cancelled),
            other => Err(format!("unknown work order status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageStatus {
    /// Metal (and stones) are with the karigar.
    Issued,
    /// Jamah recorded.
    Received,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Issued => "ISSUED",
            StageStatus::Received => "RECEIVED",
        }
    }
}

impl FromStr for StageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ISSUED" => Ok(StageStatus::Issued),
            "RECEIVED" => Ok(StageStatus::Received),
            other => Err(format!("unknown stage status: {}", other)),
        }
    }
}

/// Stones of one lot handed out with a stage, and how they came back.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageStoneLine {
    pub stone_lot_id: Uuid,
    /// Snapshot of the lot's carat weight at issue time.
    pub carat_per_piece: Decimal,
    pub issued: i32,
    pub set: i32,
    pub returned: i32,
    pub broken: i32,
}

impl StageStoneLine {
    pub fn new(stone_lot_id: Uuid, carat_per_piece: Decimal, issued: i32) -> Self {
        Self {
            stone_lot_id,
            carat_per_piece,
            issued,
            set: 0,
            returned: 0,
            broken: 0,
        }
    }

    /// `None` if the counts overflow.
    pub fn accounted(&self) -> Option<i32> {
        self.set.checked_add(self.returned)?.checked_add(self.broken)
    }
}

/// One pass of a work order through a stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageRecord {
    pub id: Uuid,
    pub work_order_id: Uuid,
    pub sequence: i32,
    pub stage: Stage,
    pub status: StageStatus,
    pub karigar_id: Option<Uuid>,
    pub issue_weight: Decimal,
    /// `issue_weight` minus the order's weight before this stage.
    pub issue_adjustment: Decimal,
    pub jamah_weight: Option<Decimal>,
    pub metal_added: Decimal,
    pub stone_weight_added: Decimal,
    pub weight_loss: Option<Decimal>,
    pub loss_exceeds_tolerance: bool,
    pub stones: Vec<StageStoneLine>,
    pub note: Option<String>,
    pub issued_at: DateTime<Utc>,
    pub received_at: Option<DateTime<Utc>>,
}

impl StageRecord {
    pub fn new(work_order_id: Uuid, sequence: i32, stage: Stage, issue_weight: Decimal) -> Self {
        Self {
            id: Uuid::new_v4(),
            work_order_id,
            sequence,
            stage,
            status: StageStatus::Issued,
            karigar_id: None,
            issue_weight,
            issue_adjustment: Decimal::ZERO,
            jamah_weight: None,
            metal_added: Decimal::ZERO,
            stone_weight_added: Decimal::ZERO,
            weight_loss: None,
            loss_exceeds_tolerance: false,
            stones: Vec::new(),
            note: None,
            issued_at: Utc::now(),
            received_at: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == StageStatus::Issued
    }

    pub fn stones_issued(&self) -> i32 {
        self.stones.iter().map(|line| line.issued).sum()
    }
}

/// Input for opening a new work order.
#[derive(Debug, Clone, Deserialize)]
pub struct NewWorkOrder {
    pub order_number: String,
    pub customer_name: String,
    pub customer_phone: Option<Masked<String>>,
    pub design_code: String,
    pub description: Option<String>,
    pub metal_purity: Option<String>,
    pub initial_weight: Decimal,
    pub due_date: Option<NaiveDate>,
}

/// A customer job and every stage it has been through.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkOrder {
    pub id: Uuid,
    pub order_number: String,
    pub customer_name: String,
    pub customer_phone: Option<Masked<String>>,
    pub design_code: String,
    pub description: Option<String>,
    pub metal_purity: Option<String>,
    pub initial_weight: Decimal,
    pub current_weight: Decimal,
    pub status: WorkOrderStatus,
    pub current_stage: Option<Stage>,
    pub due_date: Option<NaiveDate>,
    pub stages: Vec<StageRecord>,
    pub dispatch_reference: Option<String>,
    pub cancellation_reason: Option<String>,
    pub dispatched_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Bumped by every change. Writers compare it with the stored value to detect lost updates.
    pub version: i64,
}

impl WorkOrder {
    pub fn create(input: NewWorkOrder) -> Result<Self, WorkflowError> {
        if input.order_number.trim().is_empty() {
            return Err(WorkflowError::Validation("order_number is required".to_string()));
        }
        if input.customer_name.trim().is_empty() {
            return Err(WorkflowError::Validation("customer_name is required".to_string()));
        }
        if input.design_code.trim().is_empty() {
            return Err(WorkflowError::Validation("design_code is required".to_string()));
        }
        let weight = input.initial_weight.round_dp(3);
        if weight <= Decimal::ZERO {
            return Err(WorkflowError::Validation("initial_weight must be positive".to_string()));
        }

        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            order_number: input.order_number.trim().to_string(),
            customer_name: input.customer_name.trim().to_string(),
            customer_phone: input.customer_phone,
            design_code: input.design_code.trim().to_string(),
            description: input.description,
            metal_purity: input.metal_purity,
            initial_weight: weight,
            current_weight: weight,
            status: WorkOrderStatus::Created,
            current_stage: None,
            due_date: input.due_date,
            stages: Vec::new(),
            dispatch_reference: None,
            cancellation_reason: None,
            dispatched_at: None,
            created_at: now,
            updated_at: now,
            version: 0,
        })
    }

    pub fn open_stage(&self) -> Option<&StageRecord> {
        self.stages.iter().find(|s| s.is_open())
    }

    /// The most recent stage whose jamah has been recorded.
    pub fn last_received_stage(&self) -> Option<Stage> {
        self.stages
            .iter()
            .rev()
            .find(|s| s.status == StageStatus::Received)
            .map(|s| s.stage)
    }

    pub fn next_sequence(&self) -> i32 {
        self.stages.len() as i32 + 1
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
        self.version += 1;
    }
}
