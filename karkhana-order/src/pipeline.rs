use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;
use chrono::Utc;

use crate::models::{Stage, StageRecord, StageStatus, StageStoneLine, WorkOrder, WorkOrderStatus};
use crate::reconcile;

/// Workshop-wide knobs for the stage workflow. Loaded from configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BusinessRules {
    /// Accept an issue weight that differs from the piece's current weight (metal added or
    /// removed between stages).
    #[serde(default)]
    pub allow_issue_adjustment: bool,
    #[serde(default)]
    pub loss_tolerance_percent: LossTolerance,
}

/// Maximum acceptable loss per stage, in percent of the issue weight.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LossTolerance {
    pub framing: Decimal,
    pub setting: Decimal,
    pub polish: Decimal,
    pub repair: Decimal,
}

impl Default for LossTolerance {
    fn default() -> Self {
        Self {
            framing: Decimal::new(10, 1),
            setting: Decimal::new(5, 1),
            polish: Decimal::new(15, 1),
            repair: Decimal::new(10, 1),
        }
    }
}

impl LossTolerance {
    pub fn for_stage(&self, stage: Stage) -> Option<Decimal> {
        match stage {
            Stage::Framing => Some(self.framing),
            Stage::Setting => Some(self.setting),
            Stage::Polish => Some(self.polish),
            Stage::Repair => Some(self.repair),
            Stage::Dispatch => None,
        }
    }
}

/// Stones requested for a stage. The caller resolves `carat_per_piece` from the lot.
#[derive(Debug, Clone, PartialEq)]
pub struct StoneIssue {
    pub stone_lot_id: Uuid,
    pub carat_per_piece: Decimal,
    pub quantity: i32,
}

/// What the karigar reports back for one issued stone line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoneReport {
    pub stone_lot_id: Uuid,
    #[serde(default)]
    pub set: i32,
    #[serde(default)]
    pub returned: i32,
    #[serde(default)]
    pub broken: i32,
}

/// Request to move a work order into a stage.
#[derive(Debug, Clone)]
pub struct StageIssue {
    pub stage: Stage,
    pub karigar_id: Option<Uuid>,
    pub issue_weight: Option<Decimal>,
    pub stones: Vec<StoneIssue>,
    pub note: Option<String>,
}

/// The jamah: what came back from the open stage.
#[derive(Debug, Clone, Deserialize)]
pub struct StageReceipt {
    pub jamah_weight: Decimal,
    #[serde(default)]
    pub metal_added: Decimal,
    #[serde(default)]
    pub stones: Vec<StoneReport>,
    pub note: Option<String>,
}

impl WorkOrder {
    /// Hand the piece to a karigar for the next stage.
    pub fn issue_stage(&mut self, issue: StageIssue, rules: &BusinessRules) -> Result<&StageRecord, WorkflowError> {
        self.ensure_active()?;

        if let Some(open) = self.open_stage() {
            return Err(WorkflowError::StageOpen(open.stage.to_string()));
        }

        if issue.stage == Stage::Dispatch {
            return Err(WorkflowError::Validation(
                "dispatch is recorded through the dispatch operation".to_string(),
            ));
        }

        let from = self.last_received_stage();
        if !Stage::successors(from).contains(&issue.stage) {
            return Err(WorkflowError::InvalidTransition {
                from: from.map(|s| s.to_string()).unwrap_or_else(|| "NONE".to_string()),
                to: issue.stage.to_string(),
            });
        }

        let issue_weight = match issue.issue_weight {
            None => self.current_weight,
            Some(weight) => {
                let weight = weight.round_dp(3);
                if weight <= Decimal::ZERO {
                    return Err(WorkflowError::Validation("issue_weight must be positive".to_string()));
                }
                if weight != self.current_weight && !rules.allow_issue_adjustment {
                    return Err(WorkflowError::IssueAdjustmentNotAllowed {
                        expected: self.current_weight,
                        requested: weight,
                    });
                }
                weight
            }
        };

        if !issue.stones.is_empty() && !issue.stage.carries_stones() {
            return Err(WorkflowError::StonesNotAllowed(issue.stage.to_string()));
        }

        let mut seen = HashSet::new();
        for stone in &issue.stones {
            if stone.quantity <= 0 {
                return Err(WorkflowError::Validation(format!(
                    "stone quantity for lot {} must be positive",
                    stone.stone_lot_id
                )));
            }
            if !seen.insert(stone.stone_lot_id) {
                return Err(WorkflowError::Validation(format!(
                    "stone lot {} listed more than once",
                    stone.stone_lot_id
                )));
            }
        }

        let mut record = StageRecord::new(self.id, self.next_sequence(), issue.stage, issue_weight);
        record.karigar_id = issue.karigar_id;
        record.issue_adjustment = issue_weight - self.current_weight;
        record.note = issue.note;
        record.stones = issue
            .stones
            .into_iter()
            .map(|s| StageStoneLine::new(s.stone_lot_id, s.carat_per_piece, s.quantity))
            .collect();

        self.status = WorkOrderStatus::InProgress;
        self.current_stage = Some(issue.stage);
        self.current_weight = issue_weight;
        self.stages.push(record);
        self.touch();

        self.stages.last().ok_or(WorkflowError::NoOpenStage)
    }

    /// Record the jamah of the open stage and reconcile weight and stones.
    pub fn receive_stage(&mut self, receipt: StageReceipt, rules: &BusinessRules) -> Result<&StageRecord, WorkflowError> {
        self.ensure_active()?;

        let jamah = receipt.jamah_weight.round_dp(3);
        let metal_added = receipt.metal_added.round_dp(3);
        if jamah <= Decimal::ZERO {
            return Err(WorkflowError::Validation("jamah_weight must be positive".to_string()));
        }
        if metal_added < Decimal::ZERO {
            return Err(WorkflowError::Validation("metal_added cannot be negative".to_string()));
        }

        let index = self
            .stages
            .iter()
            .position(|s| s.is_open())
            .ok_or(WorkflowError::NoOpenStage)?;

        let (stones, stone_weight_added) = reconcile::settle_stones(&self.stages[index].stones, &receipt.stones)?;

        let record = &mut self.stages[index];
        let loss = reconcile::stage_loss(record.issue_weight, metal_added, stone_weight_added, jamah)?;
        let exceeds = rules
            .loss_tolerance_percent
            .for_stage(record.stage)
            .map(|limit| reconcile::loss_percent(loss, record.issue_weight) > limit)
            .unwrap_or(false);

        record.stones = stones;
        record.jamah_weight = Some(jamah);
        record.metal_added = metal_added;
        record.stone_weight_added = stone_weight_added;
        record.weight_loss = Some(loss);
        record.loss_exceeds_tolerance = exceeds;
        record.status = StageStatus::Received;
        record.received_at = Some(Utc::now());
        if receipt.note.is_some() {
            record.note = receipt.note;
        }

        self.current_weight = jamah;
        self.touch();

        Ok(&self.stages[index])
    }

    /// Move the open stage to another karigar. Returns the previous karigar.
    pub fn reassign_stage(&mut self, karigar_id: Uuid) -> Result<Option<Uuid>, WorkflowError> {
        self.ensure_active()?;

        let record = self
            .stages
            .iter_mut()
            .find(|s| s.is_open())
            .ok_or(WorkflowError::NoOpenStage)?;

        if record.karigar_id == Some(karigar_id) {
            return Err(WorkflowError::Validation("stage is already assigned to this karigar".to_string()));
        }

        let previous = record.karigar_id.replace(karigar_id);
        self.touch();
        Ok(previous)
    }

    /// Close the order by handing the finished piece out. Appends a DISPATCH record.
    pub fn dispatch(&mut self, reference: Option<String>, note: Option<String>) -> Result<&StageRecord, WorkflowError> {
        self.ensure_active()?;

        if let Some(open) = self.open_stage() {
            return Err(WorkflowError::StageOpen(open.stage.to_string()));
        }

        let from = self.last_received_stage();
        if !Stage::successors(from).contains(&Stage::Dispatch) {
            return Err(WorkflowError::InvalidTransition {
                from: from.map(|s| s.to_string()).unwrap_or_else(|| "NONE".to_string()),
                to: Stage::Dispatch.to_string(),
            });
        }

        let now = Utc::now();
        let mut record = StageRecord::new(self.id, self.next_sequence(), Stage::Dispatch, self.current_weight);
        record.status = StageStatus::Received;
        record.jamah_weight = Some(self.current_weight);
        record.weight_loss = Some(Decimal::ZERO);
        record.note = note;
        record.received_at = Some(now);

        self.status = WorkOrderStatus::Dispatched;
        self.current_stage = Some(Stage::Dispatch);
        self.dispatch_reference = reference;
        self.dispatched_at = Some(now);
        self.stages.push(record);
        self.touch();

        self.stages.last().ok_or(WorkflowError::NoOpenStage)
    }

    /// Cancel an order that has nothing out with a karigar.
    pub fn cancel(&mut self, reason: String) -> Result<(), WorkflowError> {
        self.ensure_active()?;

        if reason.trim().is_empty() {
            return Err(WorkflowError::Validation("a cancellation reason is required".to_string()));
        }
        if let Some(open) = self.open_stage() {
            return Err(WorkflowError::StageOpen(open.stage.to_string()));
        }

        self.status = WorkOrderStatus::Cancelled;
        self.cancellation_reason = Some(reason);
        self.touch();
        Ok(())
    }

    pub fn ensure_active(&self) -> Result<(), WorkflowError> {
        if self.status.is_closed() {
            return Err(WorkflowError::OrderClosed(self.status.to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum WorkflowError {
    #[error("Invalid stage transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Stage {0} is still open; record its jamah first")]
    StageOpen(String),

    #[error("No stage is open for this work order")]
    NoOpenStage,

    #[error("Work order is {0}")]
    OrderClosed(String),

    #[error("Stones cannot be issued into {0}")]
    StonesNotAllowed(String),

    #[error("Issue weight {requested} differs from current weight {expected} and adjustments are disabled")]
    IssueAdjustmentNotAllowed { expected: Decimal, requested: Decimal },

    #[error("Stone lot {lot}: {accounted} accounted for but {issued} issued")]
    StoneMismatch { lot: Uuid, issued: i32, accounted: i32 },

    #[error("No report for issued stone lot {0}")]
    MissingStoneReport(Uuid),

    #[error("Stone lot {0} was not issued with this stage")]
    UnknownStoneLine(Uuid),

    #[error("Jamah weight {jamah} exceeds the {expected} that went in")]
    WeightGain { expected: Decimal, jamah: Decimal },

    #[error("Karigar {0} is inactive")]
    KarigarInactive(String),

    #[error("Karigar {karigar} does not work {stage}")]
    KarigarNotQualified { karigar: String, stage: String },

    #[error("Validation failed: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewWorkOrder;
    use rust_decimal_macros::dec;

    fn new_order(weight: Decimal) -> WorkOrder {
        WorkOrder::create(NewWorkOrder {
            order_number: "WO-2001".to_string(),
            customer_name: "Anil Kapoor".to_string(),
            customer_phone: None,
            design_code: "BANGLE-07".to_string(),
            description: None,
            metal_purity: Some("22K".to_string()),
            initial_weight: weight,
            due_date: None,
        })
        .unwrap()
    }

    fn issue(stage: Stage) -> StageIssue {
        StageIssue {
            stage,
            karigar_id: Some(Uuid::new_v4()),
            issue_weight: None,
            stones: vec![],
            note: None,
        }
    }

    fn receipt(jamah: Decimal) -> StageReceipt {
        StageReceipt {
            jamah_weight: jamah,
            metal_added: Decimal::ZERO,
            stones: vec![],
            note: None,
        }
    }

    #[test]
    fn test_full_pipeline() {
        let rules = BusinessRules::default();
        let mut order = new_order(dec!(10.000));
        let lot = Uuid::new_v4();

        order.issue_stage(issue(Stage::Framing), &rules).unwrap();
        assert_eq!(order.status, WorkOrderStatus::InProgress);
        order.receive_stage(receipt(dec!(9.950)), &rules).unwrap();

        let mut setting = issue(Stage::Setting);
        setting.stones = vec![StoneIssue { stone_lot_id: lot, carat_per_piece: dec!(0.05), quantity: 20 }];
        order.issue_stage(setting, &rules).unwrap();
        assert_eq!(order.stages[1].issue_weight, dec!(9.950));

        let mut jamah = receipt(dec!(10.120));
        jamah.stones = vec![StoneReport { stone_lot_id: lot, set: 18, returned: 1, broken: 1 }];
        let record = order.receive_stage(jamah, &rules).unwrap();
        // 18 x 0.05 ct x 0.2 g = 0.18 g of stones
        assert_eq!(record.stone_weight_added, dec!(0.180));
        assert_eq!(record.weight_loss, Some(dec!(0.010)));
        assert!(!record.loss_exceeds_tolerance);

        order.issue_stage(issue(Stage::Polish), &rules).unwrap();
        order.receive_stage(receipt(dec!(10.000)), &rules).unwrap();

        let dispatch = order.dispatch(Some("CH-55".to_string()), None).unwrap();
        assert_eq!(dispatch.stage, Stage::Dispatch);
        assert_eq!(dispatch.sequence, 4);
        assert_eq!(order.status, WorkOrderStatus::Dispatched);
        assert_eq!(order.current_weight, dec!(10.000));
        assert!(order.dispatched_at.is_some());
    }

    #[test]
    fn test_first_stage_must_be_framing() {
        let mut order = new_order(dec!(5));
        let err = order.issue_stage(issue(Stage::Polish), &BusinessRules::default()).unwrap_err();
        assert_eq!(err, WorkflowError::InvalidTransition { from: "NONE".into(), to: "POLISH".into() });
    }

    #[test]
    fn test_only_one_open_stage() {
        let rules = BusinessRules::default();
        let mut order = new_order(dec!(5));
        order.issue_stage(issue(Stage::Framing), &rules).unwrap();
        let err = order.issue_stage(issue(Stage::Framing), &rules).unwrap_err();
        assert_eq!(err, WorkflowError::StageOpen("FRAMING".into()));
    }

    #[test]
    fn test_repair_loop_back_to_polish() {
        let rules = BusinessRules::default();
        let mut order = new_order(dec!(8));
        order.issue_stage(issue(Stage::Framing), &rules).unwrap();
        order.receive_stage(receipt(dec!(7.95)), &rules).unwrap();
        order.issue_stage(issue(Stage::Polish), &rules).unwrap();
        order.receive_stage(receipt(dec!(7.9)), &rules).unwrap();
        order.issue_stage(issue(Stage::Repair), &rules).unwrap();

        let mut jamah = receipt(dec!(7.98));
        jamah.metal_added = dec!(0.1);
        let record = order.receive_stage(jamah, &rules).unwrap();
        assert_eq!(record.weight_loss, Some(dec!(0.020)));

        // Repair cannot go straight to dispatch
        assert!(matches!(order.dispatch(None, None), Err(WorkflowError::InvalidTransition { .. })));
        order.issue_stage(issue(Stage::Polish), &rules).unwrap();
        order.receive_stage(receipt(dec!(7.96)), &rules).unwrap();
        assert!(order.dispatch(None, None).is_ok());
    }

    #[test]
    fn test_weights_rounding_to_zero_rejected() {
        let rules = BusinessRules::default();
        let mut order = new_order(dec!(5));
        let mut tiny = issue(Stage::Framing);
        tiny.issue_weight = Some(dec!(0.0004));
        assert!(matches!(order.issue_stage(tiny, &rules), Err(WorkflowError::Validation(_))));

        order.issue_stage(issue(Stage::Framing), &rules).unwrap();
        assert!(matches!(order.receive_stage(receipt(dec!(0.0004)), &rules), Err(WorkflowError::Validation(_))));
        assert!(order.stages[0].is_open());
    }

    #[test]
    fn test_dispatch_cannot_be_issued_as_stage() {
        let mut order = new_order(dec!(5));
        let err = order.issue_stage(issue(Stage::Dispatch), &BusinessRules::default()).unwrap_err();
        assert!(matches!(err, WorkflowError::Validation(_)));
    }

    #[test]
    fn test_stones_only_for_stone_stages() {
        let mut order = new_order(dec!(5));
        let mut framing = issue(Stage::Framing);
        framing.stones = vec![StoneIssue { stone_lot_id: Uuid::new_v4(), carat_per_piece: dec!(0.1), quantity: 2 }];
        let err = order.issue_stage(framing, &BusinessRules::default()).unwrap_err();
        assert_eq!(err, WorkflowError::StonesNotAllowed("FRAMING".into()));
    }

    #[test]
    fn test_duplicate_stone_lot_rejected() {
        let rules = BusinessRules::default();
        let mut order = new_order(dec!(5));
        order.issue_stage(issue(Stage::Framing), &rules).unwrap();
        order.receive_stage(receipt(dec!(5)), &rules).unwrap();

        let lot = Uuid::new_v4();
        let mut setting = issue(Stage::Setting);
        setting.stones = vec![
            StoneIssue { stone_lot_id: lot, carat_per_piece: dec!(0.1), quantity: 2 },
            StoneIssue { stone_lot_id: lot, carat_per_piece: dec!(0.1), quantity: 3 },
        ];
        assert!(matches!(order.issue_stage(setting, &rules), Err(WorkflowError::Validation(_))));
    }

    #[test]
    fn test_issue_adjustment_requires_rule() {
        let mut order = new_order(dec!(5));
        let mut framing = issue(Stage::Framing);
        framing.issue_weight = Some(dec!(5.5));

        let strict = BusinessRules::default();
        let err = order.issue_stage(framing.clone(), &strict).unwrap_err();
        assert_eq!(err, WorkflowError::IssueAdjustmentNotAllowed { expected: dec!(5), requested: dec!(5.5) });

        let lenient = BusinessRules { allow_issue_adjustment: true, ..BusinessRules::default() };
        let record = order.issue_stage(framing, &lenient).unwrap();
        assert_eq!(record.issue_adjustment, dec!(0.5));
        assert_eq!(order.current_weight, dec!(5.5));
    }

    #[test]
    fn test_weight_gain_rejected() {
        let rules = BusinessRules::default();
        let mut order = new_order(dec!(5));
        order.issue_stage(issue(Stage::Framing), &rules).unwrap();
        let err = order.receive_stage(receipt(dec!(5.2)), &rules).unwrap_err();
        assert_eq!(err, WorkflowError::WeightGain { expected: dec!(5), jamah: dec!(5.2) });
        assert!(order.open_stage().is_some());
    }

    #[test]
    fn test_loss_over_tolerance_is_flagged() {
        let rules = BusinessRules::default();
        let mut order = new_order(dec!(10));
        order.issue_stage(issue(Stage::Framing), &rules).unwrap();
        // 2% loss against a 1% framing tolerance
        let record = order.receive_stage(receipt(dec!(9.8)), &rules).unwrap();
        assert!(record.loss_exceeds_tolerance);
        assert_eq!(record.weight_loss, Some(dec!(0.200)));
    }

    #[test]
    fn test_receive_without_open_stage() {
        let mut order = new_order(dec!(5));
        assert_eq!(
            order.receive_stage(receipt(dec!(5)), &BusinessRules::default()).unwrap_err(),
            WorkflowError::NoOpenStage
        );
    }

    #[test]
    fn test_reassign_open_stage() {
        let rules = BusinessRules::default();
        let mut order = new_order(dec!(5));
        order.issue_stage(issue(Stage::Framing), &rules).unwrap();
        let first = order.stages[0].karigar_id;

        let other = Uuid::new_v4();
        let previous = order.reassign_stage(other).unwrap();
        assert_eq!(previous, first);
        assert_eq!(order.stages[0].karigar_id, Some(other));
        assert!(matches!(order.reassign_stage(other), Err(WorkflowError::Validation(_))));
    }

    #[test]
    fn test_cancel_rules() {
        let rules = BusinessRules::default();
        let mut order = new_order(dec!(5));
        order.issue_stage(issue(Stage::Framing), &rules).unwrap();
        assert_eq!(order.cancel("customer withdrew".into()).unwrap_err(), WorkflowError::StageOpen("FRAMING".into()));

        order.receive_stage(receipt(dec!(4.99)), &rules).unwrap();
        order.cancel("customer withdrew".into()).unwrap();
        assert_eq!(order.status, WorkOrderStatus::Cancelled);
        assert_eq!(
            order.issue_stage(issue(Stage::Setting), &rules).unwrap_err(),
            WorkflowError::OrderClosed("CANCELLED".into())
        );
    }
}
