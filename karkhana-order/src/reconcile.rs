//! Weight and stone reconciliation for work orders and karigars.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use uuid::Uuid;

use karkhana_stones::lot::stone_weight_grams;

use crate::models::{Stage, StageRecord, StageStatus, StageStoneLine, WorkOrder, WorkOrderStatus};
use crate::pipeline::{StoneReport, WorkflowError};

/// Metal lost in a stage: everything that went in minus the jamah.
pub fn stage_loss(
    issue_weight: Decimal,
    metal_added: Decimal,
    stone_weight_added: Decimal,
    jamah_weight: Decimal,
) -> Result<Decimal, WorkflowError> {
    let expected = issue_weight + metal_added + stone_weight_added;
    let loss = (expected - jamah_weight).round_dp(3);
    if loss < Decimal::ZERO {
        return Err(WorkflowError::WeightGain {
            expected,
            jamah: jamah_weight,
        });
    }
    Ok(loss)
}

pub fn loss_percent(loss: Decimal, issue_weight: Decimal) -> Decimal {
    if issue_weight.is_zero() {
        return Decimal::ZERO;
    }
    (loss / issue_weight * Decimal::ONE_HUNDRED).round_dp(3)
}

/// Match the karigar's report against the issued stone lines.
///
/// Every issued line needs exactly one report and `set + returned + broken` must equal the
/// issued count. Returns the settled lines and the weight the set stones add, in grams.
pub fn settle_stones(
    lines: &[StageStoneLine],
    reports: &[StoneReport],
) -> Result<(Vec<StageStoneLine>, Decimal), WorkflowError> {
    let mut seen = HashSet::new();
    for report in reports {
        if !lines.iter().any(|l| l.stone_lot_id == report.stone_lot_id) {
            return Err(WorkflowError::UnknownStoneLine(report.stone_lot_id));
        }
        if !seen.insert(report.stone_lot_id) {
            return Err(WorkflowError::Validation(format!(
                "stone lot {} reported more than once",
                report.stone_lot_id
            )));
        }
        if report.set < 0 || report.returned < 0 || report.broken < 0 {
            return Err(WorkflowError::Validation(format!(
                "stone counts for lot {} cannot be negative",
                report.stone_lot_id
            )));
        }
    }

    let mut settled = Vec::with_capacity(lines.len());
    let mut weight = Decimal::ZERO;
    for line in lines {
        let report = reports
            .iter()
            .find(|r| r.stone_lot_id == line.stone_lot_id)
            .ok_or(WorkflowError::MissingStoneReport(line.stone_lot_id))?;

        let settled_line = StageStoneLine {
            set: report.set,
            returned: report.returned,
            broken: report.broken,
            ..line.clone()
        };
        let accounted = settled_line.accounted().ok_or_else(|| {
            WorkflowError::Validation(format!("stone counts for lot {} are out of range", line.stone_lot_id))
        })?;
        if accounted != line.issued {
            return Err(WorkflowError::StoneMismatch {
                lot: line.stone_lot_id,
                issued: line.issued,
                accounted,
            });
        }

        weight += stone_weight_grams(line.carat_per_piece, report.set);
        settled.push(settled_line);
    }

    Ok((settled, weight.round_dp(3)))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageWeightRow {
    pub sequence: i32,
    pub stage: Stage,
    pub status: StageStatus,
    pub karigar_id: Option<Uuid>,
    pub issue_weight: Decimal,
    pub issue_adjustment: Decimal,
    pub metal_added: Decimal,
    pub stone_weight_added: Decimal,
    pub jamah_weight: Option<Decimal>,
    pub weight_loss: Option<Decimal>,
    pub loss_percent: Option<Decimal>,
    pub loss_exceeds_tolerance: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WeightSummary {
    pub initial_weight: Decimal,
    pub current_weight: Decimal,
    pub total_loss: Decimal,
    pub total_metal_added: Decimal,
    pub total_stone_weight_added: Decimal,
    pub total_issue_adjustment: Decimal,
    /// `initial + adjustments + metal + stones - loss` equals the current weight.
    pub balanced: bool,
    pub stages: Vec<StageWeightRow>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoneBalance {
    pub stone_lot_id: Uuid,
    pub issued: i32,
    pub set: i32,
    pub returned: i32,
    pub broken: i32,
    /// Still with a karigar on the open stage.
    pub outstanding: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reconciliation {
    pub work_order_id: Uuid,
    pub order_number: String,
    pub status: WorkOrderStatus,
    pub weights: WeightSummary,
    pub stones: Vec<StoneBalance>,
}

pub fn weight_summary(order: &WorkOrder) -> WeightSummary {
    let mut summary = WeightSummary {
        initial_weight: order.initial_weight,
        current_weight: order.current_weight,
        total_loss: Decimal::ZERO,
        total_metal_added: Decimal::ZERO,
        total_stone_weight_added: Decimal::ZERO,
        total_issue_adjustment: Decimal::ZERO,
        balanced: false,
        stages: Vec::with_capacity(order.stages.len()),
    };

    for record in &order.stages {
        summary.total_issue_adjustment += record.issue_adjustment;
        if record.status == StageStatus::Received {
            summary.total_loss += record.weight_loss.unwrap_or_default();
            summary.total_metal_added += record.metal_added;
            summary.total_stone_weight_added += record.stone_weight_added;
        }
        summary.stages.push(StageWeightRow {
            sequence: record.sequence,
            stage: record.stage,
            status: record.status,
            karigar_id: record.karigar_id,
            issue_weight: record.issue_weight,
            issue_adjustment: record.issue_adjustment,
            metal_added: record.metal_added,
            stone_weight_added: record.stone_weight_added,
            jamah_weight: record.jamah_weight,
            weight_loss: record.weight_loss,
            loss_percent: record.weight_loss.map(|loss| loss_percent(loss, record.issue_weight)),
            loss_exceeds_tolerance: record.loss_exceeds_tolerance,
        });
    }

    let expected = order.initial_weight + summary.total_issue_adjustment + summary.total_metal_added
        + summary.total_stone_weight_added
        - summary.total_loss;
    summary.balanced = expected == order.current_weight;
    summary
}

pub fn stone_balances(order: &WorkOrder) -> Vec<StoneBalance> {
    let mut balances: BTreeMap<Uuid, StoneBalance> = BTreeMap::new();
    for record in &order.stages {
        for line in &record.stones {
            let balance = balances.entry(line.stone_lot_id).or_insert(StoneBalance {
                stone_lot_id: line.stone_lot_id,
                issued: 0,
                set: 0,
                returned: 0,
                broken: 0,
                outstanding: 0,
            });
            balance.issued += line.issued;
            if record.is_open() {
                balance.outstanding += line.issued;
            } else {
                balance.set += line.set;
                balance.returned += line.returned;
                balance.broken += line.broken;
            }
        }
    }
    balances.into_values().collect()
}

pub fn reconcile(order: &WorkOrder) -> Reconciliation {
    Reconciliation {
        work_order_id: order.id,
        order_number: order.order_number.clone(),
        status: order.status,
        weights: weight_summary(order),
        stones: stone_balances(order),
    }
}

/// What one karigar currently holds across all open stages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KarigarBalance {
    pub karigar_id: Uuid,
    pub open_stages: usize,
    pub metal_held: Decimal,
    pub stones_held: i32,
    pub work_order_ids: Vec<Uuid>,
}

pub fn karigar_balance(karigar_id: Uuid, stages: &[StageRecord]) -> KarigarBalance {
    let held: Vec<&StageRecord> = stages
        .iter()
        .filter(|s| s.is_open() && s.karigar_id == Some(karigar_id))
        .collect();

    let mut work_order_ids: Vec<Uuid> = held.iter().map(|s| s.work_order_id).collect();
    work_order_ids.sort();
    work_order_ids.dedup();

    KarigarBalance {
        karigar_id,
        open_stages: held.len(),
        metal_held: held.iter().map(|s| s.issue_weight).sum(),
        stones_held: held.iter().map(|s| s.stones_issued()).sum(),
        work_order_ids,
    }
}
