use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;
use uuid::Uuid;

use karkhana_core::repository::RepositoryError;
use karkhana_order::{AuditEntry, Karigar, Stage, StageRecord, StageStoneLine, WorkOrder};
use karkhana_shared::Masked;
use karkhana_stones::StoneLot;

fn parse<T: FromStr<Err = String>>(raw: &str) -> Result<T, RepositoryError> {
    raw.parse().map_err(RepositoryError::Corrupt)
}

#[derive(sqlx::FromRow)]
pub(crate) struct WorkOrderRow {
    pub id: Uuid,
    pub order_number: String,
    pub customer_name: String,
    pub customer_phone: Option<String>,
    pub design_code: String,
    pub description: Option<String>,
    pub metal_purity: Option<String>,
    pub initial_weight: Decimal,
    pub current_weight: Decimal,
    pub status: String,
    pub current_stage: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub dispatch_reference: Option<String>,
    pub cancellation_reason: Option<String>,
    pub dispatched_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
}

impl WorkOrderRow {
    pub fn into_order(self, stages: Vec<StageRecord>) -> Result<WorkOrder, RepositoryError> {
        Ok(WorkOrder {
            id: self.id,
            order_number: self.order_number,
            customer_name: self.customer_name,
            customer_phone: self.customer_phone.map(Masked::new),
            design_code: self.design_code,
            description: self.description,
            metal_purity: self.metal_purity,
            initial_weight: self.initial_weight,
            current_weight: self.current_weight,
            status: parse(&self.status)?,
            current_stage: self.current_stage.as_deref().map(parse).transpose()?,
            due_date: self.due_date,
            stages,
            dispatch_reference: self.dispatch_reference,
            cancellation_reason: self.cancellation_reason,
            dispatched_at: self.dispatched_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
            version: self.version,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct StageRow {
    pub id: Uuid,
    pub work_order_id: Uuid,
    pub sequence: i32,
    pub stage: String,
    pub status: String,
    pub karigar_id: Option<Uuid>,
    pub issue_weight: Decimal,
    pub issue_adjustment: Decimal,
    pub jamah_weight: Option<Decimal>,
    pub metal_added: Decimal,
    pub stone_weight_added: Decimal,
    pub weight_loss: Option<Decimal>,
    pub loss_exceeds_tolerance: bool,
    pub note: Option<String>,
    pub issued_at: DateTime<Utc>,
    pub received_at: Option<DateTime<Utc>>,
}

#[derive(sqlx::FromRow)]
pub(crate) struct StageStoneRow {
    pub stage_record_id: Uuid,
    pub stone_lot_id: Uuid,
    pub carat_per_piece: Decimal,
    pub issued: i32,
    pub set_count: i32,
    pub returned: i32,
    pub broken: i32,
}

pub(crate) const STAGE_COLUMNS: &str = "id, work_order_id, sequence, stage, status, karigar_id, issue_weight, \
     issue_adjustment, jamah_weight, metal_added, stone_weight_added, weight_loss, loss_exceeds_tolerance, \
     note, issued_at, received_at";

/// Attach stone lines to their stage rows, keeping the row order.
pub(crate) fn assemble_stages(
    rows: Vec<StageRow>,
    stones: Vec<StageStoneRow>,
) -> Result<Vec<StageRecord>, RepositoryError> {
    let mut stones = stones;
    rows.into_iter()
        .map(|row| {
            let (mine, rest): (Vec<_>, Vec<_>) = stones.drain(..).partition(|s| s.stage_record_id == row.id);
            stones = rest;
            Ok(StageRecord {
                id: row.id,
                work_order_id: row.work_order_id,
                sequence: row.sequence,
                stage: parse(&row.stage)?,
                status: parse(&row.status)?,
                karigar_id: row.karigar_id,
                issue_weight: row.issue_weight,
                issue_adjustment: row.issue_adjustment,
                jamah_weight: row.jamah_weight,
                metal_added: row.metal_added,
                stone_weight_added: row.stone_weight_added,
                weight_loss: row.weight_loss,
                loss_exceeds_tolerance: row.loss_exceeds_tolerance,
                stones: mine
                    .into_iter()
                    .map(|s| StageStoneLine {
                        stone_lot_id: s.stone_lot_id,
                        carat_per_piece: s.carat_per_piece,
                        issued: s.issued,
                        set: s.set_count,
                        returned: s.returned,
                        broken: s.broken,
                    })
                    .collect(),
                note: row.note,
                issued_at: row.issued_at,
                received_at: row.received_at,
            })
        })
        .collect()
}

#[derive(sqlx::FromRow)]
pub(crate) struct AuditRow {
    pub id: Uuid,
    pub work_order_id: Uuid,
    pub action: String,
    pub before_state: Option<Value>,
    pub after_state: Option<Value>,
    pub actor: String,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<AuditRow> for AuditEntry {
    type Error = RepositoryError;

    fn try_from(row: AuditRow) -> Result<Self, Self::Error> {
        Ok(AuditEntry {
            id: row.id,
            work_order_id: row.work_order_id,
            action: parse(&row.action)?,
            before: row.before_state,
            after: row.after_state,
            actor: row.actor,
            note: row.note,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct KarigarRow {
    pub id: Uuid,
    pub name: String,
    pub phone: Option<String>,
    pub specialities: Vec<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<KarigarRow> for Karigar {
    type Error = RepositoryError;

    fn try_from(row: KarigarRow) -> Result<Self, Self::Error> {
        let specialities = row
            .specialities
            .iter()
            .map(|s| parse::<Stage>(s))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Karigar {
            id: row.id,
            name: row.name,
            phone: row.phone.map(Masked::new),
            specialities,
            is_active: row.is_active,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct StoneLotRow {
    pub id: Uuid,
    pub lot_code: String,
    pub stone_type: String,
    pub shape: Option<String>,
    pub size_mm: Option<Decimal>,
    pub carat_per_piece: Decimal,
    pub quantity_on_hand: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<StoneLotRow> for StoneLot {
    fn from(row: StoneLotRow) -> Self {
        StoneLot {
            id: row.id,
            lot_code: row.lot_code,
            stone_type: row.stone_type,
            shape: row.shape,
            size_mm: row.size_mm,
            carat_per_piece: row.carat_per_piece,
            quantity_on_hand: row.quantity_on_hand,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

pub(crate) const STONE_LOT_COLUMNS: &str =
    "id, lot_code, stone_type, shape, size_mm, carat_per_piece, quantity_on_hand, created_at, updated_at";

#[cfg(test)]
mod tests {
    use super::*;
    use karkhana_order::StageStatus;
    use rust_decimal_macros::dec;

    fn stage_row(id: Uuid, sequence: i32, stage: &str, status: &str) -> StageRow {
        StageRow {
            id,
            work_order_id: Uuid::nil(),
            sequence,
            stage: stage.to_string(),
            status: status.to_string(),
            karigar_id: None,
            issue_weight: dec!(5),
            issue_adjustment: dec!(0),
            jamah_weight: None,
            metal_added: dec!(0),
            stone_weight_added: dec!(0),
            weight_loss: None,
            loss_exceeds_tolerance: false,
            note: None,
            issued_at: Utc::now(),
            received_at: None,
        }
    }

    #[test]
    fn test_stone_lines_land_on_their_stage() {
        let (framing, setting) = (Uuid::new_v4(), Uuid::new_v4());
        let lot = Uuid::new_v4();
        let stages = assemble_stages(
            vec![stage_row(framing, 1, "FRAMING", "RECEIVED"), stage_row(setting, 2, "SETTING", "ISSUED")],
            vec![StageStoneRow {
                stage_record_id: setting,
                stone_lot_id: lot,
                carat_per_piece: dec!(0.05),
                issued: 8,
                set_count: 0,
                returned: 0,
                broken: 0,
            }],
        )
        .unwrap();

        assert!(stages[0].stones.is_empty());
        assert_eq!(stages[1].stones.len(), 1);
        assert_eq!(stages[1].status, StageStatus::Issued);
        assert_eq!(stages[1].stage, Stage::Setting);
    }

    #[test]
    fn test_unknown_stage_is_corrupt() {
        let err = assemble_stages(vec![stage_row(Uuid::new_v4(), 1, "GILDING", "ISSUED")], vec![]).unwrap_err();
        assert!(matches!(err, RepositoryError::Corrupt(_)));
    }
}
