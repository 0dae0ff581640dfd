use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// One metric carat is 200 mg.
pub const CARAT_IN_GRAMS: Decimal = Decimal::from_parts(2, 0, 0, false, 1);

/// A batch of identical stones held in the workshop safe.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoneLot {
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

impl StoneLot {
    pub fn new(
        lot_code: String,
        stone_type: String,
        shape: Option<String>,
        size_mm: Option<Decimal>,
        carat_per_piece: Decimal,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            lot_code,
            stone_type,
            shape,
            size_mm,
            carat_per_piece,
            quantity_on_hand: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Input for registering a lot.
#[derive(Debug, Clone, Deserialize)]
pub struct NewStoneLot {
    pub lot_code: String,
    pub stone_type: String,
    pub shape: Option<String>,
    pub size_mm: Option<Decimal>,
    pub carat_per_piece: Decimal,
    #[serde(default)]
    pub opening_quantity: i32,
}

impl NewStoneLot {
    pub fn into_lot(self) -> (StoneLot, i32) {
        let lot = StoneLot::new(
            self.lot_code.trim().to_string(),
            self.stone_type.trim().to_string(),
            self.shape,
            self.size_mm,
            self.carat_per_piece,
        );
        (lot, self.opening_quantity)
    }
}

pub fn stone_weight_grams(carat_per_piece: Decimal, pieces: i32) -> Decimal {
    (carat_per_piece * Decimal::from(pieces) * CARAT_IN_GRAMS).round_dp(3)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementKind {
    Receipt,
    Issue,
    Return,
    Broken,
}

impl MovementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementKind::Receipt => "RECEIPT",
            MovementKind::Issue => "ISSUE",
            MovementKind::Return => "RETURN",
            MovementKind::Broken => "BROKEN",
        }
    }
}

impl fmt::Display for MovementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MovementKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RECEIPT" => Ok(MovementKind::Receipt),
            "ISSUE" => Ok(MovementKind::Issue),
            "RETURN" => Ok(MovementKind::Return),
            "BROKEN" => Ok(MovementKind::Broken),
            other => Err(format!("unknown stone movement kind: {}", other)),
        }
    }
}

/// Journal line of the stone stock. Quantities are always positive; `kind` gives the direction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoneMovement {
    pub id: Uuid,
    pub stone_lot_id: Uuid,
    pub kind: MovementKind,
    pub quantity: i32,
    pub work_order_id: Option<Uuid>,
    pub stage_record_id: Option<Uuid>,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl StoneMovement {
    pub fn new(stone_lot_id: Uuid, kind: MovementKind, quantity: i32) -> Self {
        Self {
            id: Uuid::new_v4(),
            stone_lot_id,
            kind,
            quantity,
            work_order_id: None,
            stage_record_id: None,
            note: None,
            created_at: Utc::now(),
        }
    }

    pub fn for_stage(mut self, work_order_id: Uuid, stage_record_id: Uuid) -> Self {
        self.work_order_id = Some(work_order_id);
        self.stage_record_id = Some(stage_record_id);
        self
    }

    pub fn with_note(mut self, note: Option<String>) -> Self {
        self.note = note;
        self
    }

    /// Signed effect on `quantity_on_hand`.
    pub fn stock_delta(&self) -> i32 {
        match self.kind {
            MovementKind::Receipt | MovementKind::Return => self.quantity,
            MovementKind::Issue => -self.quantity,
            MovementKind::Broken => 0,
        }
    }
}
