use crate::lot::{MovementKind, StoneLot, StoneMovement};
use chrono::Utc;
use std::collections::HashMap;
use uuid::Uuid;

/// In-memory stone stock with its movement journal.
///
/// Every change goes through [`StockLedger::apply`], which refuses any movement that would
/// drive `quantity_on_hand` below zero.
#[derive(Debug, Default, Clone)]
pub struct StockLedger {
    lots: HashMap<Uuid, StoneLot>,
    journal: Vec<StoneMovement>,
}

impl StockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new lot with its opening quantity (journalled as a receipt).
    pub fn register(&mut self, lot: StoneLot, opening_quantity: i32) -> Result<&StoneLot, StockError> {
        validate_lot(&lot)?;
        if opening_quantity < 0 {
            return Err(StockError::InvalidQuantity(opening_quantity));
        }
        if self.lots.values().any(|l| l.lot_code == lot.lot_code) {
            return Err(StockError::DuplicateLotCode(lot.lot_code));
        }

        let lot_id = lot.id;
        self.lots.insert(lot_id, StoneLot { quantity_on_hand: 0, ..lot });
        if opening_quantity > 0 {
            self.apply(StoneMovement::new(lot_id, MovementKind::Receipt, opening_quantity))?;
        }
        self.get(&lot_id).ok_or_else(|| StockError::NotFound(lot_id.to_string()))
    }

    pub fn get(&self, lot_id: &Uuid) -> Option<&StoneLot> {
        self.lots.get(lot_id)
    }

    /// Stones bought or brought in by the customer.
    pub fn receive(&mut self, lot_id: &Uuid, quantity: i32, note: Option<String>) -> Result<&StoneLot, StockError> {
        if quantity <= 0 {
            return Err(StockError::InvalidQuantity(quantity));
        }
        self.apply(StoneMovement::new(*lot_id, MovementKind::Receipt, quantity).with_note(note))
    }

    /// Post one journal line and update the lot it touches.
    pub fn apply(&mut self, movement: StoneMovement) -> Result<&StoneLot, StockError> {
        if movement.quantity <= 0 {
            return Err(StockError::InvalidQuantity(movement.quantity));
        }
        let lot = self.lots.get_mut(&movement.stone_lot_id)
            .ok_or_else(|| StockError::NotFound(movement.stone_lot_id.to_string()))?;

        let new_quantity = lot.quantity_on_hand + movement.stock_delta();
        if new_quantity < 0 {
            return Err(StockError::InsufficientStock {
                lot_code: lot.lot_code.clone(),
                requested: movement.quantity,
                available: lot.quantity_on_hand,
            });
        }

        lot.quantity_on_hand = new_quantity;
        lot.updated_at = Utc::now();
        let lot_id = movement.stone_lot_id;
        self.journal.push(movement);

        self.lots.get(&lot_id).ok_or_else(|| StockError::NotFound(lot_id.to_string()))
    }

    /// Check a batch of movements up front so that either all of them post or none do.
    pub fn apply_all(&mut self, movements: Vec<StoneMovement>) -> Result<(), StockError> {
        let mut projected: HashMap<Uuid, i32> = HashMap::new();
        for movement in &movements {
            if movement.quantity <= 0 {
                return Err(StockError::InvalidQuantity(movement.quantity));
            }
            let lot = self.lots.get(&movement.stone_lot_id)
                .ok_or_else(|| StockError::NotFound(movement.stone_lot_id.to_string()))?;
            let on_hand = projected.entry(lot.id).or_insert(lot.quantity_on_hand);
            if *on_hand + movement.stock_delta() < 0 {
                return Err(StockError::InsufficientStock {
                    lot_code: lot.lot_code.clone(),
                    requested: movement.quantity,
                    available: *on_hand,
                });
            }
            *on_hand += movement.stock_delta();
        }

        for movement in movements {
            self.apply(movement)?;
        }
        Ok(())
    }

    pub fn movements_for(&self, lot_id: &Uuid) -> Vec<&StoneMovement> {
        self.journal.iter().filter(|m| m.stone_lot_id == *lot_id).collect()
    }
}

pub fn validate_lot(lot: &StoneLot) -> Result<(), StockError> {
    if lot.lot_code.trim().is_empty() {
        return Err(StockError::Invalid("lot_code is required".to_string()));
    }
    if lot.stone_type.trim().is_empty() {
        return Err(StockError::Invalid("stone_type is required".to_string()));
    }
    if lot.carat_per_piece <= rust_decimal::Decimal::ZERO {
        return Err(StockError::Invalid("carat_per_piece must be positive".to_string()));
    }
    Ok(())
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum StockError {
    #[error("Stone lot not found: {0}")]
    NotFound(String),

    #[error("Stone lot code already exists: {0}")]
    DuplicateLotCode(String),

    #[error("Invalid stone quantity: {0}")]
    InvalidQuantity(i32),

    #[error("Invalid stone lot: {0}")]
    Invalid(String),

    #[error("Insufficient stones in lot {lot_code}: requested {requested}, available {available}")]
    InsufficientStock {
        lot_code: String,
        requested: i32,
        available: i32,
    },
}
