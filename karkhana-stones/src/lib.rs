pub mod lot;
pub mod inventory;

pub use lot::{MovementKind, NewStoneLot, StoneLot, StoneMovement, CARAT_IN_GRAMS};
pub use inventory::{validate_lot, StockError, StockLedger};
