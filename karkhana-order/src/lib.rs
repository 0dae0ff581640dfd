pub mod models;
pub mod pipeline;
pub mod reconcile;
pub mod changes;
pub mod karigar;

pub use models::{NewWorkOrder, Stage, StageRecord, StageStatus, StageStoneLine, WorkOrder, WorkOrderStatus};
pub use pipeline::{BusinessRules, LossTolerance, StageIssue, StageReceipt, StoneIssue, StoneReport, WorkflowError};
pub use reconcile::{KarigarBalance, Reconciliation};
pub use changes::{AuditAction, AuditEntry, AuditTrail};
pub use karigar::{Karigar, NewKarigar};
