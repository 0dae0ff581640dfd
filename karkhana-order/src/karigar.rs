use chrono::{DateTime, Utc};
use karkhana_shared::Masked;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Stage;
use crate::pipeline::WorkflowError;

/// An artisan metal and stones are issued to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Karigar {
    pub id: Uuid,
    pub name: String,
    pub phone: Option<Masked<String>>,
    /// Empty means the karigar takes any stage.
    pub specialities: Vec<Stage>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewKarigar {
    pub name: String,
    pub phone: Option<Masked<String>>,
    #[serde(default)]
    pub specialities: Vec<Stage>,
}

impl Karigar {
    pub fn register(input: NewKarigar) -> Result<Self, WorkflowError> {
        if input.name.trim().is_empty() {
            return Err(WorkflowError::Validation("karigar name is required".to_string()));
        }
        if input.specialities.contains(&Stage::Dispatch) {
            return Err(WorkflowError::Validation("dispatch is not a karigar speciality".to_string()));
        }

        let mut specialities: Vec<Stage> = Vec::with_capacity(input.specialities.len());
        for stage in input.specialities {
            if !specialities.contains(&stage) {
                specialities.push(stage);
            }
        }

        Ok(Self {
            id: Uuid::new_v4(),
            name: input.name.trim().to_string(),
            phone: input.phone,
            specialities,
            is_active: true,
            created_at: Utc::now(),
        })
    }

    pub fn check_assignable(&self, stage: Stage) -> Result<(), WorkflowError> {
        if !self.is_active {
            return Err(WorkflowError::KarigarInactive(self.name.clone()));
        }
        if !self.specialities.is_empty() && !self.specialities.contains(&stage) {
            return Err(WorkflowError::KarigarNotQualified {
                karigar: self.name.clone(),
                stage: stage.to_string(),
            });
        }
        Ok(())
    }
}
