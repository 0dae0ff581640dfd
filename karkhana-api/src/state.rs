use std::sync::Arc;

use karkhana_core::WorkshopService;

use crate::metrics::Metrics;

#[derive(Clone)]
pub struct AppState {
    pub workshop: Arc<WorkshopService>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(workshop: WorkshopService) -> Result<Self, prometheus::Error> {
        Ok(Self {
            workshop: Arc::new(workshop),
            metrics: Arc::new(Metrics::new()?),
        })
    }
}
