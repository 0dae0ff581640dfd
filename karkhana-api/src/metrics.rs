use axum::{extract::State, http::header, response::IntoResponse};
use karkhana_order::StageRecord;
use prometheus::{CounterVec, Encoder, IntCounterVec, Opts, Registry, TextEncoder};
use rust_decimal::prelude::ToPrimitive;

use crate::error::AppError;
use crate::state::AppState;

/// Workshop counters exposed on `/metrics`.
pub struct Metrics {
    registry: Registry,
    stage_transitions: IntCounterVec,
    weight_loss_grams: CounterVec,
    loss_flags: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let stage_transitions = IntCounterVec::new(
            Opts::new("karkhana_stage_transitions_total", "Stage issues and receipts"),
            &["stage", "event"],
        )?;
        let weight_loss_grams = CounterVec::new(
            Opts::new("karkhana_weight_loss_grams_total", "Metal lost across received stages"),
            &["stage"],
        )?;
        let loss_flags = IntCounterVec::new(
            Opts::new("karkhana_loss_over_tolerance_total", "Received stages whose loss exceeded tolerance"),
            &["stage"],
        )?;

        registry.register(Box::new(stage_transitions.clone()))?;
        registry.register(Box::new(weight_loss_grams.clone()))?;
        registry.register(Box::new(loss_flags.clone()))?;

        Ok(Self {
            registry,
            stage_transitions,
            weight_loss_grams,
            loss_flags,
        })
    }

    pub fn stage_issued(&self, record: &StageRecord) {
        self.stage_transitions
            .with_label_values(&[record.stage.as_str(), "issued"])
            .inc();
    }

    pub fn stage_received(&self, record: &StageRecord) {
        let stage = record.stage.as_str();
        self.stage_transitions.with_label_values(&[stage, "received"]).inc();
        if let Some(loss) = record.weight_loss.and_then(|l| l.to_f64()) {
            if loss > 0.0 {
                self.weight_loss_grams.with_label_values(&[stage]).inc_by(loss);
            }
        }
        if record.loss_exceeds_tolerance {
            self.loss_flags.with_label_values(&[stage]).inc();
        }
    }

    pub fn dispatched(&self) {
        self.stage_transitions.with_label_values(&["DISPATCH", "dispatched"]).inc();
    }

    pub fn render(&self) -> Result<String, AppError> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| AppError::InternalServerError(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| AppError::InternalServerError(e.to_string()))
    }
}

pub async fn metrics_handler(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let body = state.metrics.render()?;
    Ok(([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body))
}
