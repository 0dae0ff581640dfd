use karkhana_order::BusinessRules;
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Clone)]
pub struct DbClient {
    pub pool: Pool<Postgres>,
}

#[derive(sqlx::FromRow)]
struct RuleRow {
    rule_key: String,
    rule_value: Value,
}

impl DbClient {
    pub async fn new(connection_string: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(3))
            .connect(connection_string)
            .await?;

        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        info!("Running database migrations...");
        sqlx::migrate!("../migrations").run(&self.pool).await?;
        info!("Migrations completed successfully.");
        Ok(())
    }

    /// Overlay the `business_rules` table on the configured defaults.
    pub async fn fetch_business_rules(&self, defaults: BusinessRules) -> Result<BusinessRules, sqlx::Error> {
        let rows: Vec<RuleRow> = sqlx::query_as("SELECT rule_key, rule_value FROM business_rules")
            .fetch_all(&self.pool)
            .await?;

        let mut rules = defaults;
        for row in rows {
            apply_rule(&mut rules, &row.rule_key, &row.rule_value);
        }
        Ok(rules)
    }
}

/// Expected format: `{"value": <bool/number/string>}`. Unknown keys and bad values are skipped.
fn apply_rule(rules: &mut BusinessRules, key: &str, raw: &Value) {
    let Some(v) = raw.get("value") else {
        warn!("Business rule {} has no value", key);
        return;
    };

    if key == "allow_issue_adjustment" {
        if let Some(b) = v.as_bool() {
            rules.allow_issue_adjustment = b;
        }
        return;
    }

    let tolerance = &mut rules.loss_tolerance_percent;
    let slot = match key {
        "loss_tolerance_framing" => &mut tolerance.framing,
        "loss_tolerance_setting" => &mut tolerance.setting,
        "loss_tolerance_polish" => &mut tolerance.polish,
        "loss_tolerance_repair" => &mut tolerance.repair,
        _ => return,
    };
    match as_decimal(v) {
        Some(d) if d >= Decimal::ZERO => *slot = d,
        _ => warn!("Ignoring business rule {} = {}", key, v),
    }
}

fn as_decimal(v: &Value) -> Option<Decimal> {
    match v {
        Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        Value::String(s) => Decimal::from_str(s).ok(),
        _ => None,
    }
}
