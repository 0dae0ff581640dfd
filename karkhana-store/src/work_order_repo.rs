use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use karkhana_core::repository::{stone_movements_for, RepoResult, RepositoryError, WorkOrderRepository};
use karkhana_order::{AuditEntry, StageRecord, WorkOrder};
use karkhana_stones::StoneMovement;

use crate::rows::{assemble_stages, AuditRow, StageRow, StageStoneRow, WorkOrderRow, STAGE_COLUMNS};
use crate::stone_repo::journal;
use crate::storage_error;

pub struct StoreWorkOrderRepository {
    pool: PgPool,
}

impl StoreWorkOrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

async fn insert_audit(tx: &mut Transaction<'_, Postgres>, audit: &AuditEntry) -> RepoResult<()> {
    sqlx::query(
        r#"
        INSERT INTO audit_entries (id, work_order_id, action, before_state, after_state, actor, note, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(audit.id)
    .bind(audit.work_order_id)
    .bind(audit.action.as_str())
    .bind(&audit.before)
    .bind(&audit.after)
    .bind(&audit.actor)
    .bind(&audit.note)
    .bind(audit.created_at)
    .execute(&mut **tx)
    .await
    .map_err(storage_error)?;
    Ok(())
}

/// Write the order header if the stored version still matches. The row lock taken here
/// serializes writers on the same order for the rest of the transaction.
async fn update_header(tx: &mut Transaction<'_, Postgres>, order: &WorkOrder, expected_version: i64) -> RepoResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE work_orders
        SET current_weight = $2, status = $3, current_stage = $4, dispatch_reference = $5,
            cancellation_reason = $6, dispatched_at = $7, updated_at = $8, version = $9
        WHERE id = $1 AND version = $10
        "#,
    )
    .bind(order.id)
    .bind(order.current_weight)
    .bind(order.status.as_str())
    .bind(order.current_stage.map(|s| s.as_str()))
    .bind(&order.dispatch_reference)
    .bind(&order.cancellation_reason)
    .bind(order.dispatched_at)
    .bind(order.updated_at)
    .bind(order.version)
    .bind(expected_version)
    .execute(&mut **tx)
    .await
    .map_err(storage_error)?;

    if result.rows_affected() == 0 {
        return Err(RepositoryError::Conflict(format!(
            "work order {} changed concurrently",
            order.order_number
        )));
    }
    Ok(())
}

/// Post stock movements. Issues only go through while the lot still has the pieces.
async fn post_movements(tx: &mut Transaction<'_, Postgres>, movements: Vec<StoneMovement>) -> RepoResult<()> {
    for movement in movements {
        let delta = movement.stock_delta();
        let updated = sqlx::query(
            r#"
            UPDATE stone_lots
            SET quantity_on_hand = quantity_on_hand + $2, updated_at = NOW()
            WHERE id = $1 AND quantity_on_hand + $2 >= 0
            "#,
        )
        .bind(movement.stone_lot_id)
        .bind(delta)
        .execute(&mut **tx)
        .await
        .map_err(storage_error)?;

        if updated.rows_affected() == 0 {
            return Err(RepositoryError::Conflict(format!(
                "stone lot {} cannot cover {} pieces",
                movement.stone_lot_id, movement.quantity
            )));
        }

        journal(tx, &movement).await?;
    }
    Ok(())
}

#[async_trait]
impl WorkOrderRepository for StoreWorkOrderRepository {
    async fn create_work_order(&self, order: &WorkOrder, audit: &AuditEntry) -> RepoResult<()> {
        let mut tx = self.pool.begin().await.map_err(storage_error)?;

        sqlx::query(
            r#"
            INSERT INTO work_orders (id, order_number, customer_name, customer_phone, design_code, description,
                metal_purity, initial_weight, current_weight, status, current_stage, due_date, created_at, updated_at, version)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(order.id)
        .bind(&order.order_number)
        .bind(&order.customer_name)
        .bind(order.customer_phone.as_ref().map(|p| p.expose().as_str()))
        .bind(&order.design_code)
        .bind(&order.description)
        .bind(&order.metal_purity)
        .bind(order.initial_weight)
        .bind(order.current_weight)
        .bind(order.status.as_str())
        .bind(order.current_stage.map(|s| s.as_str()))
        .bind(order.due_date)
        .bind(order.created_at)
        .bind(order.updated_at)
        .bind(order.version)
        .execute(&mut *tx)
        .await
        .map_err(|e| match storage_error(e) {
            RepositoryError::Conflict(_) => {
                RepositoryError::Conflict(format!("work order number {} already exists", order.order_number))
            }
            other => other,
        })?;

        insert_audit(&mut tx, audit).await?;
        tx.commit().await.map_err(storage_error)?;
        Ok(())
    }

    async fn get_work_order(&self, id: Uuid) -> RepoResult<Option<WorkOrder>> {
        let row: Option<WorkOrderRow> = sqlx::query_as(
            r#"
            SELECT id, order_number, customer_name, customer_phone, design_code, description, metal_purity,
                initial_weight, current_weight, status, current_stage, due_date, dispatch_reference,
                cancellation_reason, dispatched_at, created_at, updated_at, version
            FROM work_orders WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let stage_rows: Vec<StageRow> = sqlx::query_as(&format!(
            "SELECT {} FROM stage_records WHERE work_order_id = $1 ORDER BY sequence",
            STAGE_COLUMNS
        ))
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        let stone_rows: Vec<StageStoneRow> = sqlx::query_as(
            r#"
            SELECT ss.stage_record_id, ss.stone_lot_id, ss.carat_per_piece, ss.issued, ss.set_count, ss.returned, ss.broken
            FROM stage_stones ss
            JOIN stage_records sr ON sr.id = ss.stage_record_id
            WHERE sr.work_order_id = $1
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        let stages = assemble_stages(stage_rows, stone_rows)?;
        Ok(Some(row.into_order(stages)?))
    }

    async fn insert_stage(
        &self,
        order: &WorkOrder,
        expected_version: i64,
        stage: &StageRecord,
        audit: &AuditEntry,
    ) -> RepoResult<()> {
        let mut tx = self.pool.begin().await.map_err(storage_error)?;
        update_header(&mut tx, order, expected_version).await?;

        // Unique (work_order_id, sequence) and the one-open-stage index reject a concurrent issue.
        sqlx::query(
            r#"
            INSERT INTO stage_records (id, work_order_id, sequence, stage, status, karigar_id, issue_weight,
                issue_adjustment, jamah_weight, metal_added, stone_weight_added, weight_loss,
                loss_exceeds_tolerance, note, issued_at, received_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(stage.id)
        .bind(stage.work_order_id)
        .bind(stage.sequence)
        .bind(stage.stage.as_str())
        .bind(stage.status.as_str())
        .bind(stage.karigar_id)
        .bind(stage.issue_weight)
        .bind(stage.issue_adjustment)
        .bind(stage.jamah_weight)
        .bind(stage.metal_added)
        .bind(stage.stone_weight_added)
        .bind(stage.weight_loss)
        .bind(stage.loss_exceeds_tolerance)
        .bind(&stage.note)
        .bind(stage.issued_at)
        .bind(stage.received_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| match storage_error(e) {
            RepositoryError::Conflict(_) => {
                RepositoryError::Conflict(format!("work order {} changed concurrently", order.order_number))
            }
            other => other,
        })?;

        for line in &stage.stones {
            sqlx::query(
                r#"
                INSERT INTO stage_stones (stage_record_id, stone_lot_id, carat_per_piece, issued, set_count, returned, broken)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(stage.id)
            .bind(line.stone_lot_id)
            .bind(line.carat_per_piece)
            .bind(line.issued)
            .bind(line.set)
            .bind(line.returned)
            .bind(line.broken)
            .execute(&mut *tx)
            .await
            .map_err(storage_error)?;
        }

        post_movements(&mut tx, stone_movements_for(stage)).await?;
        insert_audit(&mut tx, audit).await?;
        tx.commit().await.map_err(storage_error)?;
        Ok(())
    }

    async fn update_open_stage(
        &self,
        order: &WorkOrder,
        expected_version: i64,
        stage: &StageRecord,
        audit: &AuditEntry,
    ) -> RepoResult<()> {
        let mut tx = self.pool.begin().await.map_err(storage_error)?;
        update_header(&mut tx, order, expected_version).await?;

        let result = sqlx::query(
            r#"
            UPDATE stage_records
            SET status = $2, karigar_id = $3, jamah_weight = $4, metal_added = $5, stone_weight_added = $6,
                weight_loss = $7, loss_exceeds_tolerance = $8, note = $9, received_at = $10
            WHERE id = $1 AND status = 'ISSUED'
            "#,
        )
        .bind(stage.id)
        .bind(stage.status.as_str())
        .bind(stage.karigar_id)
        .bind(stage.jamah_weight)
        .bind(stage.metal_added)
        .bind(stage.stone_weight_added)
        .bind(stage.weight_loss)
        .bind(stage.loss_exceeds_tolerance)
        .bind(&stage.note)
        .bind(stage.received_at)
        .execute(&mut *tx)
        .await
        .map_err(storage_error)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::Conflict(format!(
                "stage {} of work order {} is no longer open",
                stage.stage, order.order_number
            )));
        }

        if !stage.is_open() {
            for line in &stage.stones {
                sqlx::query(
                    r#"
                    UPDATE stage_stones SET set_count = $3, returned = $4, broken = $5
                    WHERE stage_record_id = $1 AND stone_lot_id = $2
                    "#,
                )
                .bind(stage.id)
                .bind(line.stone_lot_id)
                .bind(line.set)
                .bind(line.returned)
                .bind(line.broken)
                .execute(&mut *tx)
                .await
                .map_err(storage_error)?;
            }
            post_movements(&mut tx, stone_movements_for(stage)).await?;
        }

        insert_audit(&mut tx, audit).await?;
        tx.commit().await.map_err(storage_error)?;
        Ok(())
    }

    async fn update_work_order(&self, order: &WorkOrder, expected_version: i64, audit: &AuditEntry) -> RepoResult<()> {
        let mut tx = self.pool.begin().await.map_err(storage_error)?;
        update_header(&mut tx, order, expected_version).await?;
        insert_audit(&mut tx, audit).await?;
        tx.commit().await.map_err(storage_error)?;
        Ok(())
    }

    async fn list_audit(&self, work_order_id: Uuid) -> RepoResult<Vec<AuditEntry>> {
        let rows: Vec<AuditRow> = sqlx::query_as(
            r#"
            SELECT id, work_order_id, action, before_state, after_state, actor, note, created_at
            FROM audit_entries WHERE work_order_id = $1 ORDER BY created_at
            "#,
        )
        .bind(work_order_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        rows.into_iter().map(AuditEntry::try_from).collect()
    }

    async fn open_stages_for_karigar(&self, karigar_id: Uuid) -> RepoResult<Vec<StageRecord>> {
        let stage_rows: Vec<StageRow> = sqlx::query_as(&format!(
            "SELECT {} FROM stage_records WHERE karigar_id = $1 AND status = 'ISSUED' ORDER BY issued_at",
            STAGE_COLUMNS
        ))
        .bind(karigar_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        let stone_rows: Vec<StageStoneRow> = sqlx::query_as(
            r#"
            SELECT ss.stage_record_id, ss.stone_lot_id, ss.carat_per_piece, ss.issued, ss.set_count, ss.returned, ss.broken
            FROM stage_stones ss
            JOIN stage_records sr ON sr.id = ss.stage_record_id
            WHERE sr.karigar_id = $1 AND sr.status = 'ISSUED'
            "#,
        )
        .bind(karigar_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        assemble_stages(stage_rows, stone_rows)
    }
}
