use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use karkhana_core::repository::{RepoResult, RepositoryError, StoneRepository};
use karkhana_stones::{MovementKind, StoneLot, StoneMovement};

use crate::rows::{StoneLotRow, STONE_LOT_COLUMNS};
use crate::storage_error;

pub struct StoreStoneRepository {
    pool: PgPool,
}

impl StoreStoneRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

pub(crate) async fn journal(executor: &mut sqlx::PgConnection, movement: &StoneMovement) -> RepoResult<()> {
    sqlx::query(
        r#"
        INSERT INTO stone_movements (id, stone_lot_id, kind, quantity, work_order_id, stage_record_id, note, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(movement.id)
    .bind(movement.stone_lot_id)
    .bind(movement.kind.as_str())
    .bind(movement.quantity)
    .bind(movement.work_order_id)
    .bind(movement.stage_record_id)
    .bind(&movement.note)
    .bind(movement.created_at)
    .execute(executor)
    .await
    .map_err(storage_error)?;
    Ok(())
}

#[async_trait]
impl StoneRepository for StoreStoneRepository {
    async fn create_lot(&self, lot: &StoneLot, opening_quantity: i32) -> RepoResult<StoneLot> {
        let mut tx = self.pool.begin().await.map_err(storage_error)?;

        let row: StoneLotRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO stone_lots (id, lot_code, stone_type, shape, size_mm, carat_per_piece, quantity_on_hand, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {}
            "#,
            STONE_LOT_COLUMNS
        ))
        .bind(lot.id)
        .bind(&lot.lot_code)
        .bind(&lot.stone_type)
        .bind(&lot.shape)
        .bind(lot.size_mm)
        .bind(lot.carat_per_piece)
        .bind(opening_quantity)
        .bind(lot.created_at)
        .bind(lot.updated_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match storage_error(e) {
            RepositoryError::Conflict(_) => RepositoryError::Conflict(format!("lot code {} already exists", lot.lot_code)),
            other => other,
        })?;

        if opening_quantity > 0 {
            let movement = StoneMovement::new(lot.id, MovementKind::Receipt, opening_quantity)
                .with_note(Some("opening stock".to_string()));
            journal(&mut tx, &movement).await?;
        }

        tx.commit().await.map_err(storage_error)?;
        Ok(row.into())
    }

    async fn get_lot(&self, id: Uuid) -> RepoResult<Option<StoneLot>> {
        let row: Option<StoneLotRow> =
            sqlx::query_as(&format!("SELECT {} FROM stone_lots WHERE id = $1", STONE_LOT_COLUMNS))
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(storage_error)?;
        Ok(row.map(StoneLot::from))
    }

    async fn receive_stock(&self, lot_id: Uuid, quantity: i32, note: Option<String>) -> RepoResult<StoneLot> {
        let mut tx = self.pool.begin().await.map_err(storage_error)?;

        let row: Option<StoneLotRow> = sqlx::query_as(&format!(
            r#"
            UPDATE stone_lots SET quantity_on_hand = quantity_on_hand + $2, updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            STONE_LOT_COLUMNS
        ))
        .bind(lot_id)
        .bind(quantity)
        .fetch_optional(&mut *tx)
        .await
        .map_err(storage_error)?;

        let row = row.ok_or_else(|| RepositoryError::NotFound(format!("Stone lot {}", lot_id)))?;
        let movement = StoneMovement::new(lot_id, MovementKind::Receipt, quantity).with_note(note);
        journal(&mut tx, &movement).await?;

        tx.commit().await.map_err(storage_error)?;
        Ok(row.into())
    }
}
