use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use karkhana_core::repository::{KarigarRepository, RepoResult, RepositoryError};
use karkhana_order::Karigar;

use crate::rows::KarigarRow;
use crate::storage_error;

pub struct StoreKarigarRepository {
    pool: PgPool,
}

impl StoreKarigarRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl KarigarRepository for StoreKarigarRepository {
    async fn create_karigar(&self, karigar: &Karigar) -> RepoResult<()> {
        let specialities: Vec<&str> = karigar.specialities.iter().map(|s| s.as_str()).collect();
        sqlx::query(
            "INSERT INTO karigars (id, name, phone, specialities, is_active, created_at) VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(karigar.id)
        .bind(&karigar.name)
        .bind(karigar.phone.as_ref().map(|p| p.expose().as_str()))
        .bind(&specialities)
        .bind(karigar.is_active)
        .bind(karigar.created_at)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;
        Ok(())
    }

    async fn get_karigar(&self, id: Uuid) -> RepoResult<Option<Karigar>> {
        let row: Option<KarigarRow> =
            sqlx::query_as("SELECT id, name, phone, specialities, is_active, created_at FROM karigars WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(storage_error)?;

        row.map(Karigar::try_from).transpose()
    }

    async fn set_karigar_active(&self, id: Uuid, active: bool) -> RepoResult<()> {
        let result = sqlx::query("UPDATE karigars SET is_active = $2 WHERE id = $1")
            .bind(id)
            .bind(active)
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("Karigar {}", id)));
        }
        Ok(())
    }
}
