pub mod app_config;
pub mod database;
mod rows;
pub mod work_order_repo;
pub mod karigar_repo;
pub mod stone_repo;

pub use app_config::Config;
pub use database::DbClient;
pub use karigar_repo::StoreKarigarRepository;
pub use stone_repo::StoreStoneRepository;
pub use work_order_repo::StoreWorkOrderRepository;

use karkhana_core::repository::RepositoryError;

/// Map driver errors onto the repository contract. Unique and check violations mean
/// another writer got there first or stock would go negative.
pub(crate) fn storage_error(err: sqlx::Error) -> RepositoryError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return RepositoryError::Conflict(format!(
                "conflicting write ({})",
                db.constraint().unwrap_or("unique")
            ));
        }
        if db.is_check_violation() {
            return RepositoryError::Conflict(format!(
                "rejected by {}",
                db.constraint().unwrap_or("check constraint")
            ));
        }
    }
    RepositoryError::Backend(Box::new(err))
}
