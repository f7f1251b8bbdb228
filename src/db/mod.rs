//! Ledger database pool

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Open the ledger pool and verify it answers before any worker starts
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;

        let db = Self { pool };
        db.health_check().await?;
        tracing::info!(max_connections, "Ledger database ready");
        Ok(db)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Lenient column access for optional ledger columns
pub trait SafeRow {
    /// Decode `column`, logging and returning None when it fails
    fn try_get_log<'r, T>(&'r self, column: &str) -> Option<T>
    where
        T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>;
}

impl SafeRow for sqlx::postgres::PgRow {
    fn try_get_log<'r, T>(&'r self, column: &str) -> Option<T>
    where
        T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
    {
        use sqlx::Row;
        match self.try_get(column) {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!(column, error = %e, "Undecodable ledger column");
                None
            }
        }
    }
}
