//! Database connection pool, migrations, and health check.
//!
//! Shared Postgres connection pool used by all query modules. Entities
//! live in ordinary tables; the two processing backlogs are pgmq
//! queues in the same database so enqueue-on-insert is transactional.

pub mod backlog;
pub mod diffs;
pub mod pages;
pub mod review;

use crate::error::Result;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Database handle. Owns the connection pool shared across all modules.
pub struct Db {
    pool: PgPool,
}

impl Db {
    /// Connect to Postgres and create a connection pool.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Simple health check — run a SELECT 1.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Get a reference to the connection pool (for worker listeners).
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
