//! Database initialization and migration runner.
//!
//! SYSTEM CONTEXT
//! ==============
//! Postgres is optional. When `DATABASE_URL` is set, startup creates the
//! shared SQLx pool here and applies migrations before accepting traffic;
//! otherwise boards live in memory only.

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::services::persistence::env_parse;

const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;

/// Initialize the `PostgreSQL` connection pool and run migrations.
///
/// # Errors
///
/// Returns an error if the connection or migrations fail.
pub async fn init_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(env_parse("DB_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS))
        .connect(database_url)
        .await?;

    sqlx::migrate!("src/db/migrations").run(&pool).await?;

    Ok(pool)
}
