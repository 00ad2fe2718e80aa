use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

use crate::config::DatabaseConfig;
use crate::types::AppResult;

pub async fn create_pool(config: &DatabaseConfig) -> AppResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect(&config.url)
        .await?;

    health_check(&pool).await?;
    info!("Connected to database");

    Ok(pool)
}

pub async fn run_migrations(pool: &PgPool) -> AppResult<()> {
    info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(sqlx::Error::from)?;
    info!("Database migrations completed");
    Ok(())
}

pub async fn health_check(pool: &PgPool) -> AppResult<bool> {
    let _result = sqlx::query("SELECT 1").fetch_one(pool).await?;

    Ok(true)
}
