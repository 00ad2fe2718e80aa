use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;
use tracing::{debug, warn};

use crate::system_config::{SystemConfigEntity, SystemConfigKey, SystemConfigRepository};
use crate::types::AppResult;

/// Config overrides in the `system_config` table, one row per dotted key.
#[derive(Clone)]
pub struct PgConfigRepository {
    pool: PgPool,
}

impl PgConfigRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SystemConfigRepository for PgConfigRepository {
    async fn load(&self) -> AppResult<Vec<SystemConfigEntity>> {
        let rows: Vec<(String, Value)> = sqlx::query_as("SELECT key, value FROM system_config")
            .fetch_all(&self.pool)
            .await?;

        let mut items = Vec::with_capacity(rows.len());
        for (key, value) in rows {
            match key.parse::<SystemConfigKey>() {
                Ok(key) => items.push(SystemConfigEntity { key, value }),
                Err(e) => warn!("Ignoring stored config override: {}", e),
            }
        }
        debug!("Loaded {} config overrides from database", items.len());
        Ok(items)
    }

    async fn apply(
        &self,
        updates: &[SystemConfigEntity],
        deletes: &[SystemConfigKey],
    ) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;

        if !deletes.is_empty() {
            let keys: Vec<String> = deletes.iter().map(|key| key.as_str().to_string()).collect();
            sqlx::query("DELETE FROM system_config WHERE key = ANY($1)")
                .bind(&keys)
                .execute(&mut *tx)
                .await?;
        }

        for item in updates {
            sqlx::query(
                r#"
                INSERT INTO system_config (key, value)
                VALUES ($1, $2)
                ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value
                "#,
            )
            .bind(item.key.as_str())
            .bind(&item.value)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!(
            "Applied {} config overrides and {} removals",
            updates.len(),
            deletes.len()
        );
        Ok(())
    }
}
