use crate::domain::repositories::GeminiUsageRepository;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::{Row, SqlitePool};

/// Tracks the daily LLM call budget (§4.5 Story sub-score). One row per
/// calendar day, incremented on every vote regardless of which symbol
/// triggered it — the budget is shared across all symbols.
pub struct SqliteGeminiUsageRepository {
    pool: SqlitePool,
}

impl SqliteGeminiUsageRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl GeminiUsageRepository for SqliteGeminiUsageRepository {
    async fn increment_and_get(&self, today: NaiveDate) -> Result<i32> {
        sqlx::query(
            r#"INSERT INTO gemini_usage (usage_date, calls_used) VALUES (?, 1)
               ON CONFLICT(usage_date) DO UPDATE SET calls_used = calls_used + 1"#,
        )
        .bind(today)
        .execute(&self.pool)
        .await
        .context("Failed to increment gemini usage")?;

        self.calls_used(today).await
    }

    async fn calls_used(&self, today: NaiveDate) -> Result<i32> {
        let row = sqlx::query("SELECT calls_used FROM gemini_usage WHERE usage_date = ?")
            .bind(today)
            .fetch_optional(&self.pool)
            .await?;
        Ok(match row {
            Some(row) => row.try_get("calls_used")?,
            None => 0,
        })
    }
}
