//! Postgres-backed store.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use super::{LineRecord, ReferenceStore, StoreError, TrainPage, TrainRecord};
use crate::audit::{AuditRecord, AuditSink};

/// Connections kept in the pool.
const MAX_CONNECTIONS: u32 = 10;

/// How long to wait for a pooled connection.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

const LINE_COLUMNS: &str = "line_code, name, network, color, text_color, is_active";

const TRAIN_COLUMNS: &str = "id, train_number, line_code, origin, destination, departure_time, \
     arrival_time, status, delay_minutes, is_active";

/// Postgres store for request logs and reference tables.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create a store whose connections are opened on first use.
    ///
    /// Only the URL is validated here, so this succeeds even when the
    /// database is down.
    pub fn connect_lazy(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect_lazy(database_url)?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply pending schema migrations.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("database migrations applied");
        Ok(())
    }
}

#[async_trait]
impl AuditSink for PgStore {
    async fn write(&self, record: &AuditRecord) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO request_logs (method, path, subject, status_code, duration_ms, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&record.method)
        .bind(&record.path)
        .bind(record.subject.as_deref())
        .bind(i32::from(record.status))
        .bind(record.duration_ms())
        .bind(record.recorded_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl ReferenceStore for PgStore {
    async fn active_lines(&self, limit: u32) -> Result<Vec<LineRecord>, StoreError> {
        let sql = format!(
            "SELECT {LINE_COLUMNS} FROM lines WHERE is_active ORDER BY name LIMIT $1"
        );
        let lines = sqlx::query_as::<_, LineRecord>(&sql)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
        Ok(lines)
    }

    async fn line(&self, line_code: &str) -> Result<Option<LineRecord>, StoreError> {
        let sql = format!("SELECT {LINE_COLUMNS} FROM lines WHERE line_code = $1");
        let line = sqlx::query_as::<_, LineRecord>(&sql)
            .bind(line_code)
            .fetch_optional(&self.pool)
            .await?;
        Ok(line)
    }

    async fn active_trains(
        &self,
        status: Option<&str>,
        limit: u32,
    ) -> Result<TrainPage, StoreError> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM trains WHERE is_active AND ($1::text IS NULL OR status = $1)",
        )
        .bind(status)
        .fetch_one(&self.pool)
        .await?;

        let sql = format!(
            "SELECT {TRAIN_COLUMNS} FROM trains \
             WHERE is_active AND ($1::text IS NULL OR status = $1) \
             ORDER BY departure_time DESC NULLS LAST LIMIT $2"
        );
        let trains = sqlx::query_as::<_, TrainRecord>(&sql)
            .bind(status)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;

        Ok(TrainPage { trains, total })
    }

    async fn train_by_id(&self, id: i32) -> Result<Option<TrainRecord>, StoreError> {
        let sql = format!("SELECT {TRAIN_COLUMNS} FROM trains WHERE id = $1");
        let train = sqlx::query_as::<_, TrainRecord>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(train)
    }

    async fn train_by_number(&self, number: &str) -> Result<Option<TrainRecord>, StoreError> {
        let sql = format!("SELECT {TRAIN_COLUMNS} FROM trains WHERE train_number = $1 LIMIT 1");
        let train = sqlx::query_as::<_, TrainRecord>(&sql)
            .bind(number)
            .fetch_optional(&self.pool)
            .await?;
        Ok(train)
    }
}
