//! Persistence for the audit trail and reference data.
//!
//! [`PgStore`] is the Postgres implementation. [`MemoryReferenceStore`] and
//! [`crate::audit::MemoryAuditSink`] stand in for it in tests and when the
//! service runs without a database.

mod error;
mod memory;
mod postgres;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::Serialize;

pub use error::StoreError;
pub use memory::MemoryReferenceStore;
pub use postgres::PgStore;

/// A row of the `lines` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct LineRecord {
    pub line_code: String,
    pub name: String,
    pub network: Option<String>,
    pub color: Option<String>,
    pub text_color: Option<String>,
    pub is_active: bool,
}

/// A row of the `trains` table. Times are local timetable times.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct TrainRecord {
    pub id: i32,
    pub train_number: String,
    pub line_code: Option<String>,
    pub origin: Option<String>,
    pub destination: Option<String>,
    pub departure_time: Option<NaiveDateTime>,
    pub arrival_time: Option<NaiveDateTime>,
    pub status: Option<String>,
    pub delay_minutes: i32,
    pub is_active: bool,
}

/// A page of active trains and how many match in total.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainPage {
    pub trains: Vec<TrainRecord>,
    pub total: i64,
}

/// Read access to line and train reference data.
#[async_trait]
pub trait ReferenceStore: Send + Sync {
    /// Active lines ordered by name.
    async fn active_lines(&self, limit: u32) -> Result<Vec<LineRecord>, StoreError>;

    /// A line by code, active or not.
    async fn line(&self, line_code: &str) -> Result<Option<LineRecord>, StoreError>;

    /// Active trains, latest departure first, optionally filtered by status.
    async fn active_trains(&self, status: Option<&str>, limit: u32)
    -> Result<TrainPage, StoreError>;

    async fn train_by_id(&self, id: i32) -> Result<Option<TrainRecord>, StoreError>;

    async fn train_by_number(&self, number: &str) -> Result<Option<TrainRecord>, StoreError>;
}
