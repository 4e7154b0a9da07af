//! In-memory reference store.

use std::cmp::Reverse;

use async_trait::async_trait;

use super::{LineRecord, ReferenceStore, StoreError, TrainPage, TrainRecord};

/// Reference data held in memory. Mirrors the ordering of [`super::PgStore`].
#[derive(Debug, Clone, Default)]
pub struct MemoryReferenceStore {
    lines: Vec<LineRecord>,
    trains: Vec<TrainRecord>,
    unavailable: bool,
}

impl MemoryReferenceStore {
    pub fn new(lines: Vec<LineRecord>, trains: Vec<TrainRecord>) -> Self {
        Self {
            lines,
            trains,
            unavailable: false,
        }
    }

    /// A store where every query fails as if the database were down.
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.unavailable {
            return Err(StoreError::Unavailable("connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ReferenceStore for MemoryReferenceStore {
    async fn active_lines(&self, limit: u32) -> Result<Vec<LineRecord>, StoreError> {
        self.check()?;
        let mut lines: Vec<LineRecord> = self.lines.iter().filter(|l| l.is_active).cloned().collect();
        lines.sort_by(|a, b| a.name.cmp(&b.name));
        lines.truncate(limit as usize);
        Ok(lines)
    }

    async fn line(&self, line_code: &str) -> Result<Option<LineRecord>, StoreError> {
        self.check()?;
        Ok(self.lines.iter().find(|l| l.line_code == line_code).cloned())
    }

    async fn active_trains(
        &self,
        status: Option<&str>,
        limit: u32,
    ) -> Result<TrainPage, StoreError> {
        self.check()?;
        let mut trains: Vec<TrainRecord> = self
            .trains
            .iter()
            .filter(|t| t.is_active)
            .filter(|t| status.is_none_or(|s| t.status.as_deref() == Some(s)))
            .cloned()
            .collect();

        // Latest first, trains without a departure time last
        trains.sort_by_key(|t| (t.departure_time.is_none(), Reverse(t.departure_time)));

        let total = trains.len() as i64;
        trains.truncate(limit as usize);
        Ok(TrainPage { trains, total })
    }

    async fn train_by_id(&self, id: i32) -> Result<Option<TrainRecord>, StoreError> {
        self.check()?;
        Ok(self.trains.iter().find(|t| t.id == id).cloned())
    }

    async fn train_by_number(&self, number: &str) -> Result<Option<TrainRecord>, StoreError> {
        self.check()?;
        Ok(self.trains.iter().find(|t| t.train_number == number).cloned())
    }
}
