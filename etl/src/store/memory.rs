use super::{CaseStore, TableStatus};
use crate::model::CaseRecord;
use async_trait::async_trait;
use covid_etl_core::{Error, Result};
use std::collections::HashSet;
use std::sync::Mutex;

/// In-process table. `None` means the table has not been created yet.
#[derive(Default)]
pub struct MemoryStore {
    rows: Mutex<Option<Vec<CaseRecord>>>,
    fail_writes: bool,
    fail_row_count: bool,
}

impl MemoryStore {
    pub fn with_rows(rows: Vec<CaseRecord>) -> Self {
        Self {
            rows: Mutex::new(Some(rows)),
            ..Self::default()
        }
    }

    pub fn failing_writes(mut self) -> Self {
        self.fail_writes = true;
        self
    }

    pub fn failing_row_count(mut self) -> Self {
        self.fail_row_count = true;
        self
    }

    pub fn rows(&self) -> Vec<CaseRecord> {
        self.rows.lock().unwrap().clone().unwrap_or_default()
    }

    pub fn exists(&self) -> bool {
        self.rows.lock().unwrap().is_some()
    }
}

fn missing_table() -> Error {
    Error::Database(sqlx::Error::Protocol("table us_covid doesn't exist".into()))
}

#[async_trait]
impl CaseStore for MemoryStore {
    async fn ensure_table(&self) -> Result<TableStatus> {
        let mut rows = self.rows.lock().unwrap();
        if rows.is_some() {
            return Ok(TableStatus::AlreadyExists);
        }
        *rows = Some(Vec::new());
        Ok(TableStatus::Created)
    }

    async fn existing_hashes(&self) -> Result<HashSet<String>> {
        let rows = self.rows.lock().unwrap();
        let rows = rows.as_ref().ok_or_else(missing_table)?;
        Ok(rows.iter().map(|r| r.hash.clone()).collect())
    }

    async fn append(&self, records: &[CaseRecord]) -> Result<usize> {
        if self.fail_writes {
            return Err(Error::Database(sqlx::Error::PoolTimedOut));
        }
        let mut rows = self.rows.lock().unwrap();
        let rows = rows.as_mut().ok_or_else(missing_table)?;
        rows.extend_from_slice(records);
        Ok(records.len())
    }

    async fn row_count(&self) -> Result<u64> {
        if self.fail_row_count {
            return Err(Error::Timeout {
                operation: "connect to database covid".into(),
                secs: 10,
            });
        }
        let rows = self.rows.lock().unwrap();
        Ok(rows.as_ref().ok_or_else(missing_table)?.len() as u64)
    }
}
