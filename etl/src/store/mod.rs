pub mod mysql;

#[cfg(test)]
pub(crate) mod memory;

use crate::model::CaseRecord;
use async_trait::async_trait;
use covid_etl_core::Result;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableStatus {
    Created,
    AlreadyExists,
}

/// Append-only destination for case rows.
#[async_trait]
pub trait CaseStore: Send + Sync {
    /// Create the destination table unless it is already there. Repeatable.
    async fn ensure_table(&self) -> Result<TableStatus>;

    /// Every hash currently stored. Empty for a fresh table.
    async fn existing_hashes(&self) -> Result<HashSet<String>>;

    /// Append `records` without touching stored rows; returns rows written.
    async fn append(&self, records: &[CaseRecord]) -> Result<usize>;

    async fn row_count(&self) -> Result<u64>;
}

pub use mysql::{Connector, MySqlStore};
