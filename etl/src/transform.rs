use crate::model::{CaseRecord, SourceRecord};
use covid_etl_core::telemetry::ROWS_LOW_QUALITY;
use metrics::counter;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

/// Grade stored when the source leaves `dataQualityGrade` empty.
pub const MISSING_GRADE: &str = "n/a";

/// Rows carrying this grade are never persisted. Compared byte for byte.
pub const REJECTED_GRADE: &str = "Serious issues exist";

#[derive(Debug, Default)]
pub struct TransformOutcome {
    pub records: Vec<CaseRecord>,
    /// Values that were not objects or did not fit the source schema.
    pub malformed: usize,
    pub low_quality_dropped: usize,
}

/// Shape raw API payloads into destination rows, dropping low-quality ones.
///
/// An array payload contributes each element as its own row. Input order is
/// preserved for every row that survives.
pub fn transform(responses: Vec<Value>) -> TransformOutcome {
    let mut outcome = TransformOutcome::default();

    let rows: Vec<SourceRecord> = responses
        .into_iter()
        .flat_map(|value| match value {
            Value::Array(items) => items,
            other => vec![other],
        })
        .filter_map(|value| match value {
            Value::Object(_) => match serde_json::from_value::<SourceRecord>(value) {
                Ok(row) => Some(row),
                Err(e) => {
                    warn!(error = %e, "Skipping payload that does not match the source schema");
                    outcome.malformed += 1;
                    None
                }
            },
            other => {
                warn!(kind = json_kind(&other), "Skipping non-object payload");
                outcome.malformed += 1;
                None
            }
        })
        .collect();

    let before = rows.len();

    let mut shaped = Vec::with_capacity(before);
    for row in rows {
        match shape(row) {
            Ok(record) => shaped.push(record),
            Err(e) => {
                warn!(error = %e, "Skipping row that could not be hashed");
                outcome.malformed += 1;
            }
        }
    }
    let hashed = shaped.len();

    outcome.records = shaped
        .into_iter()
        .filter(|record| record.data_quality_grade != REJECTED_GRADE)
        .collect();

    outcome.low_quality_dropped = hashed - outcome.records.len();
    if outcome.low_quality_dropped > 0 {
        info!(
            dropped = outcome.low_quality_dropped,
            "Dropped {} rows due to poor data quality from source",
            outcome.low_quality_dropped
        );
        counter!(ROWS_LOW_QUALITY).increment(outcome.low_quality_dropped as u64);
    }

    debug!(kept = outcome.records.len(), malformed = outcome.malformed, "Transformed batch");
    outcome
}

fn shape(source: SourceRecord) -> serde_json::Result<CaseRecord> {
    let hash = match source.hash.as_deref() {
        Some(hash) if !hash.is_empty() => hash.to_string(),
        _ => content_hash(&source)?,
    };

    let grade = source
        .data_quality_grade
        .clone()
        .unwrap_or_else(|| MISSING_GRADE.to_string());

    Ok(CaseRecord::from_source(source, grade, hash))
}

/// SHA-256 over the business fields, for payloads that arrive without a hash.
pub fn content_hash(source: &SourceRecord) -> serde_json::Result<String> {
    let business = SourceRecord {
        fips: None,
        hash: None,
        ..source.clone()
    };

    let bytes = serde_json::to_vec(&business)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
