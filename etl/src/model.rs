use covid_etl_core::Error;
use serde::{Deserialize, Serialize};

/// One state/day object as served by the API.
///
/// The serde names are the source column names; the Rust field names are the
/// destination column names. Missing keys and `null` both deserialize to `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRecord {
    pub date: Option<i64>,
    pub state: Option<String>,
    pub positive: Option<i64>,
    pub probable_cases: Option<i64>,
    pub negative: Option<i64>,
    pub pending: Option<i64>,
    pub total_test_results: Option<i64>,
    pub hospitalized_currently: Option<i64>,
    pub hospitalized_cumulative: Option<i64>,
    pub in_icu_currently: Option<i64>,
    pub in_icu_cumulative: Option<i64>,
    pub on_ventilator_currently: Option<i64>,
    pub on_ventilator_cumulative: Option<i64>,
    pub recovered: Option<i64>,
    pub data_quality_grade: Option<String>,
    pub last_update_et: Option<String>,
    pub date_modified: Option<String>,
    pub check_time_et: Option<String>,
    pub death: Option<i64>,
    pub hospitalized: Option<i64>,
    pub date_checked: Option<String>,
    pub total_tests_viral: Option<i64>,
    pub positive_tests_viral: Option<i64>,
    pub negative_tests_viral: Option<i64>,
    pub positive_cases_viral: Option<i64>,
    pub death_confirmed: Option<i64>,
    pub death_probable: Option<i64>,
    // Never persisted. Kept loose since some payloads carry it as a number.
    pub fips: Option<serde_json::Value>,
    pub positive_increase: Option<i64>,
    pub negative_increase: Option<i64>,
    pub total: Option<i64>,
    pub total_test_results_increase: Option<i64>,
    pub pos_neg: Option<i64>,
    pub death_increase: Option<i64>,
    pub hospitalized_increase: Option<i64>,
    pub hash: Option<String>,
}

/// One row of the destination table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseRecord {
    pub date: Option<i64>,
    pub state: Option<String>,
    pub positive: Option<i64>,
    pub probable_cases: Option<i64>,
    pub negative: Option<i64>,
    pub pending: Option<i64>,
    pub total_test_results: Option<i64>,
    pub hospitalized_currently: Option<i64>,
    pub hospitalized_cumulative: Option<i64>,
    pub in_icu_currently: Option<i64>,
    pub in_icu_cumulative: Option<i64>,
    pub on_ventilator_currently: Option<i64>,
    pub on_ventilator_cumulative: Option<i64>,
    pub recovered: Option<i64>,
    pub data_quality_grade: String,
    pub last_update_et: Option<String>,
    pub date_modified: Option<String>,
    pub check_time_et: Option<String>,
    pub death: Option<i64>,
    pub hospitalized: Option<i64>,
    pub date_checked: Option<String>,
    pub total_tests_viral: Option<i64>,
    pub positive_tests_viral: Option<i64>,
    pub negative_tests_viral: Option<i64>,
    pub positive_cases_viral: Option<i64>,
    pub death_confirmed: Option<i64>,
    pub death_probable: Option<i64>,
    pub positive_increase: Option<i64>,
    pub negative_increase: Option<i64>,
    pub total: Option<i64>,
    pub total_test_results_increase: Option<i64>,
    pub pos_neg: Option<i64>,
    pub death_increase: Option<i64>,
    pub hospitalized_increase: Option<i64>,
    pub hash: String,
}

impl CaseRecord {
    /// Moves every persisted field across; `fips` has no destination column.
    pub fn from_source(source: SourceRecord, data_quality_grade: String, hash: String) -> Self {
        Self {
            date: source.date,
            state: source.state,
            positive: source.positive,
            probable_cases: source.probable_cases,
            negative: source.negative,
            pending: source.pending,
            total_test_results: source.total_test_results,
            hospitalized_currently: source.hospitalized_currently,
            hospitalized_cumulative: source.hospitalized_cumulative,
            in_icu_currently: source.in_icu_currently,
            in_icu_cumulative: source.in_icu_cumulative,
            on_ventilator_currently: source.on_ventilator_currently,
            on_ventilator_cumulative: source.on_ventilator_cumulative,
            recovered: source.recovered,
            data_quality_grade,
            last_update_et: source.last_update_et,
            date_modified: source.date_modified,
            check_time_et: source.check_time_et,
            death: source.death,
            hospitalized: source.hospitalized,
            date_checked: source.date_checked,
            total_tests_viral: source.total_tests_viral,
            positive_tests_viral: source.positive_tests_viral,
            negative_tests_viral: source.negative_tests_viral,
            positive_cases_viral: source.positive_cases_viral,
            death_confirmed: source.death_confirmed,
            death_probable: source.death_probable,
            positive_increase: source.positive_increase,
            negative_increase: source.negative_increase,
            total: source.total,
            total_test_results_increase: source.total_test_results_increase,
            pos_neg: source.pos_neg,
            death_increase: source.death_increase,
            hospitalized_increase: source.hospitalized_increase,
            hash,
        }
    }
}

#[derive(Debug)]
pub struct FetchFailure {
    pub state: String,
    pub date: String,
    pub error: Error,
}

/// Outcome of polling every configured state/date pair.
#[derive(Debug, Default)]
pub struct PollReport {
    /// Parsed bodies of the successful requests, in request order.
    pub responses: Vec<serde_json::Value>,
    pub failures: Vec<FetchFailure>,
}

impl PollReport {
    pub fn requested(&self) -> usize {
        self.responses.len() + self.failures.len()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub requested: usize,
    pub fetched: usize,
    pub fetch_failures: usize,
    pub malformed: usize,
    pub low_quality_dropped: usize,
    pub duplicates_removed: usize,
    pub repeated_in_batch: usize,
    pub written: usize,
    /// Destination size after the run; `None` when the count could not be read.
    pub table_rows: Option<u64>,
}
