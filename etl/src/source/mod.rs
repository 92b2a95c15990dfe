pub mod http_source;

use crate::model::{FetchFailure, PollReport};
use async_trait::async_trait;
use covid_etl_core::telemetry::{FETCH_FAILURES, FETCH_REQUESTS};
use covid_etl_core::Result;
use metrics::counter;
use std::time::Instant;
use tracing::{info, instrument, warn};

#[async_trait]
pub trait CaseSource: Send + Sync {
    /// Fetch and parse the payload for one state on one day.
    async fn fetch_day(&self, state: &str, date: &str) -> Result<serde_json::Value>;

    /// Get the source identifier
    fn source_id(&self) -> &str;
}

pub use http_source::HttpSource;

/// Fetch every (date, state) pair, dates outermost, one request at a time.
///
/// A failed request is logged and left out of the result; it never aborts the
/// run and is not retried.
#[instrument(skip_all, fields(source = source.source_id()))]
pub async fn poll(source: &dyn CaseSource, states: &[String], dates: &[String]) -> PollReport {
    let start = Instant::now();
    let mut report = PollReport::default();

    info!(?dates, ?states, "Polling API");

    for date in dates {
        for state in states {
            counter!(FETCH_REQUESTS).increment(1);

            match source.fetch_day(state, date).await {
                Ok(body) => report.responses.push(body),
                Err(error) => {
                    warn!(state = %state, date = %date, error = %error, "Error reaching API");
                    counter!(FETCH_FAILURES).increment(1);
                    report.failures.push(FetchFailure {
                        state: state.clone(),
                        date: date.clone(),
                        error,
                    });
                }
            }
        }
    }

    info!(
        requested = report.requested(),
        retrieved = report.responses.len(),
        failed = report.failures.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Retrieved {} responses from {}",
        report.responses.len(),
        source.source_id()
    );

    report
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use covid_etl_core::Error;
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Serves canned payloads keyed by `state/date`; unknown pairs fail like a dead host.
    #[derive(Default)]
    pub struct ScriptedSource {
        bodies: HashMap<String, Value>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedSource {
        pub fn with(mut self, state: &str, date: &str, body: Value) -> Self {
            self.bodies.insert(format!("{state}/{date}"), body);
            self
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CaseSource for ScriptedSource {
        async fn fetch_day(&self, state: &str, date: &str) -> Result<Value> {
            let key = format!("{state}/{date}");
            self.calls.lock().unwrap().push(key.clone());
            self.bodies.get(&key).cloned().ok_or_else(|| Error::Fetch {
                state: state.to_string(),
                date: date.to_string(),
                details: "connection refused".to_string(),
            })
        }

        fn source_id(&self) -> &str {
            "scripted"
        }
    }

    pub fn day(state: &str, date: i64, grade: Option<&str>, hash: &str) -> Value {
        json!({
            "date": date,
            "state": state.to_uppercase(),
            "positive": 1000,
            "negative": 9000,
            "death": 12,
            "fips": "06",
            "dataQualityGrade": grade,
            "hash": hash,
        })
    }
}
