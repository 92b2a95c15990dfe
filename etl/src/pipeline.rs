use crate::dedup::dedupe;
use crate::model::RunSummary;
use crate::source::{self, CaseSource};
use crate::store::CaseStore;
use crate::transform::transform;
use covid_etl_core::config::IngestConfig;
use covid_etl_core::telemetry::STAGE_DURATION_MS;
use covid_etl_core::Result;
use metrics::histogram;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};
use uuid::Uuid;

pub struct Pipeline {
    source: Arc<dyn CaseSource>,
    store: Arc<dyn CaseStore>,
    ingest: IngestConfig,
}

fn record_stage(stage: &'static str, started: Instant) {
    histogram!(STAGE_DURATION_MS, "stage" => stage).record(started.elapsed().as_millis() as f64);
}

impl Pipeline {
    pub fn new(source: Arc<dyn CaseSource>, store: Arc<dyn CaseStore>, ingest: IngestConfig) -> Self {
        Self {
            source,
            store,
            ingest,
        }
    }

    /// One full pass: bootstrap, poll, transform, dedupe, persist.
    ///
    /// Fetch failures and low-quality rows are absorbed and counted; database
    /// failures end the run.
    #[instrument(skip(self), fields(run_id = %Uuid::new_v4()))]
    pub async fn run(&self) -> Result<RunSummary> {
        let run_start = Instant::now();
        let mut summary = RunSummary::default();

        let stage = Instant::now();
        let status = self.store.ensure_table().await?;
        record_stage("bootstrap", stage);
        info!(?status, "Destination table ready");

        let stage = Instant::now();
        let report = source::poll(self.source.as_ref(), &self.ingest.states, &self.ingest.dates).await;
        record_stage("poll", stage);
        summary.requested = report.requested();
        summary.fetched = report.responses.len();
        summary.fetch_failures = report.failures.len();
        if !report.failures.is_empty() {
            let failed: Vec<String> = report
                .failures
                .iter()
                .map(|f| format!("{}/{}: {}", f.state, f.date, f.error))
                .collect();
            warn!(?failed, "Some state/date pairs are missing from this run");
        }

        let stage = Instant::now();
        let shaped = transform(report.responses);
        record_stage("transform", stage);
        summary.malformed = shaped.malformed;
        summary.low_quality_dropped = shaped.low_quality_dropped;

        let stage = Instant::now();
        let existing = self.store.existing_hashes().await?;
        let deduped = dedupe(shaped.records, &existing);
        record_stage("dedup", stage);
        summary.duplicates_removed = deduped.removed;
        summary.repeated_in_batch = deduped.repeated;

        if deduped.kept.is_empty() {
            info!("No new rows to insert");
        } else {
            let stage = Instant::now();
            summary.written = self.store.append(&deduped.kept).await?;
            record_stage("persist", stage);
        }

        // Rows are committed by now, so a failed count only loses the diagnostic.
        summary.table_rows = match self.store.row_count().await {
            Ok(rows) => Some(rows),
            Err(e) => {
                warn!(error = %e, "Could not count destination rows after the run");
                None
            }
        };

        info!(
            requested = summary.requested,
            fetched = summary.fetched,
            fetch_failures = summary.fetch_failures,
            malformed = summary.malformed,
            low_quality_dropped = summary.low_quality_dropped,
            duplicates_removed = summary.duplicates_removed,
            repeated_in_batch = summary.repeated_in_batch,
            written = summary.written,
            table_rows = ?summary.table_rows,
            elapsed_ms = run_start.elapsed().as_millis() as u64,
            "Run completed"
        );

        Ok(summary)
    }
}
