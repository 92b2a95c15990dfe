use crate::config::{LogFormat, TelemetryConfig};
use metrics::{describe_counter, describe_histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub const FETCH_REQUESTS: &str = "covid_etl_fetch_requests";
pub const FETCH_FAILURES: &str = "covid_etl_fetch_failures";
pub const ROWS_LOW_QUALITY: &str = "covid_etl_rows_low_quality";
pub const ROWS_DEDUPLICATED: &str = "covid_etl_rows_deduplicated";
pub const ROWS_WRITTEN: &str = "covid_etl_rows_written";
pub const STAGE_DURATION_MS: &str = "covid_etl_stage_duration_ms";

pub fn init(config: &TelemetryConfig) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let fmt_layer = match config.log_format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .boxed(),
        LogFormat::Pretty => fmt::layer().pretty().with_target(false).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    if config.metrics_enabled {
        let addr: SocketAddr = ([0, 0, 0, 0], config.metrics_port).into();
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()?;

        tracing::info!(
            port = config.metrics_port,
            "Metrics endpoint started at http://0.0.0.0:{}/metrics",
            config.metrics_port
        );
    }

    describe_metrics();
    Ok(())
}

fn describe_metrics() {
    describe_counter!(FETCH_REQUESTS, "API requests issued, one per state/date pair");
    describe_counter!(FETCH_FAILURES, "API requests that failed and were skipped");
    describe_counter!(ROWS_LOW_QUALITY, "Rows dropped for a bad data quality grade");
    describe_counter!(ROWS_DEDUPLICATED, "Rows dropped because their hash was already stored or repeated in the batch");
    describe_counter!(ROWS_WRITTEN, "Rows appended to the destination table");
    describe_histogram!(STAGE_DURATION_MS, Unit::Milliseconds, "Wall time per pipeline stage");
}
