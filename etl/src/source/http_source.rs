use super::CaseSource;
use async_trait::async_trait;
use covid_etl_core::config::ApiConfig;
use covid_etl_core::{Error, Result};
use reqwest::Client;
use tracing::{debug, instrument};

/// Reads `{base_uri}/{state}/{date}.json` from the COVID Tracking Project style API.
pub struct HttpSource {
    client: Client,
    base_uri: String,
    timeout_secs: u64,
}

impl HttpSource {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            client,
            base_uri: config.base_uri.trim_end_matches('/').to_string(),
            timeout_secs: config.request_timeout_secs,
        })
    }

    pub fn day_url(&self, state: &str, date: &str) -> String {
        format!("{}/{}/{}.json", self.base_uri, state, date)
    }

    fn fetch_error(&self, state: &str, date: &str, err: reqwest::Error) -> Error {
        if err.is_timeout() {
            return Error::Timeout {
                operation: format!("GET {}", self.day_url(state, date)),
                secs: self.timeout_secs,
            };
        }

        let details = if err.is_decode() {
            format!("response body is not JSON: {err}")
        } else if let Some(status) = err.status() {
            format!("API returned {status}")
        } else {
            err.to_string()
        };

        Error::Fetch {
            state: state.to_string(),
            date: date.to_string(),
            details,
        }
    }
}

#[async_trait]
impl CaseSource for HttpSource {
    #[instrument(skip(self))]
    async fn fetch_day(&self, state: &str, date: &str) -> Result<serde_json::Value> {
        let url = self.day_url(state, date);
        debug!(url = %url, "Fetching state day");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| self.fetch_error(state, date, e))?;

        response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| self.fetch_error(state, date, e))
    }

    fn source_id(&self) -> &str {
        &self.base_uri
    }
}
