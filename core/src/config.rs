use chrono::NaiveDate;
use config::{ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub api: ApiConfig,
    pub ingest: IngestConfig,
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: String,
    /// Destination table; its DDL is looked up as `create_table_<table>.sql`.
    pub table: String,
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
    pub base_uri: String,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IngestConfig {
    /// `YYYYMMDD`, fetched in this order.
    pub dates: Vec<String>,
    /// Lower-case two-letter state codes, fetched in this order for each date.
    pub states: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelemetryConfig {
    pub log_level: String,
    pub log_format: LogFormat,
    pub metrics_enabled: bool,
    pub metrics_port: u16,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

impl DatabaseConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl ApiConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Config {
    /// Defaults, then `path` (or `config.toml` when present), then `COVID_ETL__*` env vars.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&Config::default())?);

        match path {
            Some(path) => {
                builder = builder.add_source(File::from(path).required(true));
            }
            None if Path::new("config.toml").exists() => {
                builder = builder.add_source(File::with_name("config"));
            }
            None => {}
        }

        builder = builder.add_source(
            Environment::with_prefix("COVID_ETL")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("ingest.dates")
                .with_list_parse_key("ingest.states")
                .try_parsing(true),
        );

        let settings: Config = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("database.host", &self.database.host),
            ("database.name", &self.database.name),
            ("database.user", &self.database.user),
            ("api.base_uri", &self.api.base_uri),
        ];
        for (key, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::Message(format!("{key} is required")));
            }
        }

        if !is_identifier(&self.database.table) {
            return Err(ConfigError::Message(format!(
                "database.table must be a plain identifier, got {:?}",
                self.database.table
            )));
        }

        if self.database.connect_timeout_secs == 0 || self.api.request_timeout_secs == 0 {
            return Err(ConfigError::Message(
                "timeouts must be greater than 0".into(),
            ));
        }

        check_unique("ingest.dates", &self.ingest.dates)?;
        check_unique("ingest.states", &self.ingest.states)?;

        for date in &self.ingest.dates {
            NaiveDate::parse_from_str(date, "%Y%m%d").map_err(|e| {
                ConfigError::Message(format!("ingest.dates: {date:?} is not YYYYMMDD: {e}"))
            })?;
        }

        for state in &self.ingest.states {
            if state.len() != 2 || !state.bytes().all(|b| b.is_ascii_lowercase()) {
                return Err(ConfigError::Message(format!(
                    "ingest.states: {state:?} is not a lower-case two-letter code"
                )));
            }
        }

        Ok(())
    }
}

// A repeated date or state would fetch the same payload twice and collide on hash.
fn check_unique(key: &str, values: &[String]) -> Result<(), ConfigError> {
    if values.is_empty() {
        return Err(ConfigError::Message(format!("{key} must not be empty")));
    }

    let mut seen = HashSet::new();
    for value in values {
        if !seen.insert(value.as_str()) {
            return Err(ConfigError::Message(format!("{key}: duplicate entry {value:?}")));
        }
    }
    Ok(())
}

fn is_identifier(name: &str) -> bool {
    !name.is_empty()
        && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
        && !name.as_bytes()[0].is_ascii_digit()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                host: "localhost".to_string(),
                port: 3306,
                name: "covid".to_string(),
                user: "root".to_string(),
                password: String::new(),
                table: "us_covid".to_string(),
                connect_timeout_secs: 10,
            },
            api: ApiConfig {
                base_uri: "https://api.covidtracking.com/v1/states".to_string(),
                request_timeout_secs: 30,
            },
            ingest: IngestConfig {
                dates: vec!["20200429".to_string(), "20200430".to_string()],
                states: vec!["ca".to_string(), "oh".to_string(), "tx".to_string()],
            },
            telemetry: TelemetryConfig {
                log_level: "info".to_string(),
                log_format: LogFormat::Pretty,
                metrics_enabled: false,
                metrics_port: 9090,
            },
        }
    }
}
