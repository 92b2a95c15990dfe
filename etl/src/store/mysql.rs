use super::{CaseStore, TableStatus};
use crate::model::CaseRecord;
use async_trait::async_trait;
use covid_etl_core::config::DatabaseConfig;
use covid_etl_core::telemetry::ROWS_WRITTEN;
use covid_etl_core::{Error, Result};
use metrics::counter;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection};
use sqlx::{Connection, MySql, QueryBuilder};
use std::collections::HashSet;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument};

/// Bundled `create_table_<table>.sql` files, keyed by table name.
const DDL: &[(&str, &str)] = &[(
    "us_covid",
    include_str!("../../sql/create_table_us_covid.sql"),
)];

/// Insert column order; `insert_statement` binds in exactly this order.
pub const INSERT_COLUMNS: [&str; 35] = [
    "date",
    "state",
    "positive",
    "probable_cases",
    "negative",
    "pending",
    "total_test_results",
    "hospitalized_currently",
    "hospitalized_cumulative",
    "in_icu_currently",
    "in_icu_cumulative",
    "on_ventilator_currently",
    "on_ventilator_cumulative",
    "recovered",
    "data_quality_grade",
    "last_update_et",
    "date_modified",
    "check_time_et",
    "death",
    "hospitalized",
    "date_checked",
    "total_tests_viral",
    "positive_tests_viral",
    "negative_tests_viral",
    "positive_cases_viral",
    "death_confirmed",
    "death_probable",
    "positive_increase",
    "negative_increase",
    "total",
    "total_test_results_increase",
    "pos_neg",
    "death_increase",
    "hospitalized_increase",
    "hash",
];

// MySQL allows at most 65535 placeholders per statement.
const INSERT_CHUNK_ROWS: usize = 1000;

// ER_TABLE_EXISTS_ERROR (1050)
const TABLE_EXISTS_SQLSTATE: &str = "42S01";

pub fn create_table_statement(table: &str) -> Result<&'static str> {
    DDL.iter()
        .find(|(name, _)| *name == table)
        .map(|(_, sql)| *sql)
        .ok_or_else(|| Error::Schema(format!("no create_table_{table}.sql is bundled")))
}

/// Hands out independent MySQL connections. Nothing is pooled or shared, so
/// every caller owns its session and closes it when done.
#[derive(Debug, Clone)]
pub struct Connector {
    options: MySqlConnectOptions,
    database: String,
    timeout: Duration,
}

impl Connector {
    pub fn new(config: &DatabaseConfig) -> Self {
        let mut options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .database(&config.name)
            .username(&config.user);

        if !config.password.is_empty() {
            options = options.password(&config.password);
        }

        Self {
            options,
            database: config.name.clone(),
            timeout: config.connect_timeout(),
        }
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub async fn connect(&self) -> Result<MySqlConnection> {
        let connect = MySqlConnection::connect_with(&self.options);
        match tokio::time::timeout(self.timeout, connect).await {
            Ok(conn) => Ok(conn?),
            Err(_) => Err(Error::Timeout {
                operation: format!("connect to database {}", self.database),
                secs: self.timeout.as_secs(),
            }),
        }
    }

    /// Health check: opens a connection and reports the server version.
    pub async fn server_version(&self) -> Result<String> {
        let mut conn = self.connect().await?;
        let version: String = sqlx::query_scalar("SELECT VERSION()")
            .fetch_one(&mut conn)
            .await?;
        release(conn).await;
        Ok(version)
    }
}

async fn release(conn: MySqlConnection) {
    if let Err(e) = conn.close().await {
        debug!(error = %e, "Failed to close database connection cleanly");
    }
}

fn is_table_exists_code(code: Option<&str>) -> bool {
    code == Some(TABLE_EXISTS_SQLSTATE)
}

/// Outcome of a failed `CREATE TABLE`: "already exists" is success, anything
/// else is handed back to the caller.
fn create_table_error(err: sqlx::Error) -> std::result::Result<TableStatus, sqlx::Error> {
    let code = match &err {
        sqlx::Error::Database(db) => db.code().map(|c| c.into_owned()),
        _ => None,
    };

    if is_table_exists_code(code.as_deref()) {
        Ok(TableStatus::AlreadyExists)
    } else {
        Err(err)
    }
}

pub struct MySqlStore {
    connector: Connector,
    table: String,
}

impl MySqlStore {
    pub fn new(connector: Connector, table: impl Into<String>) -> Self {
        Self {
            connector,
            table: table.into(),
        }
    }

    async fn insert_all(&self, records: &[CaseRecord]) -> Result<usize> {
        let mut conn = self.connector.connect().await?;
        let mut tx = conn.begin().await?;
        let mut written = 0;

        for chunk in records.chunks(INSERT_CHUNK_ROWS) {
            let result = insert_statement(&self.table, chunk)
                .build()
                .execute(&mut *tx)
                .await?;
            written += result.rows_affected() as usize;
        }

        tx.commit().await?;
        release(conn).await;
        Ok(written)
    }
}

fn insert_statement<'a>(table: &str, chunk: &'a [CaseRecord]) -> QueryBuilder<'a, MySql> {
    let columns = INSERT_COLUMNS
        .iter()
        .map(|c| format!("`{c}`"))
        .collect::<Vec<_>>()
        .join(", ");

    let mut builder = QueryBuilder::new(format!("INSERT INTO `{table}` ({columns}) "));
    builder.push_values(chunk, |mut row, r| {
        row.push_bind(r.date)
            .push_bind(r.state.as_deref())
            .push_bind(r.positive)
            .push_bind(r.probable_cases)
            .push_bind(r.negative)
            .push_bind(r.pending)
            .push_bind(r.total_test_results)
            .push_bind(r.hospitalized_currently)
            .push_bind(r.hospitalized_cumulative)
            .push_bind(r.in_icu_currently)
            .push_bind(r.in_icu_cumulative)
            .push_bind(r.on_ventilator_currently)
            .push_bind(r.on_ventilator_cumulative)
            .push_bind(r.recovered)
            .push_bind(r.data_quality_grade.as_str())
            .push_bind(r.last_update_et.as_deref())
            .push_bind(r.date_modified.as_deref())
            .push_bind(r.check_time_et.as_deref())
            .push_bind(r.death)
            .push_bind(r.hospitalized)
            .push_bind(r.date_checked.as_deref())
            .push_bind(r.total_tests_viral)
            .push_bind(r.positive_tests_viral)
            .push_bind(r.negative_tests_viral)
            .push_bind(r.positive_cases_viral)
            .push_bind(r.death_confirmed)
            .push_bind(r.death_probable)
            .push_bind(r.positive_increase)
            .push_bind(r.negative_increase)
            .push_bind(r.total)
            .push_bind(r.total_test_results_increase)
            .push_bind(r.pos_neg)
            .push_bind(r.death_increase)
            .push_bind(r.hospitalized_increase)
            .push_bind(r.hash.as_str());
    });
    builder
}

#[async_trait]
impl CaseStore for MySqlStore {
    #[instrument(skip(self), fields(table = %self.table))]
    async fn ensure_table(&self) -> Result<TableStatus> {
        let ddl = create_table_statement(&self.table)?;
        let mut conn = self.connector.connect().await?;

        let status = match sqlx::query(ddl).execute(&mut conn).await {
            Ok(_) => {
                info!(
                    database = self.connector.database(),
                    "Created table {} in MySQL database {}",
                    self.table,
                    self.connector.database()
                );
                TableStatus::Created
            }
            Err(e) => match create_table_error(e) {
                Ok(status) => {
                    info!("MySQL table {} already exists", self.table);
                    status
                }
                Err(e) => {
                    error!(error = %e, "Failed to create table");
                    return Err(e.into());
                }
            },
        };

        release(conn).await;
        Ok(status)
    }

    #[instrument(skip(self), fields(table = %self.table))]
    async fn existing_hashes(&self) -> Result<HashSet<String>> {
        let mut conn = self.connector.connect().await?;
        let sql = format!("SELECT DISTINCT `hash` FROM `{}`", self.table);
        let hashes: Vec<String> = sqlx::query_scalar(&sql).fetch_all(&mut conn).await?;
        release(conn).await;

        debug!(keys = hashes.len(), "Loaded stored hashes");
        Ok(hashes.into_iter().collect())
    }

    #[instrument(skip(self, records), fields(table = %self.table, rows = records.len()))]
    async fn append(&self, records: &[CaseRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let start = Instant::now();
        match self.insert_all(records).await {
            Ok(written) => {
                counter!(ROWS_WRITTEN).increment(written as u64);
                info!(
                    written,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Inserted {} rows into {}.{}",
                    written,
                    self.connector.database(),
                    self.table
                );
                Ok(written)
            }
            Err(e) => {
                error!(
                    error = %e,
                    attempted = records.len(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Error while writing rows, nothing was inserted"
                );
                Err(e)
            }
        }
    }

    async fn row_count(&self) -> Result<u64> {
        let mut conn = self.connector.connect().await?;
        let sql = format!("SELECT COUNT(*) FROM `{}`", self.table);
        let count: i64 = sqlx::query_scalar(&sql).fetch_one(&mut conn).await?;
        release(conn).await;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SourceRecord;
    use pretty_assertions::assert_eq;

    fn record(hash: &str) -> CaseRecord {
        CaseRecord::from_source(SourceRecord::default(), "A".into(), hash.into())
    }

    #[test]
    fn finds_bundled_ddl_by_table_name() {
        let ddl = create_table_statement("us_covid").unwrap();
        assert!(ddl.starts_with("CREATE TABLE us_covid"));
        assert!(!ddl.contains("IF NOT EXISTS"));
        assert!(ddl.contains("UNIQUE KEY `uq_us_covid_hash` (`hash`)"));
    }

    #[test]
    fn unknown_table_has_no_ddl() {
        let err = create_table_statement("uk_covid").unwrap_err();
        assert!(matches!(err, Error::Schema(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn table_exists_sqlstate_is_the_only_success_code() {
        assert!(is_table_exists_code(Some("42S01")));
        assert!(!is_table_exists_code(Some("42S02")));
        assert!(!is_table_exists_code(Some("42000")));
        assert!(!is_table_exists_code(Some("")));
        assert!(!is_table_exists_code(None));
    }

    #[derive(Debug)]
    struct ServerError(&'static str);

    impl std::fmt::Display for ServerError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "server error {}", self.0)
        }
    }

    impl std::error::Error for ServerError {}

    impl sqlx::error::DatabaseError for ServerError {
        fn message(&self) -> &str {
            "server error"
        }

        fn code(&self) -> Option<std::borrow::Cow<'_, str>> {
            Some(self.0.into())
        }

        fn as_error(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn std::error::Error + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> sqlx::error::ErrorKind {
            sqlx::error::ErrorKind::Other
        }
    }

    #[test]
    fn existing_table_error_means_already_exists() {
        let err = sqlx::Error::Database(Box::new(ServerError("42S01")));
        assert_eq!(create_table_error(err).unwrap(), TableStatus::AlreadyExists);
    }

    #[test]
    fn other_database_errors_from_create_table_propagate() {
        // 42000: access denied / syntax error
        let err = sqlx::Error::Database(Box::new(ServerError("42000")));
        let err = create_table_error(err).unwrap_err();
        assert_eq!(
            err.as_database_error().and_then(|db| db.code()).as_deref(),
            Some("42000")
        );
    }

    #[test]
    fn non_database_errors_from_create_table_propagate() {
        let err = create_table_error(sqlx::Error::PoolTimedOut).unwrap_err();
        assert!(matches!(err, sqlx::Error::PoolTimedOut));

        let err = create_table_error(sqlx::Error::Protocol("packet out of order".into())).unwrap_err();
        assert!(matches!(err, sqlx::Error::Protocol(_)));
    }

    #[test]
    fn every_insert_column_exists_in_ddl() {
        let ddl = create_table_statement("us_covid").unwrap();
        for column in INSERT_COLUMNS {
            assert!(ddl.contains(&format!("`{column}` ")), "missing column {column}");
        }
        assert!(!ddl.contains("`fips`"));
    }

    #[test]
    fn insert_binds_one_placeholder_per_column_and_row() {
        let rows = vec![record("a"), record("b"), record("c")];
        let builder = insert_statement("us_covid", &rows);
        let sql = builder.sql();

        assert!(sql.starts_with("INSERT INTO `us_covid` (`date`, `state`, "));
        assert_eq!(sql.matches('?').count(), INSERT_COLUMNS.len() * rows.len());
    }

    #[test]
    fn connector_reports_configured_database() {
        let mut config = covid_etl_core::Config::default().database;
        config.name = "covid_staging".into();
        assert_eq!(Connector::new(&config).database(), "covid_staging");
    }
}
