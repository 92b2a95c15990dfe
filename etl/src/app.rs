use crate::model::RunSummary;
use crate::pipeline::Pipeline;
use crate::source::HttpSource;
use crate::store::{Connector, MySqlStore};
use covid_etl_core::{Config, Result};
use std::sync::Arc;
use tracing::{info, instrument};

pub struct App {
    pipeline: Pipeline,
}

impl App {
    #[instrument(skip(config, connector))]
    pub async fn new(config: &Config, connector: Connector) -> Result<Self> {
        info!("Initializing application");

        // Health check
        let version = connector.server_version().await?;
        info!(
            host = %config.database.host,
            database = connector.database(),
            "Connected to MySQL server version {}",
            version
        );

        let source = HttpSource::new(&config.api)?;
        let store = MySqlStore::new(connector, config.database.table.clone());

        let pipeline = Pipeline::new(Arc::new(source), Arc::new(store), config.ingest.clone());

        Ok(Self { pipeline })
    }

    pub async fn run(&self) -> Result<RunSummary> {
        self.pipeline.run().await
    }
}
