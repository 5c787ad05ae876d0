pub mod hash;
pub mod metrics;
pub mod processor;
pub mod schema;
pub mod store;

use std::path::Path;

use common::Result;
use common::config::Settings;
use processor::StarSchemaProcessor;
use store::AnalyticalStore;
use tracing::info;

/// Runs the complete warehouse build: load settings, open the analytical
/// store, execute every stage, then export the metrics artifact.
pub async fn run_warehouse_pipeline(config_path: &str) -> Result<()> {
    let settings = Settings::new(config_path)?;

    let store = AnalyticalStore::open(&settings).await?;
    info!(store = %settings.db.path, "Opened analytical store");

    let metrics = StarSchemaProcessor::new(&store, &settings).run().await?;
    metrics.export(Path::new(&settings.etl.metrics_path))?;

    Ok(())
}
