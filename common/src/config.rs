use config::{Config, ConfigError};
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub db: DbConfig,
    #[serde(default = "default_etl_config")]
    pub etl: EtlConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    /// Directory holding the analytical store (one Parquet table per subdir).
    pub path: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EtlConfig {
    /// Truncate the raw source to a small fixed prefix for smoke-testing.
    #[serde(default)]
    pub debug: bool,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_threads")]
    pub threads: usize,
    #[serde(default)]
    pub memory_limit_mb: Option<usize>,
    #[serde(default = "default_metrics_path")]
    pub metrics_path: String,
    #[serde(default = "default_duplicate_log")]
    pub duplicate_log: String,
}

fn default_etl_config() -> EtlConfig {
    EtlConfig {
        debug: false,
        batch_size: default_batch_size(),
        threads: default_threads(),
        memory_limit_mb: None,
        metrics_path: default_metrics_path(),
        duplicate_log: default_duplicate_log(),
    }
}

fn default_batch_size() -> usize {
    100_000
}

fn default_threads() -> usize {
    8
}

fn default_metrics_path() -> String {
    "logs/build_metrics.json".to_string()
}

fn default_duplicate_log() -> String {
    "logs/duplicates_skipped.csv".to_string()
}

impl Settings {
    pub fn new(path: &str) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("APP").separator("_"));

        // Build the configuration
        let config = builder.build()?;

        // Try to deserialize the entire configuration; a missing db.path
        // surfaces here as a fatal ConfigError before any stage runs.
        let settings: Settings = config.try_deserialize()?;

        debug!(
            store = %settings.db.path,
            debug_mode = settings.etl.debug,
            batch_size = settings.etl.batch_size,
            "Parsed warehouse settings"
        );

        Ok(settings)
    }
}
