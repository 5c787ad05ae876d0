use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::record_batch::RecordBatch;
use common::Result;
use common::config::Settings;
use datafusion::config::TableParquetOptions;
use datafusion::dataframe::{DataFrame, DataFrameWriteOptions};
use datafusion::execution::context::SessionContext;
use datafusion::execution::memory_pool::GreedyMemoryPool;
use datafusion::execution::runtime_env::RuntimeEnvBuilder;
use datafusion::prelude::{ParquetReadOptions, SessionConfig};
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;
use parquet::format::KeyValue;
use tracing::debug;

/// Version tag written into every Parquet footer. A schema change bumps this
/// tag instead of forking suffixed copies of the table family.
pub const SCHEMA_VERSION: &str = "3";

/// File-backed analytical store: one subdirectory of Parquet part files per
/// table, all registered on a single DataFusion session.
pub struct AnalyticalStore {
    ctx: SessionContext,
    root: PathBuf,
}

impl AnalyticalStore {
    pub async fn open(settings: &Settings) -> Result<Self> {
        let root = PathBuf::from(&settings.db.path);
        fs::create_dir_all(&root)?;

        let mut config = SessionConfig::new()
            .with_target_partitions(settings.etl.threads.max(1))
            .with_information_schema(true);
        // Read Parquet strings back as Utf8, matching the declared schemas
        config.options_mut().execution.parquet.schema_force_view_types = false;

        let ctx = match settings.etl.memory_limit_mb {
            Some(mb) => {
                let runtime = RuntimeEnvBuilder::new()
                    .with_memory_pool(Arc::new(GreedyMemoryPool::new(mb * 1024 * 1024)))
                    .build_arc()?;
                SessionContext::new_with_config_rt(config, runtime)
            }
            None => SessionContext::new_with_config(config),
        };

        crate::processor::udf::register_udfs(&ctx)?;

        let store = Self { ctx, root };
        store.register_existing().await?;
        Ok(store)
    }

    /// Registers every table directory already present in the store root,
    /// e.g. the raw feed written by the ingestion client.
    async fn register_existing(&self) -> Result<()> {
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_dir() || !contains_parquet(&path)? {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                let name = name.to_string();
                self.register(&name).await?;
                debug!(table = %name, "Registered existing table");
            }
        }
        Ok(())
    }

    pub fn session_context(&self) -> &SessionContext {
        &self.ctx
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn table_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub fn table_exists(&self, name: &str) -> Result<bool> {
        Ok(self.ctx.table_exist(name)?)
    }

    pub async fn sql(&self, sql: &str) -> Result<DataFrame> {
        self.ctx.sql(sql).await.map_err(|e| e.into())
    }

    pub async fn count(&self, name: &str) -> Result<u64> {
        let df = self.ctx.table(name).await?;
        Ok(df.count().await? as u64)
    }

    pub async fn register(&self, name: &str) -> Result<()> {
        // Clean up existing registration if present
        let _ = self.ctx.deregister_table(name);
        let path = self.table_path(name);
        self.ctx
            .register_parquet(
                name,
                path.to_string_lossy().as_ref(),
                ParquetReadOptions::default(),
            )
            .await?;
        Ok(())
    }

    pub async fn drop_table(&self, name: &str) -> Result<()> {
        let _ = self.ctx.deregister_table(name);
        let path = self.table_path(name);
        if path.exists() {
            fs::remove_dir_all(&path)?;
        }
        Ok(())
    }

    /// Drops any previous version of the table, streams the frame to Parquet
    /// and registers the result. This is the rebuild unit for every stage.
    pub async fn create_table(&self, name: &str, df: DataFrame) -> Result<()> {
        self.drop_table(name).await?;
        let path = self.table_path(name);
        df.write_parquet(
            path.to_string_lossy().as_ref(),
            DataFrameWriteOptions::new(),
            Some(table_parquet_options()),
        )
        .await?;
        self.register(name).await
    }

    pub async fn create_table_from_batches(
        &self,
        name: &str,
        batches: Vec<RecordBatch>,
    ) -> Result<()> {
        let df = self.ctx.read_batches(batches)?;
        self.create_table(name, df).await
    }

    /// Appends one bounded batch of rows as a numbered Parquet part file.
    /// The table is not registered until the caller finishes all parts.
    pub fn append_part(&self, name: &str, part: usize, batches: &[RecordBatch]) -> Result<()> {
        if batches.iter().all(|b| b.num_rows() == 0) {
            return Ok(());
        }
        let dir = self.table_path(name);
        fs::create_dir_all(&dir)?;
        let file = fs::File::create(dir.join(format!("part-{part:05}.parquet")))?;
        let mut writer = ArrowWriter::try_new(file, batches[0].schema(), Some(writer_properties()))?;
        for batch in batches {
            if batch.num_rows() > 0 {
                writer.write(batch)?;
            }
        }
        writer.close()?;
        Ok(())
    }

    /// Rewrites a registered table from a frame that reads the old contents:
    /// the new version lands in a scratch directory first and is swapped in
    /// with a rename, so a failed rewrite leaves the table untouched.
    pub async fn replace_table(&self, name: &str, df: DataFrame) -> Result<()> {
        let scratch = self.root.join(format!("{name}__rebuild"));
        if scratch.exists() {
            fs::remove_dir_all(&scratch)?;
        }
        df.write_parquet(
            scratch.to_string_lossy().as_ref(),
            DataFrameWriteOptions::new(),
            Some(table_parquet_options()),
        )
        .await?;

        self.drop_table(name).await?;
        fs::rename(&scratch, self.table_path(name))?;
        self.register(name).await
    }
}

fn contains_parquet(dir: &Path) -> Result<bool> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "parquet") {
            return Ok(true);
        }
    }
    Ok(false)
}

fn table_parquet_options() -> TableParquetOptions {
    let mut options = TableParquetOptions::default();
    options
        .key_value_metadata
        .insert("schema_version".to_string(), Some(SCHEMA_VERSION.to_string()));
    options
}

fn writer_properties() -> WriterProperties {
    WriterProperties::builder()
        .set_key_value_metadata(Some(vec![KeyValue {
            key: "schema_version".to_string(),
            value: Some(SCHEMA_VERSION.to_string()),
        }]))
        .build()
}
