use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use common::Result;
use serde::Serialize;
use tracing::info;

use crate::processor::quality::QualityRecord;

/// Run artifact: per-stage wall time and per-table quality profile,
/// serialized to JSON at the configured metrics path after every run.
#[derive(Debug, Default, Serialize)]
pub struct BuildMetrics {
    pub performance: BTreeMap<String, f64>,
    pub quality: BTreeMap<String, QualityRecord>,
}

impl BuildMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_stage(&mut self, stage: &str, elapsed_secs: f64) {
        self.performance.insert(stage.to_string(), elapsed_secs);
    }

    pub fn record_quality(&mut self, table: &str, record: QualityRecord) {
        self.quality.insert(table.to_string(), record);
    }

    pub fn export(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = fs::File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;
        info!(path = %path.display(), "Exported build metrics");
        Ok(())
    }
}
