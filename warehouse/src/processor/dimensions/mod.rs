//! Dimension builds. Each dimension extracts its distinct natural key from
//! the staging copy, assigns a dense surrogate via ROW_NUMBER over a fixed
//! ascending sort, enriches through rule cascades and drops-and-recreates
//! its table. Rebuilding from unchanged input reproduces identical keys.

use common::{Error, Result};
use tracing::info;

use crate::processor::dedup::DEDUP_TABLE;
use crate::store::AnalyticalStore;

pub mod department;
pub mod geography;
pub mod infrastructure;
pub mod location;
pub mod rules;
pub mod service;
pub mod time;

pub const STAGING_TABLE: &str = "fact_requests_staging";

/// Snapshots the deduplicated feed into the staging table every dimension
/// and the fact build read from. Fails before any write when the dedup
/// stage has not run.
pub async fn create_staging(store: &AnalyticalStore) -> Result<()> {
    if !store.table_exists(DEDUP_TABLE)? {
        return Err(Error::SourceMissing(DEDUP_TABLE.to_string()));
    }

    let df = store.sql(&format!("SELECT * FROM {DEDUP_TABLE}")).await?;
    store.create_table(STAGING_TABLE, df).await?;

    let rows = store.count(STAGING_TABLE).await?;
    info!(rows, "Staging table ready");
    Ok(())
}

/// Guard shared by every dimension build.
pub fn require_staging(store: &AnalyticalStore) -> Result<()> {
    if !store.table_exists(STAGING_TABLE)? {
        return Err(Error::SourceMissing(STAGING_TABLE.to_string()));
    }
    Ok(())
}
