//! Post-build quality profiling. Every probe is best-effort: a failing
//! query records `None` for that measurement and the profile carries on, so
//! a malformed column can never fail the pipeline after the tables are
//! already built.

use std::collections::BTreeMap;

use arrow::array::{Array, Int64Array};
use common::Result;
use serde::Serialize;
use tracing::{info, warn};

use crate::store::AnalyticalStore;

#[derive(Debug, Clone, Serialize)]
pub struct QualityRecord {
    pub total_records: u64,
    /// Fraction of rows per key column that are NULL, blank, or the literal
    /// placeholder 'Unknown'. `None` when the probe failed.
    pub column_null_rates: BTreeMap<String, Option<f64>>,
    /// `count(*) - count(distinct pk)` for the first `*_id` column, `None`
    /// when the table has no such column or the probe failed.
    pub pk_duplicates: Option<i64>,
    /// Dangling references per foreign-key axis: rows whose key is not the
    /// -1 sentinel yet matches no dimension row. Populated for the fact
    /// table only; `None` when the probe failed.
    pub referential_gaps: BTreeMap<String, Option<i64>>,
}

/// Fact foreign-key axes and the dimension key each must resolve into.
pub const FK_AXES: &[(&str, &str, &str)] = &[
    ("service_id", "dim_service", "service_id"),
    ("department_id", "dim_department", "department_id"),
    ("time_id", "dim_time", "time_id"),
    ("location_id", "dim_location", "location_id"),
    ("geography_id", "dim_geography", "geography_id"),
    ("infrastructure_id", "dim_infrastructure", "infrastructure_id"),
];

/// Profiles one table against its designated key columns.
pub async fn profile_table(
    store: &AnalyticalStore,
    table: &str,
    key_columns: &[&str],
) -> Result<QualityRecord> {
    let total = store.count(table).await?;

    let mut column_null_rates = BTreeMap::new();
    for column in key_columns {
        let rate = match scalar(
            store,
            &format!(
                "SELECT COUNT(*) FROM {table} \
                 WHERE {column} IS NULL \
                    OR TRIM(CAST({column} AS VARCHAR)) = '' \
                    OR CAST({column} AS VARCHAR) = 'Unknown'"
            ),
        )
        .await
        {
            Ok(nulls) if total > 0 => Some(nulls as f64 / total as f64),
            Ok(_) => Some(0.0),
            Err(e) => {
                warn!(table, column, error = %e, "Null-rate probe failed");
                None
            }
        };
        column_null_rates.insert((*column).to_string(), rate);
    }

    let pk_duplicates = match surrogate_column(store, table).await {
        Some(pk) => {
            match scalar(
                store,
                &format!("SELECT COUNT(*) - COUNT(DISTINCT {pk}) FROM {table}"),
            )
            .await
            {
                Ok(dups) => Some(dups),
                Err(e) => {
                    warn!(table, pk, error = %e, "Duplicate probe failed");
                    None
                }
            }
        }
        None => None,
    };

    let record = QualityRecord {
        total_records: total,
        column_null_rates,
        pk_duplicates,
        referential_gaps: BTreeMap::new(),
    };
    info!(table, total = record.total_records, ?record.pk_duplicates, "Profiled table");
    Ok(record)
}

/// Counts dangling references per foreign-key axis of the given fact table.
/// Best-effort like the other probes: a failing axis records `None`.
pub async fn profile_references(
    store: &AnalyticalStore,
    table: &str,
) -> BTreeMap<String, Option<i64>> {
    let mut gaps = BTreeMap::new();
    for (axis, dim_table, dim_key) in FK_AXES.iter().copied() {
        let probe = format!(
            "SELECT COUNT(*) FROM {table} f \
             LEFT JOIN {dim_table} d ON f.{axis} = d.{dim_key} \
             WHERE f.{axis} <> -1 AND d.{dim_key} IS NULL"
        );
        let gap = match scalar(store, &probe).await {
            Ok(count) => {
                if count > 0 {
                    warn!(table, axis, dangling = count, "Dangling foreign keys");
                }
                Some(count)
            }
            Err(e) => {
                warn!(table, axis, error = %e, "Referential probe failed");
                None
            }
        };
        gaps.insert(axis.to_string(), gap);
    }
    gaps
}

/// First column whose name ends in `_id`, taken as the surrogate key.
async fn surrogate_column(store: &AnalyticalStore, table: &str) -> Option<String> {
    let df = store.sql(&format!("SELECT * FROM {table} LIMIT 0")).await.ok()?;
    df.schema()
        .fields()
        .iter()
        .find(|f| f.name().ends_with("_id"))
        .map(|f| f.name().clone())
}

async fn scalar(store: &AnalyticalStore, sql: &str) -> Result<i64> {
    let batches = store.sql(sql).await?.collect().await?;
    let Some(batch) = batches.first().filter(|b| b.num_rows() > 0) else {
        return Ok(0);
    };
    let values = batch
        .column(0)
        .as_any()
        .downcast_ref::<Int64Array>()
        .ok_or_else(|| common::Error::InvalidInput("expected an int64 column".to_string()))?;
    Ok(if values.is_null(0) { 0 } else { values.value(0) })
}
