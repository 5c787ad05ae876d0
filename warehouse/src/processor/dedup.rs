//! Identifier-level deduplication of the raw feed. The upstream portal
//! re-exports a request every time it is touched, so the same sr_number can
//! appear many times; only the earliest-created row survives.

use arrow::array::{Array, Int64Array};
use common::config::Settings;
use common::{Error, Result};
use tracing::{info, warn};

use crate::schema::{RAW_COLUMNS, raw_select_list};
use crate::store::AnalyticalStore;

pub const RAW_TABLE: &str = "raw_requests";
pub const DEDUP_TABLE: &str = "raw_requests_dedup";

/// Survivor order within one sr_number group: earliest parseable created
/// timestamp first, then every remaining raw column, so rows tying on the
/// timestamp still resolve to the same survivor under any scan order.
fn survivor_order() -> String {
    let mut keys = vec!["TRY_CAST(created_date AS TIMESTAMP) ASC NULLS LAST".to_string()];
    keys.extend(
        RAW_COLUMNS
            .iter()
            .filter(|column| **column != "sr_number")
            .map(|column| format!("{column} ASC NULLS LAST")),
    );
    keys.join(", ")
}

/// Rebuilds `raw_requests_dedup` with exactly one row per sr_number, keeping
/// the row with the minimum parseable created timestamp. Ties break over the
/// full raw column order so reruns pick the same survivor. Debug mode takes
/// a small fixed prefix instead.
pub async fn run(store: &AnalyticalStore, settings: &Settings) -> Result<()> {
    if !store.table_exists(RAW_TABLE)? {
        return Err(Error::SourceMissing(RAW_TABLE.to_string()));
    }

    let raw_rows = store.count(RAW_TABLE).await?;
    let select_list = raw_select_list();

    let sql = if settings.etl.debug {
        warn!("Debug mode: deduplicating a 10-row sample only");
        format!("SELECT {select_list} FROM {RAW_TABLE} LIMIT 10")
    } else {
        format!(
            "SELECT {select_list} FROM ( \
                 SELECT *, ROW_NUMBER() OVER ( \
                     PARTITION BY sr_number \
                     ORDER BY {order} \
                 ) AS rn \
                 FROM {RAW_TABLE} \
             ) t WHERE rn = 1",
            order = survivor_order()
        )
    };

    let df = store.sql(&sql).await?;
    store.create_table(DEDUP_TABLE, df).await?;

    let kept = store.count(DEDUP_TABLE).await?;
    info!(raw_rows, kept, removed = raw_rows - kept, "Deduplication complete");

    profile_critical_fields(store).await
}

/// Post-dedup profile of the fields every downstream stage depends on.
async fn profile_critical_fields(store: &AnalyticalStore) -> Result<()> {
    let df = store
        .sql(&format!(
            "SELECT \
                 COUNT(*) AS total, \
                 SUM(CASE WHEN sr_number IS NULL OR TRIM(sr_number) = '' THEN 1 ELSE 0 END) AS missing_sr_number, \
                 SUM(CASE WHEN created_date IS NULL OR TRIM(created_date) = '' THEN 1 ELSE 0 END) AS missing_created_date, \
                 SUM(CASE WHEN sr_type IS NULL OR TRIM(sr_type) = '' THEN 1 ELSE 0 END) AS missing_sr_type, \
                 SUM(CASE WHEN status IS NULL OR TRIM(status) = '' THEN 1 ELSE 0 END) AS missing_status, \
                 SUM(CASE WHEN created_department IS NULL OR TRIM(created_department) = '' THEN 1 ELSE 0 END) AS missing_created_department \
             FROM {DEDUP_TABLE}"
        ))
        .await?;

    let batches = df.collect().await?;
    let Some(batch) = batches.first().filter(|b| b.num_rows() > 0) else {
        return Ok(());
    };

    let value = |idx: usize| -> i64 {
        batch
            .column(idx)
            .as_any()
            .downcast_ref::<Int64Array>()
            .map(|a| if a.is_null(0) { 0 } else { a.value(0) })
            .unwrap_or(0)
    };

    info!(
        total = value(0),
        missing_sr_number = value(1),
        missing_created_date = value(2),
        missing_sr_type = value(3),
        missing_status = value(4),
        missing_created_department = value(5),
        "Critical field profile"
    );
    if value(1) > 0 {
        warn!(rows = value(1), "Rows without an sr_number survive dedup as distinct keys");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{RAW_COLUMNS, raw_requests_schema};
    use arrow::array::{ArrayRef, StringArray};
    use arrow::record_batch::RecordBatch;
    use common::config::{DbConfig, EtlConfig};
    use std::collections::HashMap;
    use std::sync::Arc;

    fn test_settings(dir: &std::path::Path) -> Settings {
        Settings {
            db: DbConfig { path: dir.to_string_lossy().into_owned() },
            etl: EtlConfig {
                debug: false,
                batch_size: 1000,
                threads: 2,
                memory_limit_mb: None,
                metrics_path: dir.join("metrics.json").to_string_lossy().into_owned(),
                duplicate_log: dir.join("dups.csv").to_string_lossy().into_owned(),
            },
        }
    }

    fn raw_batch(rows: &[HashMap<&str, &str>]) -> RecordBatch {
        let schema = Arc::new(raw_requests_schema());
        let columns: Vec<ArrayRef> = RAW_COLUMNS
            .iter()
            .map(|name| {
                let values: Vec<Option<&str>> =
                    rows.iter().map(|r| r.get(name).copied()).collect();
                Arc::new(StringArray::from(values)) as ArrayRef
            })
            .collect();
        RecordBatch::try_new(schema, columns).unwrap()
    }

    fn row(pairs: &[(&'static str, &'static str)]) -> HashMap<&'static str, &'static str> {
        pairs.iter().copied().collect()
    }

    #[tokio::test]
    async fn test_keeps_earliest_created_row() {
        let dir = tempfile::tempdir().unwrap();
        let settings = test_settings(dir.path());
        let store = AnalyticalStore::open(&settings).await.unwrap();

        let batch = raw_batch(&[
            row(&[
                ("sr_number", "SR100"),
                ("created_date", "2023-01-05 10:00:00"),
                ("status", "Open"),
            ]),
            row(&[
                ("sr_number", "SR100"),
                ("created_date", "2023-01-02 09:00:00"),
                ("status", "Completed"),
            ]),
            row(&[
                ("sr_number", "SR200"),
                ("created_date", "2023-02-01 08:00:00"),
                ("status", "Open"),
            ]),
        ]);
        store
            .create_table_from_batches(RAW_TABLE, vec![batch])
            .await
            .unwrap();

        run(&store, &settings).await.unwrap();

        assert_eq!(store.count(DEDUP_TABLE).await.unwrap(), 2);
        let batches = store
            .sql(&format!(
                "SELECT status FROM {DEDUP_TABLE} WHERE sr_number = 'SR100'"
            ))
            .await
            .unwrap()
            .collect()
            .await
            .unwrap();
        let status = batches[0]
            .column(0)
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        assert_eq!(status.value(0), "Completed");
    }

    #[test]
    fn test_survivor_order_ties_on_every_raw_column() {
        let order = survivor_order();
        assert!(order.starts_with("TRY_CAST(created_date AS TIMESTAMP) ASC NULLS LAST"));
        // The partition key never sorts; everything else does
        assert!(!order.contains("sr_number ASC"));
        assert!(order.contains("status ASC NULLS LAST"));
        assert!(order.contains("parent_sr_number ASC NULLS LAST"));
    }

    #[tokio::test]
    async fn test_equal_created_dates_pick_stable_survivor() {
        let dir = tempfile::tempdir().unwrap();
        let settings = test_settings(dir.path());
        let store = AnalyticalStore::open(&settings).await.unwrap();

        // Same sr_number, same created timestamp, different status. The
        // column tie-break favors 'Completed' over 'Open' regardless of
        // input or scan order.
        let batch = raw_batch(&[
            row(&[
                ("sr_number", "SR100"),
                ("created_date", "2023-01-02 09:00:00"),
                ("status", "Open"),
            ]),
            row(&[
                ("sr_number", "SR100"),
                ("created_date", "2023-01-02 09:00:00"),
                ("status", "Completed"),
            ]),
        ]);
        store
            .create_table_from_batches(RAW_TABLE, vec![batch])
            .await
            .unwrap();

        run(&store, &settings).await.unwrap();

        assert_eq!(store.count(DEDUP_TABLE).await.unwrap(), 1);
        let batches = store
            .sql(&format!("SELECT status FROM {DEDUP_TABLE}"))
            .await
            .unwrap()
            .collect()
            .await
            .unwrap();
        let status = batches[0]
            .column(0)
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        assert_eq!(status.value(0), "Completed");
    }

    #[tokio::test]
    async fn test_missing_source_fails_before_writing() {
        let dir = tempfile::tempdir().unwrap();
        let settings = test_settings(dir.path());
        let store = AnalyticalStore::open(&settings).await.unwrap();

        let err = run(&store, &settings).await.unwrap_err();
        assert!(matches!(err, Error::SourceMissing(ref t) if t == RAW_TABLE));
        assert!(!store.table_exists(DEDUP_TABLE).unwrap());
    }

    #[tokio::test]
    async fn test_rerun_replaces_previous_output() {
        let dir = tempfile::tempdir().unwrap();
        let settings = test_settings(dir.path());
        let store = AnalyticalStore::open(&settings).await.unwrap();

        let batch = raw_batch(&[row(&[
            ("sr_number", "SR100"),
            ("created_date", "2023-01-05 10:00:00"),
        ])]);
        store
            .create_table_from_batches(RAW_TABLE, vec![batch])
            .await
            .unwrap();

        run(&store, &settings).await.unwrap();
        run(&store, &settings).await.unwrap();
        assert_eq!(store.count(DEDUP_TABLE).await.unwrap(), 1);
    }
}
