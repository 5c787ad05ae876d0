//! Fact table build. Staging rows are resolved against every dimension by
//! natural key, one batch at a time: partitioned by calendar month, then
//! windowed by the configured batch size inside each month so a skewed
//! month cannot blow the batch bound. Rows whose created date fails to
//! parse form a final partition of their own, so every staging row lands in
//! the fact table. Unresolved foreign keys fall back to the -1 sentinel.

use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;

use arrow::array::{Array, BooleanArray, Int32Array, Int64Array, StringArray};
use arrow::compute::filter_record_batch;
use arrow::csv;
use arrow::record_batch::RecordBatch;
use common::config::Settings;
use common::{Error, Result};
use tracing::{info, warn};

use super::dimensions::{STAGING_TABLE, location};
use crate::store::AnalyticalStore;

pub const FACT_TABLE: &str = "fact_requests";

/// Rebuilds `fact_requests` from the staging table and the six dimensions.
pub async fn build(store: &AnalyticalStore, settings: &Settings) -> Result<()> {
    super::dimensions::require_staging(store)?;
    store.drop_table(FACT_TABLE).await?;

    let batch_size = settings.etl.batch_size.max(1);
    let partitions = partition_predicates(store).await?;
    info!(partitions = partitions.len(), batch_size, "Starting fact build");

    let mut dup_log = DuplicateLog::new(&settings.etl.duplicate_log)?;
    let mut part_no = 0usize;
    let mut rows_written = 0u64;

    for predicate in &partitions {
        let total = scalar_count(
            store,
            &format!("SELECT COUNT(*) FROM {STAGING_TABLE} WHERE {predicate}"),
        )
        .await?;

        let mut offset = 0u64;
        while offset < total {
            let sql = batch_sql(predicate, batch_size, offset as usize);
            let batches = store.sql(&sql).await?.collect().await?;

            let mut seen = HashSet::new();
            let (kept, duplicates) = split_duplicates(&batches, &mut seen)?;
            if !duplicates.is_empty() {
                let skipped: usize = duplicates.iter().map(|b| b.num_rows()).sum();
                warn!(skipped, offset, "Skipped rows with already-seen request ids");
                dup_log.append(&duplicates)?;
            }

            rows_written += kept.iter().map(|b| b.num_rows() as u64).sum::<u64>();
            store.append_part(FACT_TABLE, part_no, &kept)?;
            part_no += 1;
            offset += batch_size as u64;
        }
    }

    if rows_written == 0 {
        warn!("Staging produced no fact rows; fact table not created");
        return Ok(());
    }

    store.register(FACT_TABLE).await?;
    assign_fact_ids(store).await?;

    info!(rows = rows_written, "Fact build complete");
    log_join_gaps(store).await
}

/// One predicate per calendar month present in staging, plus a final one for
/// rows whose created date cannot be parsed.
async fn partition_predicates(store: &AnalyticalStore) -> Result<Vec<String>> {
    let df = store
        .sql(&format!(
            "SELECT DISTINCT \
                 CAST(EXTRACT(YEAR FROM TRY_CAST(created_date AS TIMESTAMP)) AS INT) AS year, \
                 CAST(EXTRACT(MONTH FROM TRY_CAST(created_date AS TIMESTAMP)) AS INT) AS month \
             FROM {STAGING_TABLE} \
             WHERE TRY_CAST(created_date AS TIMESTAMP) IS NOT NULL \
             ORDER BY year, month"
        ))
        .await?;

    let mut predicates = Vec::new();
    for batch in df.collect().await? {
        let years = int32_column(&batch, 0)?;
        let months = int32_column(&batch, 1)?;
        for i in 0..batch.num_rows() {
            predicates.push(month_predicate(years.value(i), months.value(i)));
        }
    }
    predicates.push("TRY_CAST(created_date AS TIMESTAMP) IS NULL".to_string());
    Ok(predicates)
}

fn month_predicate(year: i32, month: i32) -> String {
    format!(
        "EXTRACT(YEAR FROM TRY_CAST(created_date AS TIMESTAMP)) = {year} \
         AND EXTRACT(MONTH FROM TRY_CAST(created_date AS TIMESTAMP)) = {month}"
    )
}

/// The per-batch resolution query. Dimension lookups use the same
/// normalization as the dimension builds; `IS NOT DISTINCT FROM` keeps
/// null-keyed rows joinable. The location lookup targets the first ordinal
/// of the shared natural-key hash.
fn batch_sql(predicate: &str, batch_size: usize, offset: usize) -> String {
    let location_key = format!("concat({}, '_1')", location::location_hash_raw("k"));
    format!(
        "WITH batch AS ( \
             SELECT * FROM {STAGING_TABLE} \
             WHERE {predicate} \
             ORDER BY sr_number \
             LIMIT {batch_size} OFFSET {offset} \
         ), \
         keyed AS ( \
             SELECT b.*, \
                 TRY_CAST(b.created_date AS TIMESTAMP) AS created_ts, \
                 TRY_CAST(b.last_modified_date AS TIMESTAMP) AS last_modified_ts, \
                 TRY_CAST(b.closed_date AS TIMESTAMP) AS closed_ts, \
                 concat(b.sr_number, '_', CAST(ROW_NUMBER() OVER ( \
                     PARTITION BY b.sr_number \
                     ORDER BY TRY_CAST(b.created_date AS TIMESTAMP) ASC NULLS LAST \
                 ) AS VARCHAR)) AS request_id \
             FROM batch b \
         ) \
         SELECT \
             k.request_id, \
             k.sr_number, \
             k.status, \
             k.created_ts, \
             k.last_modified_ts, \
             k.closed_ts, \
             CASE WHEN k.closed_ts IS NOT NULL AND k.created_ts IS NOT NULL \
                  THEN (to_unixtime(k.closed_ts) - to_unixtime(k.created_ts)) / 3600.0 \
             END AS closure_time, \
             k.duplicate, \
             k.legacy_record, \
             k.legacy_sr_number, \
             k.parent_sr_number, \
             COALESCE(s.service_id, -1) AS service_id, \
             COALESCE(d.department_id, -1) AS department_id, \
             COALESCE(t.time_id, -1) AS time_id, \
             COALESCE(l.location_id, -1) AS location_id, \
             COALESCE(g.geography_id, -1) AS geography_id, \
             COALESCE(i.infrastructure_id, -1) AS infrastructure_id \
         FROM keyed k \
         LEFT JOIN dim_service s \
             ON COALESCE(NULLIF(TRIM(k.sr_type), ''), 'Unknown Service') = s.service_name \
            AND COALESCE(NULLIF(TRIM(k.sr_short_code), ''), 'UNK') = s.service_short_code \
            AND COALESCE(NULLIF(TRIM(k.origin), ''), 'Unknown Origin') = s.service_origin \
         LEFT JOIN dim_department d \
             ON COALESCE(NULLIF(TRIM(k.owner_department), ''), 'Unknown Department') = d.department_name \
            AND COALESCE(NULLIF(TRIM(k.created_department), ''), 'Unknown Creator') = d.created_department \
         LEFT JOIN dim_time t \
             ON CAST(k.created_ts AS DATE) = t.date_id \
         LEFT JOIN dim_location l \
             ON {location_key} = l.location_key \
         LEFT JOIN dim_geography g \
             ON (NULLIF(TRIM(k.community_area), '') IS NOT DISTINCT FROM g.community_area) \
            AND (TRY_CAST(NULLIF(TRIM(k.ward), '') AS INTEGER) IS NOT DISTINCT FROM g.ward) \
            AND (NULLIF(TRIM(k.police_district), '') IS NOT DISTINCT FROM g.police_district) \
            AND (NULLIF(TRIM(k.police_beat), '') IS NOT DISTINCT FROM g.police_beat) \
            AND (NULLIF(TRIM(k.police_sector), '') IS NOT DISTINCT FROM g.police_sector) \
            AND (NULLIF(TRIM(k.precinct), '') IS NOT DISTINCT FROM g.precinct) \
         LEFT JOIN dim_infrastructure i \
             ON (NULLIF(TRIM(k.electrical_district), '') IS NOT DISTINCT FROM i.electrical_district) \
            AND (NULLIF(TRIM(k.electricity_grid), '') IS NOT DISTINCT FROM i.electricity_grid) \
            AND (NULLIF(TRIM(k.sanitation_division_days), '') IS NOT DISTINCT FROM i.sanitation_division_days) \
         ORDER BY k.request_id"
    )
}

/// Splits each batch into unseen rows and duplicate rows. The guard lives
/// for one batch only: dedup guarantees an sr_number appears in exactly one
/// batch, so it never needs to hold more than a batch of ids.
fn split_duplicates(
    batches: &[RecordBatch],
    seen: &mut HashSet<String>,
) -> Result<(Vec<RecordBatch>, Vec<RecordBatch>)> {
    let mut kept = Vec::new();
    let mut duplicates = Vec::new();

    for batch in batches {
        if batch.num_rows() == 0 {
            continue;
        }
        let idx = batch.schema().index_of("request_id")?;
        let ids = batch
            .column(idx)
            .as_any()
            .downcast_ref::<StringArray>()
            .ok_or_else(|| Error::InvalidInput("request_id must be a string column".to_string()))?;

        let keep_mask: BooleanArray = (0..ids.len())
            .map(|i| {
                if ids.is_null(i) {
                    Some(true)
                } else {
                    Some(seen.insert(ids.value(i).to_string()))
                }
            })
            .collect();

        let keep = filter_record_batch(batch, &keep_mask)?;
        if keep.num_rows() < batch.num_rows() {
            let drop_mask: BooleanArray =
                keep_mask.iter().map(|v| v.map(|kept| !kept)).collect();
            duplicates.push(filter_record_batch(batch, &drop_mask)?);
        }
        kept.push(keep);
    }
    Ok((kept, duplicates))
}

/// Second pass over the finished fact table only: assigns a dense fact_id in
/// a deterministic order, then swaps the rewritten table in atomically.
async fn assign_fact_ids(store: &AnalyticalStore) -> Result<()> {
    let df = store
        .sql(&format!(
            "SELECT \
                 CAST(ROW_NUMBER() OVER ( \
                     ORDER BY created_ts ASC NULLS LAST, sr_number ASC NULLS LAST \
                 ) AS BIGINT) AS fact_id, \
                 * \
             FROM {FACT_TABLE}"
        ))
        .await?;
    store.replace_table(FACT_TABLE, df).await
}

/// Sentinel counts per foreign-key axis, logged as the join-gap report.
async fn log_join_gaps(store: &AnalyticalStore) -> Result<()> {
    let axes = [
        "service_id",
        "department_id",
        "time_id",
        "location_id",
        "geography_id",
        "infrastructure_id",
    ];
    let sums: Vec<String> = axes
        .iter()
        .map(|axis| format!("SUM(CASE WHEN {axis} = -1 THEN 1 ELSE 0 END) AS {axis}_gaps"))
        .collect();
    let df = store
        .sql(&format!("SELECT {} FROM {FACT_TABLE}", sums.join(", ")))
        .await?;

    let batches = df.collect().await?;
    let Some(batch) = batches.first().filter(|b| b.num_rows() > 0) else {
        return Ok(());
    };
    for (i, axis) in axes.iter().enumerate() {
        let gaps = batch
            .column(i)
            .as_any()
            .downcast_ref::<Int64Array>()
            .map(|a| if a.is_null(0) { 0 } else { a.value(0) })
            .unwrap_or(0);
        if gaps > 0 {
            warn!(axis, gaps, "Fact rows resolved to the sentinel key");
        }
    }
    Ok(())
}

async fn scalar_count(store: &AnalyticalStore, sql: &str) -> Result<u64> {
    let batches = store.sql(sql).await?.collect().await?;
    let Some(batch) = batches.first().filter(|b| b.num_rows() > 0) else {
        return Ok(0);
    };
    let counts = batch
        .column(0)
        .as_any()
        .downcast_ref::<Int64Array>()
        .ok_or_else(|| Error::InvalidInput("expected a count column".to_string()))?;
    Ok(counts.value(0) as u64)
}

fn int32_column<'a>(batch: &'a RecordBatch, idx: usize) -> Result<&'a Int32Array> {
    batch
        .column(idx)
        .as_any()
        .downcast_ref::<Int32Array>()
        .ok_or_else(|| Error::InvalidInput("expected an int32 column".to_string()))
}

/// Appends duplicate rows to the CSV side log, writing the header once.
struct DuplicateLog {
    path: PathBuf,
    rows_logged: usize,
}

impl DuplicateLog {
    fn new(path: &str) -> Result<Self> {
        let path = PathBuf::from(path);
        if path.exists() {
            fs::remove_file(&path)?;
        }
        Ok(Self { path, rows_logged: 0 })
    }

    fn append(&mut self, batches: &[RecordBatch]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut writer = csv::WriterBuilder::new()
            .with_header(self.rows_logged == 0)
            .build(file);
        for batch in batches {
            if batch.num_rows() > 0 {
                writer.write(batch)?;
                self.rows_logged += batch.num_rows();
            }
        }
        Ok(())
    }
}
