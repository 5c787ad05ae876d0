//! Pipeline orchestration. Stages run strictly in dependency order; each is
//! timed into the metrics artifact and a failure aborts the run wrapped in
//! a stage error, leaving the tables of completed stages in place.

use std::future::Future;
use std::time::Instant;

use common::config::Settings;
use common::{Error, Result};
use tracing::info;

use crate::metrics::BuildMetrics;
use crate::store::AnalyticalStore;

pub mod dedup;
pub mod dimensions;
pub mod fact;
pub mod quality;
pub mod udf;

/// Tables profiled after the build, with their designated key columns.
const QUALITY_TARGETS: &[(&str, &[&str])] = &[
    (dedup::DEDUP_TABLE, &["sr_number", "created_date", "sr_type", "status"]),
    (dimensions::STAGING_TABLE, &["sr_number", "created_date", "sr_type", "status"]),
    ("dim_service", &["service_name", "service_category"]),
    ("dim_department", &["department_name", "department_type"]),
    ("dim_location", &["street_address", "ward"]),
    ("dim_time", &["year", "season"]),
    ("dim_geography", &["ward", "police_district"]),
    ("dim_infrastructure", &["electrical_district", "utility_type"]),
    (fact::FACT_TABLE, &["status"]),
];

pub struct StarSchemaProcessor<'a> {
    store: &'a AnalyticalStore,
    settings: &'a Settings,
    metrics: BuildMetrics,
}

impl<'a> StarSchemaProcessor<'a> {
    pub fn new(store: &'a AnalyticalStore, settings: &'a Settings) -> Self {
        Self { store, settings, metrics: BuildMetrics::new() }
    }

    /// Runs the full build and returns the collected metrics.
    pub async fn run(mut self) -> Result<BuildMetrics> {
        let store = self.store;
        let settings = self.settings;

        self.timed("dedup", dedup::run(store, settings)).await?;
        self.timed("staging", dimensions::create_staging(store)).await?;
        self.timed("dim_service", dimensions::service::build(store)).await?;
        self.timed("dim_department", dimensions::department::build(store)).await?;
        self.timed("dim_location", dimensions::location::build(store)).await?;
        self.timed("dim_time", dimensions::time::build(store)).await?;
        self.timed("dim_geography", dimensions::geography::build(store)).await?;
        self.timed("dim_infrastructure", dimensions::infrastructure::build(store)).await?;
        self.timed("fact", fact::build(store, settings)).await?;

        let start = Instant::now();
        if let Err(source) = self.profile_quality().await {
            return Err(Error::stage("quality", start.elapsed().as_millis(), source));
        }

        info!("Star schema build complete");
        Ok(self.metrics)
    }

    async fn timed<F>(&mut self, stage: &'static str, fut: F) -> Result<()>
    where
        F: Future<Output = Result<()>>,
    {
        info!(stage, "Starting stage");
        let start = Instant::now();
        match fut.await {
            Ok(()) => {
                let elapsed = start.elapsed();
                self.metrics.record_stage(stage, elapsed.as_secs_f64());
                info!(stage, elapsed_ms = elapsed.as_millis() as u64, "Stage complete");
                Ok(())
            }
            Err(source) => Err(Error::stage(stage, start.elapsed().as_millis(), source)),
        }
    }

    async fn profile_quality(&mut self) -> Result<()> {
        let start = Instant::now();
        for (table, key_columns) in QUALITY_TARGETS {
            if !self.store.table_exists(table)? {
                continue;
            }
            let mut record = quality::profile_table(self.store, table, key_columns).await?;
            if *table == fact::FACT_TABLE {
                record.referential_gaps = quality::profile_references(self.store, table).await;
            }
            self.metrics.record_quality(table, record);
        }
        self.metrics.record_stage("quality", start.elapsed().as_secs_f64());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{RAW_COLUMNS, raw_requests_schema};
    use arrow::array::{Array, ArrayRef, Float64Array, Int64Array, StringArray};
    use arrow::record_batch::RecordBatch;
    use common::config::{DbConfig, EtlConfig};
    use std::collections::HashMap;
    use std::sync::Arc;

    fn test_settings(dir: &std::path::Path) -> Settings {
        Settings {
            db: DbConfig { path: dir.to_string_lossy().into_owned() },
            etl: EtlConfig {
                debug: false,
                // Small enough to force sub-batching within January
                batch_size: 2,
                threads: 2,
                memory_limit_mb: None,
                metrics_path: dir.join("metrics.json").to_string_lossy().into_owned(),
                duplicate_log: dir.join("dups.csv").to_string_lossy().into_owned(),
            },
        }
    }

    fn row(pairs: &[(&'static str, &'static str)]) -> HashMap<&'static str, &'static str> {
        pairs.iter().copied().collect()
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

    const SHARED_ADDRESS: &[(&str, &str)] = &[
        ("street_address", "100 N STATE ST"),
        ("city", "Chicago"),
        ("zip_code", "60602"),
        ("ward", "42"),
        ("community_area", "32"),
        ("police_district", "1"),
        ("latitude", "41.8781"),
        ("longitude", "-87.6298"),
    ];

    fn fixture() -> RecordBatch {
        let with_address = |mut r: HashMap<&'static str, &'static str>| {
            r.extend(SHARED_ADDRESS.iter().copied());
            r
        };
        raw_batch(&[
            // Re-exported copy; loses dedup to the earlier row below
            with_address(row(&[
                ("sr_number", "SR1001"),
                ("sr_type", "Pothole in Street"),
                ("sr_short_code", "PHF"),
                ("origin", "Phone"),
                ("owner_department", "CDOT - Department of Transportation"),
                ("created_department", "311 City Services"),
                ("status", "Open"),
                ("created_date", "2023-01-05 10:00:00"),
                ("precinct", "20"),
                ("electrical_district", "5"),
                ("electricity_grid", "A1"),
            ])),
            with_address(row(&[
                ("sr_number", "SR1001"),
                ("sr_type", "Pothole in Street"),
                ("sr_short_code", "PHF"),
                ("origin", "Phone"),
                ("owner_department", "CDOT - Department of Transportation"),
                ("created_department", "311 City Services"),
                ("status", "Completed"),
                ("created_date", "2023-01-02 09:00:00"),
                ("closed_date", "2023-01-04 09:00:00"),
                ("precinct", "20"),
                ("electrical_district", "5"),
                ("electricity_grid", "A1"),
            ])),
            // Same address but a different precinct: shares the location
            // hash with SR1001 while staying a distinct cleaned tuple
            with_address(row(&[
                ("sr_number", "SR1002"),
                ("sr_type", "Water Leak in Basement"),
                ("sr_short_code", "WLB"),
                ("origin", "Web"),
                ("owner_department", "Department of Water Management"),
                ("created_department", "311 City Services"),
                ("status", "Open"),
                ("created_date", "2023-01-20 14:30:00"),
                ("precinct", "9"),
            ])),
            // Nothing but an identifier and a date
            row(&[
                ("sr_number", "SR1003"),
                ("status", "Open"),
                ("created_date", "2023-01-10 08:00:00"),
            ]),
            // Unparseable created date
            row(&[
                ("sr_number", "SR1004"),
                ("sr_type", "Graffiti Removal"),
                ("status", "Open"),
                ("created_date", "not a date"),
            ]),
            row(&[
                ("sr_number", "SR1005"),
                ("sr_type", "Tree Trim Request"),
                ("status", "Completed"),
                ("created_date", "2023-07-04 12:00:00"),
            ]),
        ])
    }

    async fn scalar_i64(store: &AnalyticalStore, sql: &str) -> i64 {
        let batches = store.sql(sql).await.unwrap().collect().await.unwrap();
        batches[0]
            .column(0)
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap()
            .value(0)
    }

    async fn scalar_f64(store: &AnalyticalStore, sql: &str) -> f64 {
        let batches = store.sql(sql).await.unwrap().collect().await.unwrap();
        batches[0]
            .column(0)
            .as_any()
            .downcast_ref::<Float64Array>()
            .unwrap()
            .value(0)
    }

    async fn scalar_str(store: &AnalyticalStore, sql: &str) -> String {
        let batches = store.sql(sql).await.unwrap().collect().await.unwrap();
        batches[0]
            .column(0)
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap()
            .value(0)
            .to_string()
    }

    async fn string_column(store: &AnalyticalStore, sql: &str) -> Vec<String> {
        let batches = store.sql(sql).await.unwrap().collect().await.unwrap();
        let mut out = Vec::new();
        for batch in &batches {
            let values = batch
                .column(0)
                .as_any()
                .downcast_ref::<StringArray>()
                .unwrap();
            for i in 0..values.len() {
                out.push(values.value(i).to_string());
            }
        }
        out
    }

    #[tokio::test]
    async fn test_full_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let settings = test_settings(dir.path());
        let store = AnalyticalStore::open(&settings).await.unwrap();
        store
            .create_table_from_batches(dedup::RAW_TABLE, vec![fixture()])
            .await
            .unwrap();

        let metrics = StarSchemaProcessor::new(&store, &settings).run().await.unwrap();

        // Dedup kept one row per identifier, earliest created wins
        assert_eq!(store.count(dedup::DEDUP_TABLE).await.unwrap(), 5);
        assert_eq!(
            scalar_str(
                &store,
                "SELECT status FROM fact_requests WHERE sr_number = 'SR1001'"
            )
            .await,
            "Completed"
        );

        // No staging row was dropped, including the unparseable-date one
        assert_eq!(store.count(fact::FACT_TABLE).await.unwrap(), 5);

        // Closure time in hours for the surviving SR1001 row
        let closure = scalar_f64(
            &store,
            "SELECT closure_time FROM fact_requests WHERE sr_number = 'SR1001'",
        )
        .await;
        assert!((closure - 48.0).abs() < 1e-9);

        // Same address resolves to the same location surrogate
        assert_eq!(
            scalar_i64(
                &store,
                "SELECT CAST(COUNT(DISTINCT location_id) AS BIGINT) FROM fact_requests \
                 WHERE sr_number IN ('SR1001', 'SR1002')"
            )
            .await,
            1
        );
        assert!(
            scalar_i64(
                &store,
                "SELECT CAST(MIN(location_id) AS BIGINT) FROM fact_requests \
                 WHERE sr_number IN ('SR1001', 'SR1002')"
            )
            .await
                > 0
        );

        // The bare row resolves to sentinels on the axes it cannot match
        for axis in ["service_id", "geography_id", "infrastructure_id"] {
            assert_eq!(
                scalar_i64(
                    &store,
                    &format!(
                        "SELECT CAST({axis} AS BIGINT) FROM fact_requests \
                         WHERE sr_number = 'SR1003'"
                    )
                )
                .await,
                -1
            );
        }

        // Unparseable created date lands in the fact table with a time gap
        assert_eq!(
            scalar_i64(
                &store,
                "SELECT CAST(time_id AS BIGINT) FROM fact_requests WHERE sr_number = 'SR1004'"
            )
            .await,
            -1
        );

        // Keyword classification
        assert_eq!(
            scalar_str(
                &store,
                "SELECT service_category FROM dim_service \
                 WHERE service_name = 'Pothole in Street'"
            )
            .await,
            "Transportation"
        );
        assert_eq!(
            scalar_str(
                &store,
                "SELECT service_subcategory FROM dim_service \
                 WHERE service_name = 'Pothole in Street'"
            )
            .await,
            "Road Maintenance"
        );

        // Calendar dimension covers exactly the four parseable dates
        assert_eq!(store.count("dim_time").await.unwrap(), 4);
        assert_eq!(
            scalar_str(
                &store,
                "SELECT holiday_name FROM dim_time WHERE date_id = DATE '2023-07-04'"
            )
            .await,
            "Independence Day"
        );

        // Dense surrogates: max key equals row count
        assert_eq!(
            scalar_i64(&store, "SELECT CAST(MAX(service_id) AS BIGINT) FROM dim_service").await,
            store.count("dim_service").await.unwrap() as i64
        );
        assert_eq!(
            scalar_i64(&store, "SELECT MAX(fact_id) FROM fact_requests").await,
            5
        );

        // Metrics artifact carries stage timings and table profiles,
        // including the intermediate tables
        assert!(metrics.performance.contains_key("dedup"));
        assert!(metrics.performance.contains_key("fact"));
        assert_eq!(metrics.quality["dim_service"].pk_duplicates, Some(0));
        assert_eq!(metrics.quality[fact::FACT_TABLE].total_records, 5);
        assert_eq!(metrics.quality[dedup::DEDUP_TABLE].total_records, 5);
        assert_eq!(metrics.quality[dimensions::STAGING_TABLE].total_records, 5);

        // Every non-sentinel foreign key resolves into its dimension
        let gaps = &metrics.quality[fact::FACT_TABLE].referential_gaps;
        for (axis, _, _) in quality::FK_AXES {
            assert_eq!(gaps[*axis], Some(0), "{axis}");
        }
    }

    #[tokio::test]
    async fn test_rerun_reproduces_identical_surrogates() {
        let dir = tempfile::tempdir().unwrap();
        let settings = test_settings(dir.path());
        let store = AnalyticalStore::open(&settings).await.unwrap();
        store
            .create_table_from_batches(dedup::RAW_TABLE, vec![fixture()])
            .await
            .unwrap();

        StarSchemaProcessor::new(&store, &settings).run().await.unwrap();
        let first_locations = string_column(
            &store,
            "SELECT concat(CAST(location_id AS VARCHAR), ':', location_key) \
             FROM dim_location ORDER BY location_id",
        )
        .await;
        let first_fact = store.count(fact::FACT_TABLE).await.unwrap();

        StarSchemaProcessor::new(&store, &settings).run().await.unwrap();
        let second_locations = string_column(
            &store,
            "SELECT concat(CAST(location_id AS VARCHAR), ':', location_key) \
             FROM dim_location ORDER BY location_id",
        )
        .await;

        assert_eq!(first_locations, second_locations);
        assert_eq!(store.count(fact::FACT_TABLE).await.unwrap(), first_fact);
    }

    #[tokio::test]
    async fn test_dimension_stage_requires_staging() {
        let dir = tempfile::tempdir().unwrap();
        let settings = test_settings(dir.path());
        let store = AnalyticalStore::open(&settings).await.unwrap();

        let err = dimensions::service::build(&store).await.unwrap_err();
        assert!(matches!(err, Error::SourceMissing(ref t) if t == dimensions::STAGING_TABLE));
    }

    #[tokio::test]
    async fn test_failed_stage_is_labelled() {
        let dir = tempfile::tempdir().unwrap();
        let settings = test_settings(dir.path());
        let store = AnalyticalStore::open(&settings).await.unwrap();

        // No raw_requests table: the first stage fails and is wrapped
        let err = StarSchemaProcessor::new(&store, &settings).run().await.unwrap_err();
        match err {
            Error::Stage { stage, source, .. } => {
                assert_eq!(stage, "dedup");
                assert!(matches!(*source, Error::SourceMissing(_)));
            }
            other => panic!("expected stage error, got {other}"),
        }
    }
}
