use common::Result;

use super::STAGING_TABLE;
use super::rules::{RangeCascade, RangeRule};
use crate::store::AnalyticalStore;

/// Electrical district numbers correlate with build-out era.
pub const DISTRICT_AGE: RangeCascade = RangeCascade {
    rules: &[
        RangeRule::Range { lo: 1, hi: 10, label: "Newer Infrastructure" },
        RangeRule::Range { lo: 11, hi: 20, label: "Mature Infrastructure" },
        RangeRule::Range { lo: 21, hi: i32::MAX, label: "Older Infrastructure" },
    ],
    default: "Mixed Age",
};

/// Builds dim_infrastructure over the distinct utility-service tuple.
pub async fn build(store: &AnalyticalStore) -> Result<()> {
    super::require_staging(store)?;

    let sql = format!(
        "SELECT \
             CAST(ROW_NUMBER() OVER ( \
                 ORDER BY COALESCE(electrical_district, 'Unknown'), \
                          COALESCE(electricity_grid, 'Unknown'), \
                          COALESCE(sanitation_division_days, 'Unknown') \
             ) AS INT) AS infrastructure_id, \
             electrical_district, electricity_grid, sanitation_division_days, \
             CASE \
                 WHEN electrical_district IS NOT NULL AND electricity_grid IS NOT NULL THEN 'Electrical' \
                 WHEN sanitation_division_days IS NOT NULL THEN 'Sanitation' \
                 WHEN electrical_district IS NOT NULL THEN 'Power Distribution' \
                 ELSE 'General Utility' \
             END AS utility_type, \
             CASE \
                 WHEN electrical_district IS NOT NULL AND electricity_grid IS NOT NULL THEN 'High Reliability' \
                 WHEN sanitation_division_days LIKE '%DAILY%' OR sanitation_division_days LIKE '%MON%' THEN 'High Frequency' \
                 WHEN electrical_district IS NOT NULL OR electricity_grid IS NOT NULL THEN 'Standard Reliability' \
                 ELSE 'Variable' \
             END AS service_reliability, \
             CASE \
                 WHEN sanitation_division_days IS NOT NULL THEN concat('Sanitation: ', sanitation_division_days) \
                 WHEN electrical_district IS NOT NULL THEN 'Electrical: Scheduled Maintenance' \
                 ELSE 'Standard Schedule' \
             END AS maintenance_schedule, \
             {age} AS infrastructure_age, \
             CASE \
                 WHEN electrical_district IS NOT NULL AND electricity_grid IS NOT NULL AND sanitation_division_days IS NOT NULL THEN 'High Capacity' \
                 WHEN electrical_district IS NOT NULL AND electricity_grid IS NOT NULL THEN 'Medium Capacity' \
                 WHEN electrical_district IS NOT NULL OR sanitation_division_days IS NOT NULL THEN 'Standard Capacity' \
                 ELSE 'Limited Capacity' \
             END AS capacity_level, \
             md5(concat_ws('|', \
                 COALESCE(electrical_district, ''), COALESCE(electricity_grid, ''), \
                 COALESCE(sanitation_division_days, ''))) AS infrastructure_hash \
         FROM ( \
             SELECT DISTINCT \
                 NULLIF(TRIM(electrical_district), '') AS electrical_district, \
                 NULLIF(TRIM(electricity_grid), '') AS electricity_grid, \
                 NULLIF(TRIM(sanitation_division_days), '') AS sanitation_division_days \
             FROM {STAGING_TABLE} \
             WHERE electrical_district IS NOT NULL OR electricity_grid IS NOT NULL OR sanitation_division_days IS NOT NULL \
         ) i",
        age = DISTRICT_AGE.case_expr("TRY_CAST(electrical_district AS INTEGER)"),
    );

    let df = store.sql(&sql).await?;
    store.create_table("dim_infrastructure", df).await
}
