use common::Result;

use super::STAGING_TABLE;
use super::rules::{RangeCascade, RangeRule};
use crate::store::AnalyticalStore;

/// Ward bands mapped to named city regions. Rows without a usable ward fall
/// through to the community-area / bounding-box defaults in the build SQL.
pub const WARD_REGION: RangeCascade = RangeCascade {
    rules: &[
        RangeRule::Range { lo: 1, hi: 10, label: "North Chicago" },
        RangeRule::Range { lo: 11, hi: 20, label: "Northwest Chicago" },
        RangeRule::Range { lo: 21, hi: 30, label: "Central Chicago" },
        RangeRule::Range { lo: 31, hi: 40, label: "Southwest Chicago" },
        RangeRule::Range { lo: 41, hi: 50, label: "South Chicago" },
    ],
    default: "Unknown Region",
};

/// Sort keys for the per-hash ordinal. Tuples sharing a hash agree on the
/// hashed fields and differ somewhere else, so every cleaned column must
/// participate or the ordinal (and the `_1` representative the fact join
/// resolves to) would depend on scan order.
const ORDINAL_SORT_COLUMNS: &[&str] = &[
    "street_address",
    "street_number",
    "street_name",
    "street_type",
    "street_direction",
    "city",
    "state",
    "zip_code",
    "community_area",
    "ward",
    "police_district",
    "police_beat",
    "police_sector",
    "precinct",
    "sanitation_division_days",
    "electrical_district",
    "electricity_grid",
    "latitude",
    "longitude",
    "x_coordinate",
    "y_coordinate",
];

fn ordinal_order_by() -> String {
    ORDINAL_SORT_COLUMNS
        .iter()
        .map(|column| format!("{column} ASC NULLS LAST"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// SQL invocation of the `location_hash` UDF over the raw feed columns,
/// prefixed with the given table alias. The fact join uses this so both
/// sides of the location lookup normalize identically.
pub fn location_hash_raw(alias: &str) -> String {
    format!(
        "location_hash(\
             CAST(NULLIF(TRIM({alias}.street_address), '') AS VARCHAR), \
             CAST(COALESCE(NULLIF(TRIM({alias}.city), ''), 'Chicago') AS VARCHAR), \
             CAST(NULLIF(TRIM({alias}.zip_code), '') AS VARCHAR), \
             TRY_CAST({alias}.latitude AS DOUBLE), \
             TRY_CAST({alias}.longitude AS DOUBLE), \
             CAST(TRY_CAST(NULLIF(TRIM({alias}.ward), '') AS INTEGER) AS VARCHAR))"
    )
}

/// Builds dim_location. Address tuples are cleaned before DISTINCT, hashed
/// with the shared UDF, and disambiguated per hash by an ordinal over a
/// fixed column order. `location_key = hash || '_' || ordinal` is the
/// unique lookup key; the fact join targets ordinal 1.
pub async fn build(store: &AnalyticalStore) -> Result<()> {
    super::require_staging(store)?;

    let region_fallback = "CASE \
         WHEN community_area IS NOT NULL THEN 'Chicago (Community Based)' \
         WHEN latitude BETWEEN 41.6 AND 42.1 AND longitude BETWEEN -87.9 AND -87.5 THEN 'Chicago (Coordinate Based)' \
         ELSE 'Unknown Region' END";

    let sql = format!(
        "WITH cleaned AS ( \
             SELECT DISTINCT \
                 NULLIF(TRIM(street_number), '') AS street_number, \
                 NULLIF(TRIM(street_name), '') AS street_name, \
                 NULLIF(TRIM(street_type), '') AS street_type, \
                 NULLIF(TRIM(street_direction), '') AS street_direction, \
                 NULLIF(TRIM(street_address), '') AS street_address, \
                 COALESCE(NULLIF(TRIM(city), ''), 'Chicago') AS city, \
                 COALESCE(NULLIF(TRIM(state), ''), 'IL') AS state, \
                 NULLIF(TRIM(zip_code), '') AS zip_code, \
                 NULLIF(TRIM(community_area), '') AS community_area, \
                 TRY_CAST(NULLIF(TRIM(ward), '') AS INTEGER) AS ward, \
                 NULLIF(TRIM(police_district), '') AS police_district, \
                 NULLIF(TRIM(police_beat), '') AS police_beat, \
                 NULLIF(TRIM(police_sector), '') AS police_sector, \
                 NULLIF(TRIM(precinct), '') AS precinct, \
                 NULLIF(TRIM(sanitation_division_days), '') AS sanitation_division_days, \
                 NULLIF(TRIM(electrical_district), '') AS electrical_district, \
                 NULLIF(TRIM(electricity_grid), '') AS electricity_grid, \
                 TRY_CAST(latitude AS DOUBLE) AS latitude, \
                 TRY_CAST(longitude AS DOUBLE) AS longitude, \
                 TRY_CAST(x_coordinate AS DOUBLE) AS x_coordinate, \
                 TRY_CAST(y_coordinate AS DOUBLE) AS y_coordinate \
             FROM {STAGING_TABLE} \
         ), \
         hashed AS ( \
             SELECT *, \
                 location_hash( \
                     CAST(street_address AS VARCHAR), CAST(city AS VARCHAR), \
                     CAST(zip_code AS VARCHAR), latitude, longitude, \
                     CAST(ward AS VARCHAR)) AS loc_hash \
             FROM cleaned \
         ), \
         numbered AS ( \
             SELECT *, \
                 ROW_NUMBER() OVER ( \
                     PARTITION BY loc_hash \
                     ORDER BY {ordinal_order} \
                 ) AS rn \
             FROM hashed \
         ) \
         SELECT \
             CAST(ROW_NUMBER() OVER (ORDER BY loc_hash, rn) AS INT) AS location_id, \
             street_number, street_name, street_type, street_direction, street_address, \
             city, state, zip_code, community_area, ward, police_district, police_beat, \
             police_sector, precinct, sanitation_division_days, electrical_district, \
             electricity_grid, latitude, longitude, x_coordinate, y_coordinate, \
             concat(loc_hash, '_', CAST(rn AS VARCHAR)) AS location_key, \
             CASE \
                 WHEN street_address IS NOT NULL AND zip_code IS NOT NULL AND latitude IS NOT NULL AND longitude IS NOT NULL THEN 'Complete' \
                 WHEN street_address IS NOT NULL AND (zip_code IS NOT NULL OR (latitude IS NOT NULL AND longitude IS NOT NULL)) THEN 'Good' \
                 WHEN street_name IS NOT NULL OR latitude IS NOT NULL THEN 'Partial' \
                 ELSE 'Poor' \
             END AS address_completeness, \
             {region} AS geographic_region, \
             CASE \
                 WHEN latitude IS NOT NULL AND longitude IS NOT NULL AND street_address IS NOT NULL AND ward IS NOT NULL THEN 1.0 \
                 WHEN latitude IS NOT NULL AND longitude IS NOT NULL AND street_address IS NOT NULL THEN 0.8 \
                 WHEN latitude IS NOT NULL AND longitude IS NOT NULL THEN 0.6 \
                 WHEN street_address IS NOT NULL AND ward IS NOT NULL THEN 0.4 \
                 WHEN street_address IS NOT NULL THEN 0.2 \
                 ELSE 0.0 \
             END AS spatial_quality_score, \
             latitude IS NOT NULL AND longitude IS NOT NULL AS is_geocoded, \
             CASE \
                 WHEN latitude IS NOT NULL AND longitude IS NOT NULL AND street_address IS NOT NULL THEN 'Address Level' \
                 WHEN latitude IS NOT NULL AND longitude IS NOT NULL AND street_name IS NOT NULL THEN 'Street Level' \
                 WHEN latitude IS NOT NULL AND longitude IS NOT NULL THEN 'Area Level' \
                 ELSE 'No Coordinates' \
             END AS coordinate_precision \
         FROM numbered",
        ordinal_order = ordinal_order_by(),
        region = WARD_REGION.case_expr_with_default("ward", region_fallback),
    );

    let df = store.sql(&sql).await?;
    store.create_table("dim_location", df).await
}
