use common::Result;

use super::STAGING_TABLE;
use super::rules::{RangeCascade, RangeRule};
use crate::store::AnalyticalStore;

pub const WARD_CLUSTER: RangeCascade = RangeCascade {
    rules: &[
        RangeRule::Range { lo: 1, hi: 17, label: "North Side Cluster" },
        RangeRule::Range { lo: 18, hi: 34, label: "Central Cluster" },
        RangeRule::Range { lo: 35, hi: 50, label: "South Side Cluster" },
    ],
    default: "Unassigned Cluster",
};

pub const POPULATION_DENSITY: RangeCascade = RangeCascade {
    rules: &[
        RangeRule::List { values: &[1, 2, 8, 32, 42, 43], label: "High Density" },
        RangeRule::List {
            values: &[19, 23, 38, 44, 46, 47, 48, 49, 50],
            label: "Low Density",
        },
    ],
    default: "Medium Density",
};

pub const SOCIOECONOMIC_LEVEL: RangeCascade = RangeCascade {
    rules: &[
        RangeRule::List {
            values: &[1, 2, 18, 19, 38, 39, 40, 41, 43],
            label: "Higher Income",
        },
        RangeRule::List {
            values: &[15, 16, 17, 20, 24, 28, 29, 34],
            label: "Lower Income",
        },
    ],
    default: "Mixed Income",
};

/// Builds dim_geography over the distinct administrative-area tuple.
/// Nulls are preserved in the natural key; the fact join matches them with
/// null-equals-null semantics.
pub async fn build(store: &AnalyticalStore) -> Result<()> {
    super::require_staging(store)?;

    let cluster_fallback = "CASE \
         WHEN community_area IS NOT NULL THEN 'Community Based Cluster' \
         ELSE 'Unassigned Cluster' END";

    let sql = format!(
        "SELECT \
             CAST(ROW_NUMBER() OVER ( \
                 ORDER BY COALESCE(community_area, 'Unknown'), \
                          COALESCE(CAST(ward AS VARCHAR), 'Unknown'), \
                          COALESCE(police_district, 'Unknown'), \
                          COALESCE(police_beat, 'Unknown'), \
                          COALESCE(police_sector, 'Unknown'), \
                          COALESCE(precinct, 'Unknown') \
             ) AS INT) AS geography_id, \
             community_area, \
             CASE WHEN community_area IS NOT NULL \
                  THEN concat('Community Area ', community_area) \
             END AS community_area_name, \
             ward, \
             CASE WHEN ward IS NOT NULL \
                  THEN concat('Ward ', CAST(ward AS VARCHAR)) \
             END AS ward_name, \
             police_district, police_beat, police_sector, precinct, \
             CASE WHEN ward IS NOT NULL \
                  THEN concat('Alderman Ward ', CAST(ward AS VARCHAR)) \
             END AS alderman_name, \
             {cluster} AS geographic_cluster, \
             CASE \
                 WHEN police_district IS NOT NULL THEN concat('Police District ', police_district) \
                 WHEN ward IS NOT NULL THEN concat('Ward Service Area ', CAST(ward AS VARCHAR)) \
                 ELSE 'Unassigned Service Area' \
             END AS service_area, \
             {density} AS population_density, \
             {income} AS socioeconomic_level, \
             md5(concat_ws('|', \
                 COALESCE(community_area, ''), COALESCE(CAST(ward AS VARCHAR), ''), \
                 COALESCE(police_district, ''), COALESCE(police_beat, ''), \
                 COALESCE(police_sector, ''), COALESCE(precinct, ''))) AS geography_hash \
         FROM ( \
             SELECT DISTINCT \
                 NULLIF(TRIM(community_area), '') AS community_area, \
                 TRY_CAST(NULLIF(TRIM(ward), '') AS INTEGER) AS ward, \
                 NULLIF(TRIM(police_district), '') AS police_district, \
                 NULLIF(TRIM(police_beat), '') AS police_beat, \
                 NULLIF(TRIM(police_sector), '') AS police_sector, \
                 NULLIF(TRIM(precinct), '') AS precinct \
             FROM {STAGING_TABLE} \
             WHERE community_area IS NOT NULL OR ward IS NOT NULL OR police_district IS NOT NULL \
         ) g",
        cluster = WARD_CLUSTER.case_expr_with_default("ward", cluster_fallback),
        density = POPULATION_DENSITY.case_expr("ward"),
        income = SOCIOECONOMIC_LEVEL.case_expr("ward"),
    );

    let df = store.sql(&sql).await?;
    store.create_table("dim_geography", df).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ward_clusters() {
        assert_eq!(WARD_CLUSTER.classify(Some(1)), "North Side Cluster");
        assert_eq!(WARD_CLUSTER.classify(Some(18)), "Central Cluster");
        assert_eq!(WARD_CLUSTER.classify(Some(50)), "South Side Cluster");
        assert_eq!(WARD_CLUSTER.classify(None), "Unassigned Cluster");
    }

    #[test]
    fn test_density_and_income_tiers() {
        assert_eq!(POPULATION_DENSITY.classify(Some(42)), "High Density");
        assert_eq!(POPULATION_DENSITY.classify(Some(49)), "Low Density");
        assert_eq!(POPULATION_DENSITY.classify(Some(10)), "Medium Density");

        assert_eq!(SOCIOECONOMIC_LEVEL.classify(Some(43)), "Higher Income");
        assert_eq!(SOCIOECONOMIC_LEVEL.classify(Some(24)), "Lower Income");
        assert_eq!(SOCIOECONOMIC_LEVEL.classify(Some(3)), "Mixed Income");
    }
}
