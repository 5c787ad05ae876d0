use common::Result;

use super::STAGING_TABLE;
use super::rules::{KeywordCascade, KeywordRule};
use crate::store::AnalyticalStore;

pub const DEPARTMENT_TYPE: KeywordCascade = KeywordCascade {
    rules: &[
        KeywordRule { label: "Utilities", keywords: &["water", "sewer", "utility"] },
        KeywordRule {
            label: "Transportation",
            keywords: &["transport", "street", "traffic", "cdot"],
        },
        KeywordRule {
            label: "Environmental",
            keywords: &["sanitation", "environment", "fleet", "waste"],
        },
        KeywordRule {
            label: "Public Safety",
            keywords: &["police", "fire", "emergency", "oemc"],
        },
        KeywordRule {
            label: "Development",
            keywords: &["building", "housing", "planning", "zoning"],
        },
        KeywordRule {
            label: "Health & Human Services",
            keywords: &["health", "family", "social", "human"],
        },
        KeywordRule {
            label: "Parks & Recreation",
            keywords: &["park", "recreation", "cultural"],
        },
    ],
    default: "Administrative",
};

pub const HIERARCHY: KeywordCascade = KeywordCascade {
    rules: &[
        KeywordRule {
            label: "Executive",
            keywords: &["commissioner", "director", "chief"],
        },
        KeywordRule {
            label: "Management",
            keywords: &["manager", "supervisor", "coordinator"],
        },
        KeywordRule {
            label: "Operational",
            keywords: &["officer", "inspector", "specialist"],
        },
    ],
    default: "Standard",
};

pub const CAPACITY: KeywordCascade = KeywordCascade {
    rules: &[
        KeywordRule {
            label: "High",
            keywords: &["police", "fire", "water", "transport"],
        },
        KeywordRule {
            label: "Medium",
            keywords: &["health", "building", "environment"],
        },
    ],
    default: "Standard",
};

pub const OPERATING_HOURS: KeywordCascade = KeywordCascade {
    rules: &[
        KeywordRule {
            label: "24/7",
            keywords: &["police", "fire", "emergency", "water"],
        },
        KeywordRule {
            label: "Extended Hours",
            keywords: &["sanitation", "transport", "street"],
        },
    ],
    default: "Business Hours",
};

/// Department type for a raw owner-department value; an absent owner is a
/// data gap, not an administrative unit.
pub fn department_type(owner_department: Option<&str>) -> &'static str {
    match owner_department.map(str::trim).filter(|s| !s.is_empty()) {
        Some(name) => DEPARTMENT_TYPE.classify(name),
        None => "Missing Data",
    }
}

/// Builds dim_department from the distinct (owner_department,
/// created_department) pairs, nulls folded to named placeholders.
pub async fn build(store: &AnalyticalStore) -> Result<()> {
    super::require_staging(store)?;

    let missing_default =
        "CASE WHEN owner_department IS NULL THEN 'Missing Data' ELSE 'Administrative' END";
    let sql = format!(
        "SELECT \
             CAST(ROW_NUMBER() OVER (ORDER BY COALESCE(owner_department, 'Unknown Department'), COALESCE(created_department, 'Unknown Creator')) AS INT) AS department_id, \
             COALESCE(owner_department, 'Unknown Department') AS department_name, \
             COALESCE(created_department, 'Unknown Creator') AS created_department, \
             {dept_type} AS department_type, \
             {hierarchy} AS department_hierarchy, \
             owner_department IS NULL AS is_missing_data, \
             {capacity} AS agency_capacity, \
             {hours} AS operating_hours, \
             md5(concat_ws('|', COALESCE(owner_department, ''), COALESCE(created_department, ''))) AS department_hash \
         FROM ( \
             SELECT DISTINCT \
                 NULLIF(TRIM(owner_department), '') AS owner_department, \
                 NULLIF(TRIM(created_department), '') AS created_department \
             FROM {STAGING_TABLE} \
         ) d",
        dept_type = DEPARTMENT_TYPE.case_expr_with_default("owner_department", missing_default),
        hierarchy = HIERARCHY.case_expr("owner_department"),
        capacity = CAPACITY.case_expr("owner_department"),
        hours = OPERATING_HOURS.case_expr("owner_department"),
    );

    let df = store.sql(&sql).await?;
    store.create_table("dim_department", df).await
}
