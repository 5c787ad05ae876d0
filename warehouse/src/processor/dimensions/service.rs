use common::Result;

use super::STAGING_TABLE;
use super::rules::{KeywordCascade, KeywordRule};
use crate::store::AnalyticalStore;

/// Service category cascade over the free-text request type. Order matters:
/// "street light out" matches both Transportation (street) and
/// Infrastructure (light), and the earlier arm wins.
pub const CATEGORY: KeywordCascade = KeywordCascade {
    rules: &[
        KeywordRule {
            label: "Sanitation",
            keywords: &["graffiti", "litter", "garbage", "refuse", "waste", "debris", "dumping"],
        },
        KeywordRule {
            label: "Transportation",
            keywords: &["pothole", "street", "traffic", "sidewalk", "curb", "pavement", "road"],
        },
        KeywordRule {
            label: "Environment",
            keywords: &["tree", "vegetation", "park", "landscape", "green"],
        },
        KeywordRule {
            label: "Infrastructure",
            keywords: &["light", "electrical", "power", "utility", "signal"],
        },
        KeywordRule {
            label: "Utilities",
            keywords: &["water", "sewer", "drain", "flood", "leak", "pipe"],
        },
        KeywordRule {
            label: "Animal Services",
            keywords: &["animal", "rodent", "pest", "stray", "wildlife"],
        },
        KeywordRule {
            label: "Property",
            keywords: &["abandon", "building", "property", "vacant", "structure", "housing"],
        },
        KeywordRule {
            label: "Public Safety",
            keywords: &["noise", "police", "crime", "safety", "security"],
        },
        KeywordRule {
            label: "Regulatory",
            keywords: &["permit", "license", "violation", "inspection", "code"],
        },
        KeywordRule {
            label: "Health Services",
            keywords: &["health", "medical", "food", "restaurant"],
        },
    ],
    default: "Other",
};

pub const SUBCATEGORY: KeywordCascade = KeywordCascade {
    rules: &[
        KeywordRule { label: "Graffiti Removal", keywords: &["graffiti"] },
        KeywordRule { label: "Road Maintenance", keywords: &["pothole"] },
        KeywordRule { label: "Tree Services", keywords: &["tree"] },
        KeywordRule { label: "Street Lighting", keywords: &["light"] },
        KeywordRule { label: "Water Services", keywords: &["water"] },
    ],
    default: "General",
};

pub const PRIORITY: KeywordCascade = KeywordCascade {
    rules: &[
        KeywordRule {
            label: "High",
            keywords: &["emergency", "urgent", "danger", "hazard", "leak"],
        },
        KeywordRule {
            label: "Medium",
            keywords: &["safety", "traffic", "signal", "water"],
        },
    ],
    default: "Standard",
};

pub const EMERGENCY: KeywordCascade = KeywordCascade {
    rules: &[KeywordRule {
        label: "TRUE",
        keywords: &["emergency", "urgent", "danger", "hazard"],
    }],
    default: "FALSE",
};

pub const RESOLUTION_DAYS: KeywordCascade = KeywordCascade {
    rules: &[
        KeywordRule {
            label: "1",
            keywords: &["emergency", "urgent", "danger", "hazard"],
        },
        KeywordRule {
            label: "3",
            keywords: &["graffiti", "litter", "light"],
        },
        KeywordRule {
            label: "7",
            keywords: &["pothole", "tree", "water"],
        },
        KeywordRule {
            label: "14",
            keywords: &["building", "property"],
        },
    ],
    default: "7",
};

/// Builds dim_service from the distinct (sr_type, sr_short_code, origin)
/// natural keys, surrogate keys assigned in ascending key order. Keys are
/// trimmed before DISTINCT so whitespace variants collapse to one row.
pub async fn build(store: &AnalyticalStore) -> Result<()> {
    super::require_staging(store)?;

    let sql = format!(
        "SELECT \
             CAST(ROW_NUMBER() OVER (ORDER BY COALESCE(sr_type, ''), COALESCE(sr_short_code, ''), COALESCE(origin, '')) AS INT) AS service_id, \
             COALESCE(sr_type, 'Unknown Service') AS service_name, \
             COALESCE(sr_short_code, 'UNK') AS service_short_code, \
             COALESCE(origin, 'Unknown Origin') AS service_origin, \
             {category} AS service_category, \
             {subcategory} AS service_subcategory, \
             {priority} AS priority_level, \
             {emergency} AS is_emergency, \
             {resolution} AS typical_resolution_days, \
             md5(concat_ws('|', COALESCE(sr_type, ''), COALESCE(sr_short_code, ''), COALESCE(origin, ''))) AS service_hash \
         FROM ( \
             SELECT DISTINCT \
                 NULLIF(TRIM(sr_type), '') AS sr_type, \
                 NULLIF(TRIM(sr_short_code), '') AS sr_short_code, \
                 NULLIF(TRIM(origin), '') AS origin \
             FROM {STAGING_TABLE} \
             WHERE sr_type IS NOT NULL OR sr_short_code IS NOT NULL OR origin IS NOT NULL \
         ) s",
        category = CATEGORY.case_expr("sr_type"),
        subcategory = SUBCATEGORY.case_expr("sr_type"),
        priority = PRIORITY.case_expr("sr_type"),
        emergency = EMERGENCY.case_expr_raw("sr_type"),
        resolution = RESOLUTION_DAYS.case_expr_raw("sr_type"),
    );

    let df = store.sql(&sql).await?;
    store.create_table("dim_service", df).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pothole_classification() {
        assert_eq!(CATEGORY.classify("Pothole in Street"), "Transportation");
        assert_eq!(SUBCATEGORY.classify("Pothole in Street"), "Road Maintenance");
    }

    #[test]
    fn test_sanitation_beats_later_categories() {
        // "Graffiti Removal - Vacant Building" matches both Sanitation and
        // Property; the earlier rule must win.
        assert_eq!(
            CATEGORY.classify("Graffiti Removal - Vacant Building"),
            "Sanitation"
        );
    }

    #[test]
    fn test_water_leak_priority() {
        assert_eq!(CATEGORY.classify("Water Leak in Basement"), "Utilities");
        assert_eq!(PRIORITY.classify("Water Leak in Basement"), "High");
    }

    #[test]
    fn test_emergency_flag_and_resolution() {
        assert_eq!(EMERGENCY.classify("Hazardous Materials"), "TRUE");
        assert_eq!(EMERGENCY.classify("Stray Animal Complaint"), "FALSE");
        assert_eq!(RESOLUTION_DAYS.classify("Tree Trim Request"), "7");
        assert_eq!(RESOLUTION_DAYS.classify("Ice Cream Truck Complaint"), "7");
    }

    #[test]
    fn test_unclassified_falls_to_other() {
        assert_eq!(CATEGORY.classify("Aircraft Noise Complaint Form"), "Public Safety");
        assert_eq!(CATEGORY.classify("Miscellaneous"), "Other");
    }
}
