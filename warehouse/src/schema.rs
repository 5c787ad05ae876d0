use arrow::datatypes::{DataType, Field, Schema};

/// Column order of the upstream service-request feed. The raw store keeps
/// every field as text exactly as ingested; casting happens downstream.
pub const RAW_COLUMNS: &[&str] = &[
    "sr_number",
    "sr_type",
    "sr_short_code",
    "origin",
    "created_department",
    "owner_department",
    "status",
    "created_date",
    "last_modified_date",
    "closed_date",
    "street_number",
    "street_direction",
    "street_name",
    "street_type",
    "street_address",
    "city",
    "state",
    "zip_code",
    "community_area",
    "ward",
    "police_district",
    "police_sector",
    "police_beat",
    "precinct",
    "sanitation_division_days",
    "electrical_district",
    "electricity_grid",
    "latitude",
    "longitude",
    "x_coordinate",
    "y_coordinate",
    "duplicate",
    "legacy_record",
    "legacy_sr_number",
    "parent_sr_number",
];

pub fn raw_requests_schema() -> Schema {
    Schema::new(
        RAW_COLUMNS
            .iter()
            .map(|name| Field::new(*name, DataType::Utf8, true))
            .collect::<Vec<_>>(),
    )
}

/// Comma-separated projection of the raw columns, used wherever a stage must
/// re-select the full feed without dragging along helper columns.
pub fn raw_select_list() -> String {
    RAW_COLUMNS.join(", ")
}
