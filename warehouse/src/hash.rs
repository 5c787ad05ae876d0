use sha2::{Digest, Sha256};

/// Reserved separator between normalized fields. Placeholder tokens are
/// distinct per field so two different missing fields never collide.
pub const FIELD_SEPARATOR: &str = "|";

pub const NO_ADDRESS: &str = "NO_ADDRESS";
pub const NO_CITY: &str = "NO_CITY";
pub const NO_ZIP: &str = "NO_ZIP";
pub const NO_LAT: &str = "NO_LAT";
pub const NO_LON: &str = "NO_LON";
pub const NO_WARD: &str = "NO_WARD";

/// Decimal precision applied to coordinates before hashing, so floating
/// point noise does not fragment what is physically the same location.
pub const COORDINATE_PRECISION: u32 = 6;

/// Trims the value and substitutes the field placeholder when the value is
/// absent or blank.
pub fn normalize_text(value: Option<&str>, placeholder: &str) -> String {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => placeholder.to_string(),
    }
}

/// Rounds a coordinate to the fixed precision and renders it with a fixed
/// number of decimals, so `41.8781001` and `41.87810009` hash identically.
pub fn normalize_coordinate(value: Option<f64>, placeholder: &str) -> String {
    match value {
        Some(v) if v.is_finite() => {
            let scale = 10f64.powi(COORDINATE_PRECISION as i32);
            let rounded = (v * scale).round() / scale;
            format!("{rounded:.precision$}", precision = COORDINATE_PRECISION as usize)
        }
        _ => placeholder.to_string(),
    }
}

fn digest(parts: &[String]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(parts.join(FIELD_SEPARATOR).as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Stable composite hash over the normalized location tuple. Same inputs
/// always produce the same output regardless of row order or batching.
pub fn location_hash(
    street_address: Option<&str>,
    city: Option<&str>,
    zip_code: Option<&str>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    ward: Option<&str>,
) -> String {
    digest(&[
        normalize_text(street_address, NO_ADDRESS),
        normalize_text(city, NO_CITY),
        normalize_text(zip_code, NO_ZIP),
        normalize_coordinate(latitude, NO_LAT),
        normalize_coordinate(longitude, NO_LON),
        normalize_text(ward, NO_WARD),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_deterministic() {
        let a = location_hash(
            Some("100 N STATE ST"),
            Some("Chicago"),
            Some("60602"),
            Some(41.8781),
            Some(-87.6298),
            Some("42"),
        );
        let b = location_hash(
            Some("100 N STATE ST"),
            Some("Chicago"),
            Some("60602"),
            Some(41.8781),
            Some(-87.6298),
            Some("42"),
        );
        assert_eq!(a, b);
    }

    #[test]
    fn test_coordinate_noise_does_not_fragment() {
        let a = location_hash(
            Some("100 N STATE ST"),
            Some("Chicago"),
            Some("60602"),
            Some(41.8781001),
            Some(-87.6297982),
            Some("42"),
        );
        let b = location_hash(
            Some("100 N STATE ST"),
            Some("Chicago"),
            Some("60602"),
            Some(41.87810009),
            Some(-87.62979818),
            Some("42"),
        );
        assert_eq!(a, b);
    }

    #[test]
    fn test_distinct_missing_fields_do_not_collide() {
        // Address missing vs city missing must hash differently even though
        // both tuples carry exactly one absent field.
        let missing_address = location_hash(None, Some("X"), None, None, None, None);
        let missing_city = location_hash(Some("X"), None, None, None, None, None);
        assert_ne!(missing_address, missing_city);
    }

    #[test]
    fn test_blank_is_treated_as_absent() {
        let blank = location_hash(Some("   "), Some("Chicago"), None, None, None, None);
        let absent = location_hash(None, Some("Chicago"), None, None, None, None);
        assert_eq!(blank, absent);
    }

    #[test]
    fn test_whitespace_is_trimmed() {
        let padded = location_hash(Some("  100 N STATE ST "), None, None, None, None, None);
        let clean = location_hash(Some("100 N STATE ST"), None, None, None, None, None);
        assert_eq!(padded, clean);
    }

    #[test]
    fn test_normalize_coordinate_fixed_width() {
        assert_eq!(normalize_coordinate(Some(41.5), NO_LAT), "41.500000");
        assert_eq!(normalize_coordinate(None, NO_LAT), NO_LAT);
        assert_eq!(normalize_coordinate(Some(f64::NAN), NO_LAT), NO_LAT);
    }
}
