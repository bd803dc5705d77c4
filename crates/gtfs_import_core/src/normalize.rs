use std::collections::BTreeMap;

use gtfs_atlas_model::{AgencyKey, FieldValue, NormalizedRecord, AGENCY_KEY_FIELD, LOC_FIELD};

pub const INTEGER_FIELDS: &[&str] = &[
    "monday",
    "tuesday",
    "wednesday",
    "thursday",
    "friday",
    "saturday",
    "sunday",
    "start_date",
    "end_date",
    "date",
    "exception_type",
    "shape_pt_sequence",
    "payment_method",
    "transfers",
    "transfer_duration",
    "feed_start_date",
    "feed_end_date",
    "headway_secs",
    "exact_times",
    "route_type",
    "direction_id",
    "location_type",
    "wheelchair_boarding",
    "stop_sequence",
    "pickup_type",
    "drop_off_type",
    "use_stop_sequence",
    "transfer_type",
    "min_transfer_time",
    "wheelchair_accessible",
    "bikes_allowed",
    "timepoint",
    "timetable_sequence",
];

pub const FLOAT_FIELDS: &[&str] = &[
    "price",
    "shape_dist_traveled",
    "shape_pt_lat",
    "shape_pt_lon",
    "stop_lat",
    "stop_lon",
];

const STOP_COORDINATES: (&str, &str) = ("stop_lat", "stop_lon");
const SHAPE_COORDINATES: (&str, &str) = ("shape_pt_lat", "shape_pt_lon");

/// Converts a parsed row into the record stored for `agency_key`.
///
/// Empty values are dropped, `agency_key` is set, integer and float columns
/// are coerced (values that do not parse stay text) and `loc` is derived from
/// stop or shape point coordinates. Already normalized input comes back
/// unchanged.
pub fn normalize<R>(record: R, agency_key: &AgencyKey) -> NormalizedRecord
where
    R: Into<BTreeMap<String, FieldValue>>,
{
    let mut fields: BTreeMap<String, FieldValue> = record.into();
    fields.retain(|_, value| !value.is_empty());

    fields.insert(
        AGENCY_KEY_FIELD.to_string(),
        FieldValue::Text(agency_key.as_str().to_string()),
    );

    for field in INTEGER_FIELDS {
        if let Some(value) = fields.get_mut(*field) {
            coerce_integer(value);
        }
    }
    for field in FLOAT_FIELDS {
        if let Some(value) = fields.get_mut(*field) {
            coerce_float(value);
        }
    }

    for (lat_field, lon_field) in [STOP_COORDINATES, SHAPE_COORDINATES] {
        let lat = fields.get(lat_field).and_then(FieldValue::as_f64);
        let lon = fields.get(lon_field).and_then(FieldValue::as_f64);
        if let (Some(lat), Some(lon)) = (lat, lon) {
            fields.insert(LOC_FIELD.to_string(), FieldValue::Point([lon, lat]));
        }
    }

    NormalizedRecord::from_fields(fields)
}

fn coerce_integer(value: &mut FieldValue) {
    if let FieldValue::Text(text) = value {
        if let Some(parsed) = parse_int_prefix(text) {
            *value = FieldValue::Integer(parsed);
        }
    }
}

fn coerce_float(value: &mut FieldValue) {
    if let FieldValue::Text(text) = value {
        if let Some(parsed) = parse_float_prefix(text) {
            *value = FieldValue::Float(parsed);
        }
    }
}

/// Parses the leading decimal integer of `value`, ignoring trailing text.
pub fn parse_int_prefix(value: &str) -> Option<i64> {
    let trimmed = value.trim_start();
    let bytes = trimmed.as_bytes();
    let mut end = 0;
    if matches!(bytes.first(), Some(b'+') | Some(b'-')) {
        end = 1;
    }
    let digits_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    if end == digits_start {
        return None;
    }
    trimmed[..end].parse().ok()
}

/// Parses the leading decimal float of `value`, ignoring trailing text.
pub fn parse_float_prefix(value: &str) -> Option<f64> {
    let trimmed = value.trim_start();
    let bytes = trimmed.as_bytes();
    let mut end = 0;
    if matches!(bytes.first(), Some(b'+') | Some(b'-')) {
        end = 1;
    }

    let int_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    let mut mantissa_digits = end - int_start;

    if end < bytes.len() && bytes[end] == b'.' {
        let frac_start = end + 1;
        let mut frac_end = frac_start;
        while frac_end < bytes.len() && bytes[frac_end].is_ascii_digit() {
            frac_end += 1;
        }
        if mantissa_digits > 0 || frac_end > frac_start {
            mantissa_digits += frac_end - frac_start;
            end = frac_end;
        }
    }
    if mantissa_digits == 0 {
        return None;
    }

    if end < bytes.len() && matches!(bytes[end], b'e' | b'E') {
        let mut exp_end = end + 1;
        if exp_end < bytes.len() && matches!(bytes[exp_end], b'+' | b'-') {
            exp_end += 1;
        }
        let exp_digits_start = exp_end;
        while exp_end < bytes.len() && bytes[exp_end].is_ascii_digit() {
            exp_end += 1;
        }
        if exp_end > exp_digits_start {
            end = exp_end;
        }
    }

    trimmed[..end]
        .parse::<f64>()
        .ok()
        .filter(|parsed| parsed.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gtfs_atlas_model::RawRecord;

    fn key(value: &str) -> AgencyKey {
        AgencyKey::new(value).expect("agency key")
    }

    #[test]
    fn stop_row_gets_numeric_coordinates_and_loc() {
        let raw: RawRecord = [("stop_id", "1"), ("stop_lat", "40.1"), ("stop_lon", "-3.5")]
            .into_iter()
            .collect();
        let record = normalize(raw, &key("X"));

        assert_eq!(record.get_str("stop_id"), Some("1"));
        assert_eq!(record.get("stop_lat"), Some(&FieldValue::Float(40.1)));
        assert_eq!(record.get("stop_lon"), Some(&FieldValue::Float(-3.5)));
        assert_eq!(record.loc(), Some([-3.5, 40.1]));
        assert_eq!(record.agency_key(), Some("X"));
        assert_eq!(record.len(), 5);
    }

    #[test]
    fn shape_point_gets_loc_and_integer_sequence() {
        let raw: RawRecord = [
            ("shape_id", "SH1"),
            ("shape_pt_lat", "51.5"),
            ("shape_pt_lon", "-0.12"),
            ("shape_pt_sequence", "7"),
            ("shape_dist_traveled", ""),
        ]
        .into_iter()
        .collect();
        let record = normalize(raw, &key("LT"));

        assert_eq!(record.loc(), Some([-0.12, 51.5]));
        assert_eq!(record.get_i64("shape_pt_sequence"), Some(7));
        assert!(!record.contains("shape_dist_traveled"));
    }

    #[test]
    fn empty_values_are_removed_and_agency_key_overrides_column() {
        let raw: RawRecord = [("route_id", "R1"), ("route_desc", ""), ("agency_key", "old")]
            .into_iter()
            .collect();
        let record = normalize(raw, &key("new"));
        assert!(!record.contains("route_desc"));
        assert_eq!(record.agency_key(), Some("new"));
    }

    #[test]
    fn unparseable_numbers_stay_text() {
        let raw: RawRecord = [("route_type", "bus"), ("stop_lat", "north"), ("stop_lon", "1.0")]
            .into_iter()
            .collect();
        let record = normalize(raw, &key("A"));
        assert_eq!(record.get_str("route_type"), Some("bus"));
        assert_eq!(record.get_str("stop_lat"), Some("north"));
        assert!(record.loc().is_none());
    }

    #[test]
    fn numeric_prefixes_are_taken_like_parse_int_and_parse_float() {
        assert_eq!(parse_int_prefix("20240131"), Some(20240131));
        assert_eq!(parse_int_prefix("3.7"), Some(3));
        assert_eq!(parse_int_prefix("-2abc"), Some(-2));
        assert_eq!(parse_int_prefix("abc"), None);
        assert_eq!(parse_int_prefix("-"), None);

        assert_eq!(parse_float_prefix("12.50 EUR"), Some(12.5));
        assert_eq!(parse_float_prefix(".5"), Some(0.5));
        assert_eq!(parse_float_prefix("1e3"), Some(1000.0));
        assert_eq!(parse_float_prefix("2e"), Some(2.0));
        assert_eq!(parse_float_prefix("."), None);
        assert_eq!(parse_float_prefix("n/a"), None);
    }

    #[test]
    fn zero_coordinates_still_produce_loc() {
        let raw: RawRecord = [("stop_id", "NULL_ISLAND"), ("stop_lat", "0"), ("stop_lon", "0.0")]
            .into_iter()
            .collect();
        assert_eq!(normalize(raw, &key("A")).loc(), Some([0.0, 0.0]));
    }

    #[test]
    fn normalizing_twice_is_a_no_op() {
        let raw: RawRecord = [
            ("trip_id", "T1"),
            ("direction_id", "1"),
            ("wheelchair_accessible", "x"),
            ("stop_lat", "40.1"),
            ("stop_lon", "-3.5"),
            ("price", "2.25"),
        ]
        .into_iter()
        .collect();
        let once = normalize(raw, &key("A"));
        let twice = normalize(once.clone(), &key("A"));
        assert_eq!(once, twice);
    }

    #[test]
    fn same_input_gives_same_output() {
        let raw: RawRecord = [("calendar", "x"), ("monday", "1"), ("start_date", "20240101")]
            .into_iter()
            .collect();
        assert_eq!(normalize(raw.clone(), &key("A")), normalize(raw, &key("A")));
    }
}
