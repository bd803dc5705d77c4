#![no_main]
use arbitrary::Arbitrary;
use gtfs_atlas_core::normalize;
use gtfs_atlas_model::{AgencyKey, RawRecord};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct FuzzData {
    agency_key: String,
    fields: Vec<(FieldName, String)>,
}

#[derive(Debug, Arbitrary)]
enum FieldName {
    StopLat,
    StopLon,
    ShapePtLat,
    ShapePtLon,
    ShapePtSequence,
    RouteType,
    Price,
    Other(String),
}

impl FieldName {
    fn as_str(&self) -> &str {
        match self {
            FieldName::StopLat => "stop_lat",
            FieldName::StopLon => "stop_lon",
            FieldName::ShapePtLat => "shape_pt_lat",
            FieldName::ShapePtLon => "shape_pt_lon",
            FieldName::ShapePtSequence => "shape_pt_sequence",
            FieldName::RouteType => "route_type",
            FieldName::Price => "price",
            FieldName::Other(name) => name,
        }
    }
}

fuzz_target!(|data: FuzzData| {
    let Ok(agency_key) = AgencyKey::new(&data.agency_key) else {
        return;
    };
    let mut raw = RawRecord::new();
    for (name, value) in &data.fields {
        raw.insert(name.as_str(), value.as_str());
    }

    let once = normalize(raw, &agency_key);
    let twice = normalize(once.clone(), &agency_key);
    assert_eq!(once, twice);
    assert_eq!(once.agency_key(), Some(agency_key.as_str()));
});
