//! Projections of stored records into the shapes the map UI draws.

use std::collections::BTreeMap;

use gtfs_atlas_model::NormalizedRecord;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StopPoint {
    pub stop_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_name: Option<String>,
    pub agency_key: String,
    pub lon: f64,
    pub lat: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location_type: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_station: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShapePath {
    pub shape_id: String,
    pub agency_key: String,
    pub coordinates: Vec<[f64; 2]>,
}

/// Stops that have a location. Others are left out.
pub fn stop_points(records: &[NormalizedRecord]) -> Vec<StopPoint> {
    records
        .iter()
        .filter_map(|record| {
            let [lon, lat] = record.loc()?;
            Some(StopPoint {
                stop_id: record.get_str("stop_id")?.to_string(),
                stop_name: record.get_str("stop_name").map(str::to_string),
                agency_key: record.agency_key().unwrap_or_default().to_string(),
                lon,
                lat,
                location_type: record.get_i64("location_type"),
                parent_station: record.get_str("parent_station").map(str::to_string),
            })
        })
        .collect()
}

/// Joins shape points into one polyline per `(agency_key, shape_id)`.
///
/// Points follow `shape_pt_sequence`; points without one go last, in input
/// order. Paths come out sorted by shape id.
pub fn shape_paths(records: &[NormalizedRecord]) -> Vec<ShapePath> {
    let mut groups: BTreeMap<(String, String), Vec<(Option<i64>, [f64; 2])>> = BTreeMap::new();
    for record in records {
        let (Some(shape_id), Some(loc)) = (record.get_str("shape_id"), record.loc()) else {
            continue;
        };
        let agency_key = record.agency_key().unwrap_or_default().to_string();
        groups
            .entry((shape_id.to_string(), agency_key))
            .or_default()
            .push((record.get_i64("shape_pt_sequence"), loc));
    }

    groups
        .into_iter()
        .map(|((shape_id, agency_key), mut points)| {
            points.sort_by_key(|(sequence, _)| (sequence.is_none(), sequence.unwrap_or(0)));
            ShapePath {
                shape_id,
                agency_key,
                coordinates: points.into_iter().map(|(_, loc)| loc).collect(),
            }
        })
        .collect()
}
