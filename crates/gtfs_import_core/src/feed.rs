use std::path::Path;

use gtfs_atlas_model::FeedFile;

pub const AGENCY_FILE: FeedFile = FeedFile::new("agency", "agencies");
pub const CALENDAR_DATES_FILE: FeedFile = FeedFile::new("calendar_dates", "calendardates");
pub const CALENDAR_FILE: FeedFile = FeedFile::new("calendar", "calendars");
pub const FARE_ATTRIBUTES_FILE: FeedFile = FeedFile::new("fare_attributes", "fareattributes");
pub const FARE_RULES_FILE: FeedFile = FeedFile::new("fare_rules", "farerules");
pub const FEED_INFO_FILE: FeedFile = FeedFile::new("feed_info", "feedinfos");
pub const FREQUENCIES_FILE: FeedFile = FeedFile::new("frequencies", "frequencies");
pub const ROUTES_FILE: FeedFile = FeedFile::new("routes", "routes");
pub const SHAPES_FILE: FeedFile = FeedFile::new("shapes", "shapes");
pub const STOPS_FILE: FeedFile = FeedFile::new("stops", "stops");
pub const TRANSFERS_FILE: FeedFile = FeedFile::new("transfers", "transfers");
pub const TRIPS_FILE: FeedFile = FeedFile::new("trips", "trips");

/// Files imported by the pipeline, in processing order.
pub const FEED_FILES: &[FeedFile] = &[
    AGENCY_FILE,
    CALENDAR_DATES_FILE,
    CALENDAR_FILE,
    FARE_ATTRIBUTES_FILE,
    FARE_RULES_FILE,
    FEED_INFO_FILE,
    FREQUENCIES_FILE,
    ROUTES_FILE,
    SHAPES_FILE,
    STOPS_FILE,
    TRANSFERS_FILE,
    TRIPS_FILE,
];

pub fn feed_file_by_collection(collection: &str) -> Option<&'static FeedFile> {
    FEED_FILES.iter().find(|file| file.collection == collection)
}

/// Known files present in an extracted feed directory, in processing order.
pub fn present_feed_files(dir: &Path) -> Vec<&'static FeedFile> {
    FEED_FILES
        .iter()
        .filter(|file| dir.join(file.file_name()).is_file())
        .collect()
}
