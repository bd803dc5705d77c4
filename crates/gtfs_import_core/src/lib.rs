pub mod archive;
pub mod cancel;
pub mod checksum;
pub mod config;
pub mod csv_reader;
mod error;
pub mod feed;
pub mod fetch;
pub mod importer;
pub mod job;
pub mod loader;
pub mod map_layers;
pub mod normalize;
pub mod progress;
pub mod sink;

pub use archive::extract_archive;
pub use cancel::{CancellationRegistry, CancellationToken};
pub use checksum::{collection_checksum, needs_refresh, ChecksumCache};
pub use config::{ImportConfig, DEFAULT_BATCH_SIZE, DEFAULT_REQUEST_TIMEOUT};
pub use csv_reader::{open_records, read_first_records, RecordReader};
pub use error::{
    AgencyResolutionError, ExtractionError, FetchError, ImportError, LoadError, ParseError,
    SinkError,
};
pub use feed::{feed_file_by_collection, present_feed_files, FEED_FILES};
pub use fetch::{download_to_path, BlobFetcher, HttpFetcher};
pub use importer::{
    resolve_agency_key, FileReport, ImportOutcome, ImportReport, ImportRequest, Importer,
    DEFAULT_OWNER,
};
pub use loader::{BatchedLoader, LoadSummary};
pub use map_layers::{shape_paths, stop_points, ShapePath, StopPoint};
pub use normalize::normalize;
pub use progress::{ImportProgress, ImportState, NoOpProgress};
pub use sink::{CollectionStats, FileSink, MemorySink, RecordSink, RecordStore};

pub use gtfs_atlas_model::{AgencyKey, FeedFile, FieldValue, NormalizedRecord, RawRecord};
