use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("failed to build http client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("invalid feed url {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("unsupported url scheme {scheme} in {url}")]
    UnsupportedScheme { url: String, scheme: String },
    #[error("failed to download GTFS from {url}: HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("failed to download GTFS from {url}: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to download GTFS from {url}: {message}")]
    Other { url: String, message: String },
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("invalid zip archive {path}: {source}")]
    Archive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },
    #[error("failed to read zip entry {name}: {source}")]
    Entry {
        name: String,
        #[source]
        source: zip::result::ZipError,
    },
    #[error("io error extracting to {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read {file} near line {line}: {source}")]
    Read {
        file: String,
        line: u64,
        #[source]
        source: csv::Error,
    },
    #[error("quoted field opened in {file} at line {line} is never closed")]
    UnclosedQuote { file: String, line: u64 },
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt record in {path} line {line}: {source}")]
    Corrupt {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("{0}")]
    Backend(String),
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to delete {agency_key} records from {collection}: {source}")]
    Delete {
        collection: String,
        agency_key: String,
        #[source]
        source: SinkError,
    },
    #[error("failed to insert batch {batch} into {collection}: {source}")]
    Insert {
        collection: String,
        batch: usize,
        #[source]
        source: SinkError,
    },
}

/// Non-fatal; the importer logs it and keeps the caller's default key.
#[derive(Debug, thiserror::Error)]
#[error("failed to read agency_id from agency.txt: {0}")]
pub struct AgencyResolutionError(#[from] pub ParseError);

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    #[error("failed to parse {file}: {source}")]
    Parse {
        file: String,
        #[source]
        source: ParseError,
    },
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ImportError {
    /// Short machine-readable kind, used in job status payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            ImportError::Fetch(_) => "fetch_error",
            ImportError::Extraction(_) => "extraction_error",
            ImportError::Parse { .. } => "parse_error",
            ImportError::Load(_) => "load_error",
            ImportError::Io { .. } => "io_error",
        }
    }
}
