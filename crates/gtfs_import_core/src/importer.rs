use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use gtfs_atlas_model::AgencyKey;
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::archive::extract_archive;
use crate::cancel::{CancellationRegistry, CancellationToken};
use crate::csv_reader::{open_records, read_first_records};
use crate::feed::{present_feed_files, AGENCY_FILE, FEED_FILES};
use crate::fetch::{download_to_path, BlobFetcher, HttpFetcher};
use crate::job::{ImportJob, JobDir};
use crate::loader::BatchedLoader;
use crate::normalize::normalize;
use crate::progress::{ImportProgress, ImportState, NoOpProgress};
use crate::sink::RecordSink;
use crate::{AgencyResolutionError, FetchError, ImportConfig, ImportError};

pub const DEFAULT_OWNER: &str = "default";
const AGENCY_ID_COLUMN: &str = "agency_id";

#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub url: String,
    pub agency_key: AgencyKey,
    pub owner: String,
    pub job_id: Option<Uuid>,
}

impl ImportRequest {
    pub fn new(url: impl Into<String>, agency_key: AgencyKey) -> Self {
        Self {
            url: url.into(),
            agency_key,
            owner: DEFAULT_OWNER.to_string(),
            job_id: None,
        }
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    pub fn with_job_id(mut self, job_id: Uuid) -> Self {
        self.job_id = Some(job_id);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportOutcome {
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileReport {
    pub file: String,
    pub collection: String,
    pub deleted: u64,
    pub inserted: u64,
    pub batches: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub job_id: Uuid,
    pub agency_key: AgencyKey,
    pub outcome: ImportOutcome,
    pub files: Vec<FileReport>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ImportReport {
    pub fn total_inserted(&self) -> u64 {
        self.files.iter().map(|file| file.inserted).sum()
    }
}

/// Releases the owner's cancellation token when the job ends.
struct Registration<'a> {
    registry: &'a CancellationRegistry,
    owner: &'a str,
    token: CancellationToken,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.registry.release(self.owner, &self.token);
    }
}

/// Runs GTFS imports: download, extract, resolve the agency key, then load
/// each known feed file into its collection.
///
/// One call occupies the calling thread until the job ends.
pub struct Importer {
    fetcher: Box<dyn BlobFetcher>,
    sink: Arc<dyn RecordSink>,
    config: ImportConfig,
    cancellations: Arc<CancellationRegistry>,
}

impl Importer {
    pub fn new(
        fetcher: Box<dyn BlobFetcher>,
        sink: Arc<dyn RecordSink>,
        config: ImportConfig,
    ) -> Self {
        Self {
            fetcher,
            sink,
            config,
            cancellations: Arc::new(CancellationRegistry::new()),
        }
    }

    pub fn http(sink: Arc<dyn RecordSink>, config: ImportConfig) -> Result<Self, FetchError> {
        let fetcher = HttpFetcher::new(&config)?;
        Ok(Self::new(Box::new(fetcher), sink, config))
    }

    pub fn with_cancellations(mut self, cancellations: Arc<CancellationRegistry>) -> Self {
        self.cancellations = cancellations;
        self
    }

    pub fn cancellations(&self) -> &Arc<CancellationRegistry> {
        &self.cancellations
    }

    pub fn config(&self) -> &ImportConfig {
        &self.config
    }

    /// Flags `owner`'s running import. It stops before its next file.
    pub fn request_cancel(&self, owner: &str) -> bool {
        self.cancellations.request_cancel(owner)
    }

    pub fn import(
        &self,
        request: &ImportRequest,
        progress: Option<&dyn ImportProgress>,
    ) -> Result<ImportReport, ImportError> {
        let progress = progress.unwrap_or(&NoOpProgress);
        let started_at = Utc::now();
        let job_id = request.job_id.unwrap_or_else(Uuid::new_v4);

        let token = self.cancellations.register(&request.owner);
        let _registration = Registration {
            registry: &self.cancellations,
            owner: &request.owner,
            token: token.clone(),
        };

        let result = JobDir::create(&self.config.temp_root, &job_id).and_then(|dir| {
            let job = ImportJob {
                id: job_id,
                url: request.url.clone(),
                default_agency_key: request.agency_key.clone(),
                owner: request.owner.clone(),
                token,
                dir,
            };
            self.run(&job, progress)
        });

        match result {
            Ok((agency_key, outcome, files)) => Ok(ImportReport {
                job_id,
                agency_key,
                outcome,
                files,
                started_at,
                finished_at: Utc::now(),
            }),
            Err(err) => {
                error!("GTFS Import failed: {}", err);
                progress.on_state(&ImportState::Failed);
                Err(err)
            }
        }
    }

    fn run(
        &self,
        job: &ImportJob,
        progress: &dyn ImportProgress,
    ) -> Result<(AgencyKey, ImportOutcome, Vec<FileReport>), ImportError> {
        debug!("Job {} working in {}", job.id, job.dir.path().display());
        progress.on_state(&ImportState::Downloading);
        let archive_path = job.dir.archive_path();
        download_to_path(self.fetcher.as_ref(), &job.url, &archive_path)?;

        progress.on_state(&ImportState::Extracting);
        info!("Unzipping...");
        let feed_dir = job.dir.feed_dir();
        extract_archive(&archive_path, &feed_dir)?;

        progress.on_state(&ImportState::ResolvingAgencyKey);
        let agency_key = resolve_agency_key(&feed_dir, &job.default_agency_key);
        progress.set_total_files(present_feed_files(&feed_dir).len());

        let loader = BatchedLoader::new(self.sink.as_ref(), self.config.batch_size);
        let mut files = Vec::new();
        for (index, feed_file) in FEED_FILES.iter().enumerate() {
            if job.token.is_cancelled() {
                info!("GTFS Import cancelled by {} before {}", job.owner, feed_file);
                progress.on_state(&ImportState::Cancelled);
                return Ok((agency_key, ImportOutcome::Cancelled, files));
            }

            let file_name = feed_file.file_name();
            let path = feed_dir.join(&file_name);
            if !path.is_file() {
                info!("Skipping {} (not found)", file_name);
                continue;
            }

            progress.on_state(&ImportState::ImportingFile {
                index,
                file: file_name.clone(),
            });
            progress.on_start_file(&file_name);
            info!("Importing {}...", file_name);

            let reader = open_records(&path).map_err(|source| ImportError::Parse {
                file: file_name.clone(),
                source,
            })?;
            let records = reader.map(|record| {
                record
                    .map(|raw| normalize(raw, &agency_key))
                    .map_err(|source| ImportError::Parse {
                        file: file_name.clone(),
                        source,
                    })
            });
            let summary = loader.load(feed_file.collection, &agency_key, records)?;

            progress.on_finish_file(&file_name, summary.inserted);
            files.push(FileReport {
                file: file_name,
                collection: feed_file.collection.to_string(),
                deleted: summary.deleted,
                inserted: summary.inserted,
                batches: summary.batches,
            });
        }

        info!("GTFS Import completed successfully.");
        progress.on_state(&ImportState::Completed);
        Ok((agency_key, ImportOutcome::Completed, files))
    }
}

/// Reads `agency_id` from the first row of `agency.txt` in `feed_dir`.
pub fn read_agency_id(feed_dir: &Path) -> Result<Option<AgencyKey>, AgencyResolutionError> {
    let path = feed_dir.join(AGENCY_FILE.file_name());
    if !path.is_file() {
        return Ok(None);
    }
    let first = read_first_records(&path, 1)?;
    Ok(first
        .first()
        .and_then(|record| record.get(AGENCY_ID_COLUMN))
        .and_then(|agency_id| AgencyKey::new(agency_id).ok()))
}

/// The key an import writes under: `agency.txt`'s `agency_id` when present,
/// otherwise `default_key`. Read failures fall back to the default.
pub fn resolve_agency_key(feed_dir: &Path, default_key: &AgencyKey) -> AgencyKey {
    match read_agency_id(feed_dir) {
        Ok(Some(agency_key)) => {
            info!("Using agency_key from agency.txt: {}", agency_key);
            agency_key
        }
        Ok(None) => default_key.clone(),
        Err(err) => {
            warn!("{}; using {}", err, default_key);
            default_key.clone()
        }
    }
}
