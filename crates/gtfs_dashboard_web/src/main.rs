mod errors;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::Context;
use axum::{
    extract::{Path as AxumPath, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use uuid::Uuid;

use gtfs_atlas_core::feed::{SHAPES_FILE, STOPS_FILE};
use gtfs_atlas_core::fetch::parse_feed_url;
use gtfs_atlas_core::{
    collection_checksum, needs_refresh, shape_paths, stop_points, AgencyKey, ChecksumCache,
    FileSink, ImportConfig, ImportOutcome, ImportProgress, ImportRequest, ImportState, Importer,
    MemorySink, RecordStore, ShapePath, StopPoint, DEFAULT_BATCH_SIZE, DEFAULT_OWNER,
};

use crate::errors::{ApiError, ApiResult};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_target(false).init();

    let store = load_store()?;
    let config = ImportConfig::new().with_batch_size(load_batch_size());
    let importer =
        Importer::http(Arc::new(store.clone()), config).context("build http client")?;
    let state = AppState::new(store, importer, load_default_agency_key()?);
    spawn_job_cleanup(state.clone());

    let addr = load_bind_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("bind {}", addr))?;
    tracing::info!("listening on {}", addr);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/version", get(version))
        .route("/api/import", post(start_import))
        .route("/api/import/cancel", post(cancel_import))
        .route("/api/import/:job_id", get(job_status))
        .route("/api/stops", get(stops))
        .route("/api/stops/checksum", get(stops_checksum))
        .route("/api/shapes", get(shapes))
        .route("/api/shapes/checksum", get(shapes_checksum))
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!("failed to listen for shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartImportBody {
    url: String,
    agency_key: Option<String>,
    owner: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StartImportResponse {
    job_id: String,
}

#[derive(Debug, Default, Deserialize)]
struct CancelBody {
    owner: Option<String>,
}

#[derive(Debug, Serialize)]
struct CancelResponse {
    cancelled: bool,
}

#[derive(Debug, Deserialize)]
struct ChecksumQuery {
    stored: Option<String>,
}

#[derive(Debug, Serialize)]
struct ChecksumResponse {
    checksum: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    refresh: Option<bool>,
}

#[derive(Debug, Serialize)]
struct VersionResponse {
    version: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum JobStatus {
    Processing,
    Success,
    Cancelled,
    Error,
}

#[derive(Debug, Clone, Serialize)]
struct FileProgress {
    file: String,
    inserted: u64,
}

#[derive(Debug, Clone)]
struct Job {
    id: String,
    owner: String,
    status: JobStatus,
    state: ImportState,
    agency_key: Option<String>,
    error: Option<String>,
    error_kind: Option<&'static str>,
    files: Vec<FileProgress>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Job {
    fn new(id: String, owner: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            owner,
            status: JobStatus::Processing,
            state: ImportState::Idle,
            agency_key: None,
            error: None,
            error_kind: None,
            files: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct JobStatusResponse {
    job_id: String,
    owner: String,
    status: JobStatus,
    #[serde(flatten)]
    state: ImportState,
    agency_key: Option<String>,
    error: Option<String>,
    error_kind: Option<&'static str>,
    files: Vec<FileProgress>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<Job> for JobStatusResponse {
    fn from(job: Job) -> Self {
        Self {
            job_id: job.id,
            owner: job.owner,
            status: job.status,
            state: job.state,
            agency_key: job.agency_key,
            error: job.error,
            error_kind: job.error_kind,
            files: job.files,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

#[derive(Clone)]
struct AppState {
    jobs: Arc<RwLock<HashMap<String, Job>>>,
    store: Arc<dyn RecordStore>,
    importer: Arc<Importer>,
    checksums: Arc<ChecksumCache>,
    default_agency_key: AgencyKey,
}

impl AppState {
    fn new(store: Arc<dyn RecordStore>, importer: Importer, default_agency_key: AgencyKey) -> Self {
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            store,
            importer: Arc::new(importer),
            checksums: Arc::new(ChecksumCache::new()),
            default_agency_key,
        }
    }
}

/// Mirrors pipeline progress into the job table.
struct JobProgress {
    state: AppState,
    job_id: String,
}

impl ImportProgress for JobProgress {
    fn on_state(&self, state: &ImportState) {
        update_job(&self.state, &self.job_id, |job| job.state = state.clone());
    }

    fn on_start_file(&self, _file: &str) {}

    fn on_finish_file(&self, file: &str, inserted: u64) {
        update_job(&self.state, &self.job_id, |job| {
            job.files.push(FileProgress {
                file: file.to_string(),
                inserted,
            })
        });
    }
}

async fn version() -> Json<VersionResponse> {
    Json(VersionResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn start_import(
    State(state): State<AppState>,
    Json(body): Json<StartImportBody>,
) -> ApiResult<Json<StartImportResponse>> {
    parse_feed_url(&body.url).map_err(|err| ApiError::BadRequest(err.to_string()))?;
    let agency_key = match body.agency_key.as_deref() {
        Some(value) => {
            AgencyKey::new(value).map_err(|err| ApiError::BadRequest(err.to_string()))?
        }
        None => state.default_agency_key.clone(),
    };
    let owner = owner_or_default(body.owner);

    let job_id = Uuid::new_v4();
    let request = ImportRequest::new(body.url, agency_key)
        .with_owner(owner.clone())
        .with_job_id(job_id);
    insert_job(&state, Job::new(job_id.to_string(), owner));
    spawn_job_processing(state, request);

    Ok(Json(StartImportResponse {
        job_id: job_id.to_string(),
    }))
}

async fn cancel_import(
    State(state): State<AppState>,
    body: Option<Json<CancelBody>>,
) -> Json<CancelResponse> {
    let owner = owner_or_default(body.and_then(|Json(body)| body.owner));
    Json(CancelResponse {
        cancelled: state.importer.request_cancel(&owner),
    })
}

async fn job_status(
    State(state): State<AppState>,
    AxumPath(job_id): AxumPath<String>,
) -> ApiResult<Json<JobStatusResponse>> {
    let job = get_job(&state, &job_id)
        .ok_or_else(|| ApiError::NotFound(format!("job {}", job_id)))?;
    Ok(Json(job.into()))
}

async fn stops(State(state): State<AppState>) -> ApiResult<Json<Vec<StopPoint>>> {
    let store = state.store.clone();
    let records =
        tokio::task::spawn_blocking(move || store.find_all(STOPS_FILE.collection)).await??;
    Ok(Json(stop_points(&records)))
}

async fn shapes(State(state): State<AppState>) -> ApiResult<Json<Vec<ShapePath>>> {
    let store = state.store.clone();
    let records =
        tokio::task::spawn_blocking(move || store.find_all(SHAPES_FILE.collection)).await??;
    Ok(Json(shape_paths(&records)))
}

async fn stops_checksum(
    State(state): State<AppState>,
    Query(query): Query<ChecksumQuery>,
) -> ApiResult<Json<ChecksumResponse>> {
    checksum_response(state, STOPS_FILE.collection, query).await
}

async fn shapes_checksum(
    State(state): State<AppState>,
    Query(query): Query<ChecksumQuery>,
) -> ApiResult<Json<ChecksumResponse>> {
    checksum_response(state, SHAPES_FILE.collection, query).await
}

async fn checksum_response(
    state: AppState,
    collection: &'static str,
    query: ChecksumQuery,
) -> ApiResult<Json<ChecksumResponse>> {
    let checksum = tokio::task::spawn_blocking(move || {
        state.checksums.get_or_compute(collection, || {
            state
                .store
                .stats(collection)
                .map(|stats| collection_checksum(&stats))
        })
    })
    .await??;
    let refresh = query
        .stored
        .as_deref()
        .map(|stored| needs_refresh(Some(stored), &checksum));
    Ok(Json(ChecksumResponse { checksum, refresh }))
}

fn owner_or_default(owner: Option<String>) -> String {
    owner
        .map(|owner| owner.trim().to_string())
        .filter(|owner| !owner.is_empty())
        .unwrap_or_else(|| DEFAULT_OWNER.to_string())
}

fn load_bind_addr() -> String {
    std::env::var("GTFS_ATLAS_WEB_BIND").unwrap_or_else(|_| "0.0.0.0:3000".to_string())
}

fn load_store() -> anyhow::Result<Arc<dyn RecordStore>> {
    match std::env::var("GTFS_ATLAS_WEB_STORE_DIR") {
        Ok(dir) if !dir.trim().is_empty() => {
            let dir = PathBuf::from(dir);
            let sink = FileSink::open(&dir)
                .with_context(|| format!("open store {}", dir.display()))?;
            tracing::info!("using file store at {}", dir.display());
            Ok(Arc::new(sink))
        }
        _ => {
            tracing::info!("using in-memory store");
            Ok(Arc::new(MemorySink::new()))
        }
    }
}

fn load_default_agency_key() -> anyhow::Result<AgencyKey> {
    let value = std::env::var("GTFS_ATLAS_WEB_DEFAULT_AGENCY_KEY")
        .unwrap_or_else(|_| "default".to_string());
    AgencyKey::new(&value).with_context(|| format!("invalid default agency key {:?}", value))
}

fn load_batch_size() -> usize {
    match std::env::var("GTFS_ATLAS_WEB_BATCH_SIZE") {
        Ok(value) => value
            .trim()
            .parse::<usize>()
            .ok()
            .filter(|size| *size > 0)
            .unwrap_or(DEFAULT_BATCH_SIZE),
        Err(_) => DEFAULT_BATCH_SIZE,
    }
}

fn load_job_ttl_ms() -> u64 {
    let default_ms: u64 = 24 * 60 * 60 * 1000;
    match std::env::var("GTFS_ATLAS_WEB_JOB_TTL_MS") {
        Ok(value) => value.trim().parse::<u64>().unwrap_or(default_ms),
        Err(_) => default_ms,
    }
}

fn spawn_job_cleanup(state: AppState) {
    let ttl_ms = load_job_ttl_ms();
    if ttl_ms == 0 {
        return;
    }
    let period = Duration::from_millis(ttl_ms.clamp(1000, 300_000));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            let removed = cleanup_jobs(&state, ttl_ms, Utc::now());
            if removed > 0 {
                tracing::debug!("removed {} expired jobs", removed);
            }
        }
    });
}

/// Drops finished jobs last updated at least `ttl_ms` before `now`.
fn cleanup_jobs(state: &AppState, ttl_ms: u64, now: DateTime<Utc>) -> usize {
    let Ok(mut jobs) = state.jobs.write() else {
        return 0;
    };
    let before = jobs.len();
    jobs.retain(|_, job| {
        if job.status == JobStatus::Processing {
            return true;
        }
        let age_ms = (now - job.updated_at).num_milliseconds();
        u64::try_from(age_ms).map_or(true, |age_ms| age_ms < ttl_ms)
    });
    before - jobs.len()
}

fn insert_job(state: &AppState, job: Job) {
    if let Ok(mut jobs) = state.jobs.write() {
        jobs.insert(job.id.clone(), job);
    }
}

fn get_job(state: &AppState, job_id: &str) -> Option<Job> {
    state
        .jobs
        .read()
        .ok()
        .and_then(|jobs| jobs.get(job_id).cloned())
}

fn update_job(state: &AppState, job_id: &str, update: impl FnOnce(&mut Job)) {
    if let Ok(mut jobs) = state.jobs.write() {
        if let Some(job) = jobs.get_mut(job_id) {
            update(job);
            job.updated_at = Utc::now();
        }
    }
}

fn spawn_job_processing(state: AppState, request: ImportRequest) {
    let job_id = request
        .job_id
        .map(|id| id.to_string())
        .unwrap_or_default();
    tokio::spawn(async move {
        let state_for_block = state.clone();
        let result =
            tokio::task::spawn_blocking(move || process_job(&state_for_block, &request)).await;

        if let Err(err) = result {
            state.checksums.invalidate();
            update_job(&state, &job_id, |job| {
                job.status = JobStatus::Error;
                job.state = ImportState::Failed;
                job.error = Some(format!("join error: {}", err));
            });
        }
    });
}

fn process_job(state: &AppState, request: &ImportRequest) {
    let job_id = request
        .job_id
        .map(|id| id.to_string())
        .unwrap_or_default();
    let progress = JobProgress {
        state: state.clone(),
        job_id: job_id.clone(),
    };
    let result = state.importer.import(request, Some(&progress));
    state.checksums.invalidate();

    update_job(state, &job_id, |job| match result {
        Ok(report) => {
            job.status = match report.outcome {
                ImportOutcome::Completed => JobStatus::Success,
                ImportOutcome::Cancelled => JobStatus::Cancelled,
            };
            job.agency_key = Some(report.agency_key.to_string());
        }
        Err(err) => {
            job.status = JobStatus::Error;
            job.error_kind = Some(err.kind());
            job.error = Some(err.to_string());
        }
    });
}
