use std::fs;
use std::path::{Path, PathBuf};

use gtfs_atlas_model::AgencyKey;
use tracing::{debug, error};
use uuid::Uuid;

use crate::cancel::CancellationToken;
use crate::ImportError;

const ARCHIVE_NAME: &str = "latest.zip";
const FEED_DIR_NAME: &str = "feed";

/// A job's private working directory, removed when dropped.
#[derive(Debug)]
pub struct JobDir {
    path: PathBuf,
}

impl JobDir {
    pub fn create(temp_root: &Path, job_id: &Uuid) -> Result<Self, ImportError> {
        let path = temp_root.join(format!("gtfs-{}", job_id));
        fs::create_dir_all(&path).map_err(|source| ImportError::Io {
            path: path.clone(),
            source,
        })?;
        debug!("Created job directory {}", path.display());
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn archive_path(&self) -> PathBuf {
        self.path.join(ARCHIVE_NAME)
    }

    pub fn feed_dir(&self) -> PathBuf {
        self.path.join(FEED_DIR_NAME)
    }
}

impl Drop for JobDir {
    fn drop(&mut self) {
        match fs::remove_dir_all(&self.path) {
            Ok(()) => debug!("Removed job directory {}", self.path.display()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => error!("Error cleaning up temp files {}: {}", self.path.display(), err),
        }
    }
}

/// One run of the pipeline.
#[derive(Debug)]
pub struct ImportJob {
    pub id: Uuid,
    pub url: String,
    pub default_agency_key: AgencyKey,
    pub owner: String,
    pub token: CancellationToken,
    pub dir: JobDir,
}
