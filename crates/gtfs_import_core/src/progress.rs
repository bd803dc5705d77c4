use serde::Serialize;

/// Where an import currently is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ImportState {
    Idle,
    Downloading,
    Extracting,
    ResolvingAgencyKey,
    ImportingFile { index: usize, file: String },
    Completed,
    Failed,
    Cancelled,
}

impl ImportState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ImportState::Completed | ImportState::Failed | ImportState::Cancelled
        )
    }
}

/// Receives import progress events.
pub trait ImportProgress: Send + Sync {
    fn on_state(&self, state: &ImportState);

    /// Number of feed files present in the archive.
    fn set_total_files(&self, count: usize) {
        let _ = count;
    }

    fn on_start_file(&self, file: &str);

    fn on_finish_file(&self, file: &str, inserted: u64);
}

pub struct NoOpProgress;

impl ImportProgress for NoOpProgress {
    fn on_state(&self, _state: &ImportState) {}
    fn on_start_file(&self, _file: &str) {}
    fn on_finish_file(&self, _file: &str, _inserted: u64) {}
}
