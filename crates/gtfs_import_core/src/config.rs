use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_BATCH_SIZE: usize = 1000;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct ImportConfig {
    pub batch_size: usize,
    pub temp_root: PathBuf,
    pub user_agent: String,
    pub request_timeout: Duration,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            temp_root: std::env::temp_dir(),
            user_agent: format!("gtfs-atlas/{}", env!("CARGO_PKG_VERSION")),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl ImportConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// A zero batch size is bumped to one.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_temp_root(mut self, temp_root: impl AsRef<Path>) -> Self {
        self.temp_root = temp_root.as_ref().to_path_buf();
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_batching() {
        let config = ImportConfig::default();
        assert_eq!(config.batch_size, 1000);
        assert!(config.user_agent.starts_with("gtfs-atlas/"));
    }

    #[test]
    fn zero_batch_size_is_clamped() {
        assert_eq!(ImportConfig::new().with_batch_size(0).batch_size, 1);
    }
}
