use std::path::Path;

use reqwest::blocking::Client;
use tracing::info;
use url::Url;

use crate::{FetchError, ImportConfig, ImportError};

/// Retrieves a feed archive by URL. Implementations make a single attempt.
pub trait BlobFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

impl<F> BlobFetcher for F
where
    F: Fn(&str) -> Result<Vec<u8>, FetchError> + Send + Sync,
{
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        self(url)
    }
}

pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(config: &ImportConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.request_timeout)
            .build()
            .map_err(FetchError::Client)?;
        Ok(Self { client })
    }
}

impl BlobFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let parsed = parse_feed_url(url)?;
        let response = self
            .client
            .get(parsed)
            .send()
            .map_err(|source| FetchError::Http {
                url: url.to_string(),
                source,
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let body = response.bytes().map_err(|source| FetchError::Http {
            url: url.to_string(),
            source,
        })?;
        Ok(body.to_vec())
    }
}

pub fn parse_feed_url(url: &str) -> Result<Url, FetchError> {
    let parsed = Url::parse(url.trim()).map_err(|source| FetchError::InvalidUrl {
        url: url.to_string(),
        source,
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        scheme => Err(FetchError::UnsupportedScheme {
            url: url.to_string(),
            scheme: scheme.to_string(),
        }),
    }
}

/// Fetches `url` and writes the complete body to `path`.
pub fn download_to_path(
    fetcher: &dyn BlobFetcher,
    url: &str,
    path: &Path,
) -> Result<u64, ImportError> {
    info!("Downloading GTFS from {}...", url);
    let bytes = fetcher.fetch(url)?;
    std::fs::write(path, &bytes).map_err(|source| ImportError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(bytes.len() as u64)
}
