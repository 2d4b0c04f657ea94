use std::fs::File;
use std::path::Path;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use tracing::info;

use crate::error::DwcaError;

pub trait ArchiveFetcher: Send + Sync {
    /// Saves the resource at `url` to `destination` and returns its size.
    fn fetch(&self, url: &str, destination: &Path) -> Result<u64, DwcaError>;
}

#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, DwcaError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("dwca-norm/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| DwcaError::Download(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| DwcaError::Download(err.to_string()))?;
        Ok(Self { client })
    }
}

impl ArchiveFetcher for HttpFetcher {
    fn fetch(&self, url: &str, destination: &Path) -> Result<u64, DwcaError> {
        info!(url, "downloading archive");
        let mut response = self
            .client
            .get(url)
            .send()
            .map_err(|err| DwcaError::Download(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "archive request failed".to_string());
            return Err(DwcaError::DownloadStatus { status, message });
        }
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|err| DwcaError::Filesystem(err.to_string()))?;
        }
        let mut file =
            File::create(destination).map_err(|err| DwcaError::Filesystem(err.to_string()))?;
        let size = response
            .copy_to(&mut file)
            .map_err(|err| DwcaError::Download(err.to_string()))?;
        info!(url, bytes = size, "download finished");
        Ok(size)
    }
}

pub fn is_remote(input: &str) -> bool {
    let lower = input.trim().to_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Last path segment of a URL without query or fragment.
pub fn file_name_from_url(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    match path.trim_end_matches('/').rsplit('/').next() {
        Some(name) if !name.is_empty() && !name.contains(':') => name.to_string(),
        _ => "archive.zip".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognises_remote_inputs() {
        assert!(is_remote("https://example.org/dwca.zip"));
        assert!(is_remote("HTTP://example.org/dwca.zip"));
        assert!(!is_remote("/data/dwca.zip"));
    }

    #[test]
    fn file_name_ignores_query() {
        assert_eq!(
            file_name_from_url("https://example.org/files/vascan.tar.gz?download=1"),
            "vascan.tar.gz"
        );
        assert_eq!(file_name_from_url("https://example.org/"), "example.org");
        assert_eq!(file_name_from_url("https://"), "archive.zip");
    }
}
