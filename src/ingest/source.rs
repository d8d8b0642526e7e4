//! Source acquisition
//!
//! Remote sources are probed with a `HEAD` request and downloaded into a
//! self-deleting temp file that keeps the URL's compression suffix, so the
//! reader can decompress `.gz`/`.bz2` payloads transparently. Local paths
//! are read in place.

use crate::config::WhoisLiteConfig;
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;
use tracing::debug;

/// Change-detection metadata of a source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceMeta {
    /// `Last-Modified` value, empty when the source doesn't report one
    pub last_modified: String,
    pub size: u64,
}

/// A source ready to be read
///
/// Holds the temp file of a download, if any; it is removed when this
/// value is dropped.
pub struct SourceFile {
    path: PathBuf,
    _temp: Option<NamedTempFile>,
}

impl SourceFile {
    pub fn local(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            _temp: None,
        }
    }

    fn temporary(temp: NamedTempFile) -> Self {
        Self {
            path: temp.path().to_path_buf(),
            _temp: Some(temp),
        }
    }

    /// Spool an in-memory payload into a temp file
    pub fn from_bytes(body: &[u8]) -> Result<Self> {
        let mut temp = tempfile::Builder::new()
            .prefix("whoislite-")
            .tempfile()
            .map_err(|e| anyhow!("Failed to create temp file: {}", e))?;
        temp.write_all(body)
            .map_err(|e| anyhow!("Failed to write temp file: {}", e))?;
        temp.flush()
            .map_err(|e| anyhow!("Failed to flush temp file: {}", e))?;
        Ok(Self::temporary(temp))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Buffered reader over the (decompressed) content
    pub fn reader(&self) -> Result<Box<dyn BufRead>> {
        let path = self
            .path
            .to_str()
            .ok_or_else(|| anyhow!("Non UTF-8 source path {:?}", self.path))?;
        let reader =
            oneio::get_reader(path).map_err(|e| anyhow!("Failed to open {}: {}", path, e))?;
        Ok(Box::new(BufReader::new(reader)))
    }
}

/// Where feed content comes from
pub trait SourceProvider {
    /// Metadata used to decide whether the source changed
    fn probe(&self, url: &str) -> Result<SourceMeta>;

    /// Make the content available for reading
    fn fetch(&self, url: &str) -> Result<SourceFile>;
}

/// HTTP(S) via `ureq`, anything else as a local path
pub struct DefaultSourceProvider {
    agent: ureq::Agent,
}

impl DefaultSourceProvider {
    pub fn new(connect_timeout: Duration, read_timeout: Duration) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_connect(Some(connect_timeout))
            .timeout_recv_body(Some(read_timeout))
            .build();
        Self {
            agent: ureq::Agent::new_with_config(config),
        }
    }

    pub fn from_config(config: &WhoisLiteConfig) -> Self {
        Self::new(config.connect_timeout(), config.read_timeout())
    }

    fn probe_remote(&self, url: &str) -> Result<SourceMeta> {
        let resp = self
            .agent
            .head(url)
            .call()
            .map_err(|e| anyhow!("HEAD {} failed: {}", url, e))?;

        let header = |name: &str| {
            resp.headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.trim().to_string())
        };

        Ok(SourceMeta {
            last_modified: header("last-modified").unwrap_or_default(),
            size: header("content-length")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
        })
    }

    fn fetch_remote(&self, url: &str) -> Result<SourceFile> {
        let mut temp = tempfile::Builder::new()
            .prefix("whoislite-")
            .suffix(compression_suffix(url))
            .tempfile()
            .map_err(|e| anyhow!("Failed to create temp file for {}: {}", url, e))?;

        let resp = self
            .agent
            .get(url)
            .call()
            .map_err(|e| anyhow!("GET {} failed: {}", url, e))?;
        let mut body = resp.into_body().into_reader();
        let copied = std::io::copy(&mut body, temp.as_file_mut())
            .map_err(|e| anyhow!("Failed to download {}: {}", url, e))?;
        temp.flush()
            .map_err(|e| anyhow!("Failed to flush download of {}: {}", url, e))?;

        debug!("downloaded {} bytes from {} to {:?}", copied, url, temp.path());
        Ok(SourceFile::temporary(temp))
    }
}

impl SourceProvider for DefaultSourceProvider {
    fn probe(&self, url: &str) -> Result<SourceMeta> {
        if is_remote(url) {
            return self.probe_remote(url);
        }

        let meta = std::fs::metadata(url).map_err(|e| anyhow!("Failed to stat {}: {}", url, e))?;
        let last_modified = meta
            .modified()
            .map(|t| DateTime::<Utc>::from(t).to_rfc2822())
            .unwrap_or_default();
        Ok(SourceMeta {
            last_modified,
            size: meta.len(),
        })
    }

    fn fetch(&self, url: &str) -> Result<SourceFile> {
        if is_remote(url) {
            self.fetch_remote(url)
        } else {
            let path = Path::new(url);
            if !path.exists() {
                return Err(anyhow!("Source file {} does not exist", url));
            }
            Ok(SourceFile::local(path))
        }
    }
}

fn is_remote(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Compression suffix of the URL's last path segment, or "" for plain text
fn compression_suffix(url: &str) -> &'static str {
    let path = url.split(&['?', '#'][..]).next().unwrap_or(url);
    if path.ends_with(".gz") {
        ".gz"
    } else if path.ends_with(".bz2") {
        ".bz2"
    } else {
        ""
    }
}
