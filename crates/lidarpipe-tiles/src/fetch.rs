//! Tile downloads.
//!
//! [`HttpFetcher`] streams `http://` and `https://` locators straight to disk.
//! `file://` locators and bare paths are copied, which lets a run be repeated
//! against a local mirror of the survey data.
//!
//! Bodies are written to `<dest>.part` and renamed once complete, so a failed
//! or interrupted download never leaves a file at the destination path. A
//! local locator that already names the destination is left alone.
//!
//! ## Thread Safety
//!
//! One fetcher is shared by every worker. The blocking client is internally
//! reference counted and the session statistics are atomics.

use crate::{Result, TileError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Default request timeout. Point cloud archives are several hundred MB.
const DEFAULT_TIMEOUT_SECS: u64 = 600;

/// What a fetch left at the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fetched {
    /// The tile was written to the destination.
    Written(u64),
    /// The locator is the destination file itself; nothing was written and
    /// the file does not belong to the tile.
    InPlace(u64),
}

impl Fetched {
    /// Size of the file at the destination.
    pub fn bytes(&self) -> u64 {
        match *self {
            Fetched::Written(bytes) | Fetched::InPlace(bytes) => bytes,
        }
    }
}

/// Something that can put a tile at a local path.
pub trait TileFetcher: Send + Sync {
    /// Fetch `locator` into `dest`.
    fn fetch(&self, locator: &str, dest: &Path) -> Result<Fetched>;
}

/// Download settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Whole-request timeout in seconds.
    pub timeout_secs: u64,
    /// User-Agent header; reqwest's default when unset.
    pub user_agent: Option<String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            user_agent: None,
        }
    }
}

/// Download statistics for the fetcher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchStats {
    /// Number of tiles fetched this session.
    pub tiles_fetched: usize,
    /// Total bytes written this session.
    pub bytes_fetched: u64,
}

enum Source<'a> {
    Http(&'a str),
    File(PathBuf),
}

impl<'a> Source<'a> {
    fn parse(locator: &'a str) -> Result<Self> {
        if locator.starts_with("http://") || locator.starts_with("https://") {
            Ok(Source::Http(locator))
        } else if let Some(path) = locator.strip_prefix("file://") {
            Ok(Source::File(PathBuf::from(path)))
        } else if locator.contains("://") {
            Err(TileError::NetworkFetch {
                locator: locator.to_string(),
                reason: "unsupported scheme".to_string(),
            })
        } else {
            Ok(Source::File(PathBuf::from(locator)))
        }
    }
}

/// HTTP(S) and local-file tile fetcher.
pub struct HttpFetcher {
    /// HTTP client for downloading tiles.
    client: reqwest::blocking::Client,
    /// Number of tiles fetched this session.
    tiles_fetched: AtomicUsize,
    /// Total bytes fetched this session.
    bytes_fetched: AtomicU64,
}

impl std::fmt::Debug for HttpFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpFetcher")
            .field("stats", &self.stats())
            .finish()
    }
}

impl HttpFetcher {
    /// Create a fetcher.
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let mut builder =
            reqwest::blocking::Client::builder().timeout(Duration::from_secs(config.timeout_secs));
        if let Some(agent) = &config.user_agent {
            builder = builder.user_agent(agent.clone());
        }
        Ok(Self {
            client: builder.build()?,
            tiles_fetched: AtomicUsize::new(0),
            bytes_fetched: AtomicU64::new(0),
        })
    }

    /// Get download statistics for this session.
    pub fn stats(&self) -> FetchStats {
        FetchStats {
            tiles_fetched: self.tiles_fetched.load(Ordering::Relaxed),
            bytes_fetched: self.bytes_fetched.load(Ordering::Relaxed),
        }
    }

    fn download(&self, url: &str, part: &Path) -> Result<u64> {
        let failed = |reason: String| TileError::NetworkFetch {
            locator: url.to_string(),
            reason,
        };

        let mut response = self.client.get(url).send().map_err(|e| failed(e.to_string()))?;
        if !response.status().is_success() {
            return Err(failed(format!("HTTP {}", response.status())));
        }

        let mut file = fs::File::create(part)?;
        let bytes = response.copy_to(&mut file).map_err(|e| failed(e.to_string()))?;
        file.sync_all()?;
        Ok(bytes)
    }

    fn copy(&self, locator: &str, source: &Path, part: &Path) -> Result<u64> {
        fs::copy(source, part).map_err(|e| TileError::NetworkFetch {
            locator: locator.to_string(),
            reason: e.to_string(),
        })
    }
}

/// Whether `source` and `dest` name the same existing file.
fn same_file(source: &Path, dest: &Path) -> bool {
    match (fs::canonicalize(source), fs::canonicalize(dest)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

impl TileFetcher for HttpFetcher {
    fn fetch(&self, locator: &str, dest: &Path) -> Result<Fetched> {
        let source = Source::parse(locator)?;
        if let Source::File(path) = &source {
            if same_file(path, dest) {
                let bytes = fs::metadata(dest)?.len();
                debug!("{} is already in place", dest.display());
                return Ok(Fetched::InPlace(bytes));
            }
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut part_name = dest.file_name().unwrap_or_default().to_os_string();
        part_name.push(".part");
        let part = dest.with_file_name(part_name);

        let result = match source {
            Source::Http(url) => self.download(url, &part),
            Source::File(path) => self.copy(locator, &path, &part),
        };

        let bytes = match result {
            Ok(bytes) => bytes,
            Err(e) => {
                if let Err(cleanup) = crate::store::remove_if_present(&part) {
                    warn!("Could not remove partial download {}: {}", part.display(), cleanup);
                }
                return Err(e);
            }
        };

        fs::rename(&part, dest)?;
        self.tiles_fetched.fetch_add(1, Ordering::Relaxed);
        self.bytes_fetched.fetch_add(bytes, Ordering::Relaxed);
        debug!("Fetched {} ({} bytes) -> {}", locator, bytes, dest.display());
        Ok(Fetched::Written(bytes))
    }
}
