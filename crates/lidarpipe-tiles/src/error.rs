//! Error types for the tiles crate.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while reading manifests, naming tiles, laying out
/// artifacts or fetching tiles.
#[derive(Debug, Error)]
pub enum TileError {
    /// The manifest file could not be read.
    #[error("Cannot read manifest {path}: {source}")]
    ManifestRead {
        /// Manifest path as given.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The locator's filename does not follow the naming convention.
    #[error("Malformed tile location '{locator}': {reason}")]
    MalformedLocation {
        /// The locator as it appeared in the manifest.
        locator: String,
        /// Why the filename was rejected.
        reason: String,
    },

    /// The identity's numeric prefixes are not integers.
    #[error("Invalid tile identity '{0}'")]
    InvalidIdentity(String),

    /// An artifact directory could not be created.
    #[error("Artifact directory {path} is unavailable: {source}")]
    DirectoryUnavailable {
        /// Directory that could not be created.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Download failed for a reason other than transport.
    #[error("Failed to fetch {locator}: {reason}")]
    NetworkFetch {
        /// The locator being fetched.
        locator: String,
        /// Reason for failure.
        reason: String,
    },

    /// HTTP transport error.
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
