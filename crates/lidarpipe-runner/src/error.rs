//! Error types for the runner.

use lidarpipe_tiles::{TileError, TileIdentity};
use std::path::PathBuf;
use thiserror::Error;

/// Errors that end one tile's pipeline.
///
/// None of these escape the tile: the runner records them in the tile's
/// outcome and carries on with the remaining tiles.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Naming, fetch or artifact error from the tiles crate.
    #[error(transparent)]
    Tile(#[from] TileError),

    /// The external program could not be started at all.
    #[error("Cannot launch '{program}': {source}")]
    ProcessLaunch {
        /// Program name or path.
        program: String,
        /// Underlying spawn error.
        source: std::io::Error,
    },

    /// The external program ran and reported failure.
    #[error("Stage {stage} failed for tile {tile} (exit {}): {command}", display_code(.code))]
    NonZeroExit {
        /// Stage name.
        stage: &'static str,
        /// Tile being processed.
        tile: TileIdentity,
        /// Full command line, for manual reproduction.
        command: String,
        /// Exit code; `None` when killed by a signal.
        code: Option<i32>,
    },

    /// The program exited 0 without writing its output.
    #[error("Stage {stage} exited successfully but did not produce {}", .path.display())]
    MissingOutput {
        /// Stage name.
        stage: &'static str,
        /// Expected output path.
        path: PathBuf,
    },

    /// The stage has no tool command under the current settings.
    #[error("No command for stage {stage}")]
    NoCommand {
        /// Stage name.
        stage: &'static str,
    },

    /// I/O error while talking to a child process.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The tile's pipeline panicked.
    #[error("Pipeline panicked: {0}")]
    Panicked(String),
}

fn display_code(code: &Option<i32>) -> String {
    code.map_or_else(|| "signal".to_string(), |c| c.to_string())
}

/// Errors that stop a run before any tile is scheduled.
#[derive(Debug, Error)]
pub enum RunError {
    /// Manifest unreadable or artifact directories unavailable.
    #[error(transparent)]
    Tile(#[from] TileError),

    /// Two different locators name the same tile.
    #[error("Tile {identity} appears twice: '{first}' and '{second}'")]
    DuplicateIdentity {
        /// The shared identity.
        identity: TileIdentity,
        /// Locator seen first.
        first: String,
        /// Conflicting locator.
        second: String,
    },

    /// Invalid configuration value.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Configuration file could not be read.
    #[error("Cannot read config {path}: {source}")]
    ConfigRead {
        /// Config path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Configuration file is not valid YAML for the config schema.
    #[error("Cannot parse config: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Result type alias for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;
