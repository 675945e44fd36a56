//! Run configuration.
//!
//! Loaded once from an optional YAML file, adjusted by command-line flags,
//! validated, and then passed by reference; nothing changes it mid-run.
//!
//! ```yaml
//! manifest: tiles.csv
//! concurrency: 24
//! profile: surface3d
//! cleanup: on_success
//! layout:
//!   root: /data/work
//!   dsm: /fast/dsm
//! tools:
//!   pipelines_dir: pdal
//!   dtm_fill: { max_distance: 500, smoothing_iterations: 2 }
//! ```

use crate::error::RunError;
use crate::pipeline::CleanupPolicy;
use crate::stage::{Profile, ToolsConfig};
use lidarpipe_tiles::{DirectoryLayout, FetchConfig, NamingPolicy};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Everything a run needs besides the tiles themselves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Manifest file listing one locator per line.
    pub manifest: PathBuf,
    /// Number of tiles processed at once.
    pub concurrency: usize,
    pub profile: Profile,
    pub cleanup: CleanupPolicy,
    /// Artifact directories.
    pub layout: DirectoryLayout,
    /// Identity rule and grid geometry; the profile's convention when unset.
    pub naming: Option<NamingPolicy>,
    pub tools: ToolsConfig,
    pub fetch: FetchConfig,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            manifest: PathBuf::from("tiles.csv"),
            concurrency: default_concurrency(),
            profile: Profile::default(),
            cleanup: CleanupPolicy::default(),
            layout: DirectoryLayout::default(),
            naming: None,
            tools: ToolsConfig::default(),
            fetch: FetchConfig::default(),
        }
    }
}

fn default_concurrency() -> usize {
    std::thread::available_parallelism().map_or(1, |n| n.get())
}

impl RunnerConfig {
    /// Read a YAML config file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, RunError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| RunError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&text)
    }

    /// Parse YAML config text.
    pub fn from_yaml(text: &str) -> Result<Self, RunError> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// The naming policy in effect.
    pub fn resolved_naming(&self) -> NamingPolicy {
        self.naming.unwrap_or_else(|| self.profile.default_naming())
    }

    /// Reject values no run can work with.
    pub fn validate(&self) -> Result<(), RunError> {
        if self.concurrency == 0 {
            return Err(RunError::Config("concurrency must be at least 1".to_string()));
        }
        let naming = self.resolved_naming();
        // Written as negations so NaN is rejected too
        if !(naming.cell_size > 0.0) {
            return Err(RunError::Config(format!(
                "cell_size must be positive, got {}",
                naming.cell_size
            )));
        }
        if !(naming.resolution > 0.0) || naming.resolution >= naming.cell_size {
            return Err(RunError::Config(format!(
                "resolution must be positive and below the cell size, got {}",
                naming.resolution
            )));
        }
        if self.fetch.timeout_secs == 0 {
            return Err(RunError::Config("fetch timeout must be at least 1 second".to_string()));
        }
        Ok(())
    }
}
