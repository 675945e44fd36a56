//! Per-tile pipeline execution.
//!
//! [`TilePipeline::execute`] takes one manifest entry through every stage of
//! the profile, strictly in order, and abandons the tile at the first stage
//! that fails. Each tool stage must leave its predicted output file behind;
//! any stale file at that path is removed first so a leftover from an earlier
//! run can never pass as fresh output.

use crate::error::{PipelineError, PipelineResult};
use crate::metrics::metric_defs;
use crate::runner::TileJob;
use crate::stage::{self, Profile, Stage, ToolsConfig};
use crate::tool::{OutputStream, ToolCommand, ToolRunner, TracingObserver};
use lidarpipe_tiles::{
    remove_if_present, ArtifactDir, ArtifactKind, ArtifactRef, ArtifactStore, Fetched,
    NamingPolicy, TileDescriptor, TileFetcher, TileIdentity,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, info_span, warn};

/// Stderr lines repeated at warn level when a tool fails.
const FAILURE_CONTEXT_LINES: usize = 5;

/// When intermediate artifacts are deleted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum CleanupPolicy {
    /// Only after every stage of the tile succeeded; failed and cancelled
    /// tiles keep theirs for diagnosis.
    #[default]
    OnSuccess,
    /// Whenever the tile finishes, whatever the outcome.
    Always,
    /// Never.
    Never,
}

impl CleanupPolicy {
    fn applies(&self, completed: bool) -> bool {
        match self {
            CleanupPolicy::OnSuccess => completed,
            CleanupPolicy::Always => true,
            CleanupPolicy::Never => false,
        }
    }
}

/// Cooperative stop signal shared by every worker.
///
/// Cancellation is observed between stages: a running tool is never killed,
/// but no further stage and no queued tile starts once it is set.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// How a tile ended.
#[derive(Debug)]
pub enum TileStatus {
    /// Every stage succeeded.
    Completed {
        /// Retained artifacts, in stage order.
        products: Vec<ArtifactRef>,
    },
    /// A stage failed; later stages never ran.
    Failed {
        /// Failed stage; `None` when the tile could not be identified.
        stage: Option<Stage>,
        error: PipelineError,
    },
    /// Cancellation was observed before `next_stage` started.
    Cancelled {
        next_stage: Stage,
    },
}

/// Result of one manifest entry.
#[derive(Debug)]
pub struct TileOutcome {
    /// Position in the deduplicated manifest.
    pub index: usize,
    /// Locator as listed.
    pub locator: String,
    /// Tile identity, if it could be derived.
    pub identity: Option<TileIdentity>,
    pub status: TileStatus,
    /// Wall time spent on the tile.
    pub elapsed: Duration,
}

impl TileOutcome {
    pub(crate) fn new(job: &TileJob, identity: Option<TileIdentity>, status: TileStatus, elapsed: Duration) -> Self {
        Self {
            index: job.index,
            locator: job.locator.clone(),
            identity,
            status,
            elapsed,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.status, TileStatus::Completed { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, TileStatus::Failed { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.status, TileStatus::Cancelled { .. })
    }
}

/// Runs the stages of a profile for single tiles.
///
/// One pipeline is shared by all workers; it holds no per-tile state.
pub struct TilePipeline {
    profile: Profile,
    store: ArtifactStore,
    naming: NamingPolicy,
    settings: ToolsConfig,
    cleanup: CleanupPolicy,
    tools: Arc<dyn ToolRunner>,
    fetcher: Arc<dyn TileFetcher>,
}

impl std::fmt::Debug for TilePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TilePipeline")
            .field("profile", &self.profile)
            .field("naming", &self.naming)
            .field("cleanup", &self.cleanup)
            .finish_non_exhaustive()
    }
}

impl TilePipeline {
    /// Create a pipeline with the profile's default naming, default tool
    /// settings and the `OnSuccess` cleanup policy.
    pub fn new(
        profile: Profile,
        store: ArtifactStore,
        tools: Arc<dyn ToolRunner>,
        fetcher: Arc<dyn TileFetcher>,
    ) -> Self {
        Self {
            profile,
            store,
            naming: profile.default_naming(),
            settings: ToolsConfig::default(),
            cleanup: CleanupPolicy::default(),
            tools,
            fetcher,
        }
    }

    pub fn with_naming(mut self, naming: NamingPolicy) -> Self {
        self.naming = naming;
        self
    }

    pub fn with_tool_settings(mut self, settings: ToolsConfig) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_cleanup(mut self, cleanup: CleanupPolicy) -> Self {
        self.cleanup = cleanup;
        self
    }

    pub fn profile(&self) -> Profile {
        self.profile
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Run every stage for one tile.
    ///
    /// Never returns an error: failures are captured in the outcome so the
    /// caller can carry on with other tiles.
    pub fn execute(&self, job: &TileJob, cancel: &CancellationToken) -> TileOutcome {
        let started = Instant::now();
        let span = info_span!("tile", id = tracing::field::Empty, line = job.line);
        let _enter = span.enter();

        let tile = match self.naming.describe(&job.locator) {
            Ok(tile) => tile,
            Err(e) => {
                error!("Cannot identify tile '{}': {}", job.locator, e);
                let status = TileStatus::Failed {
                    stage: None,
                    error: e.into(),
                };
                return TileOutcome::new(job, None, status, started.elapsed());
            }
        };
        span.record("id", tile.identity.as_str());
        debug!("Bounds {}", tile.bounds);

        let mut produced = Vec::new();
        let mut status = None;
        for &stage in self.profile.stages() {
            if cancel.is_cancelled() {
                info!("Cancelled before {}", stage);
                status = Some(TileStatus::Cancelled { next_stage: stage });
                break;
            }

            let stage_started = Instant::now();
            let result = self.run_stage(stage, &tile);
            metrics::histogram!(metric_defs::STAGE_DURATION.name, "stage" => stage.name())
                .record(stage_started.elapsed().as_secs_f64());

            match result {
                Ok(artifact) => produced.extend(artifact),
                Err(e) => {
                    error!("{}", e);
                    status = Some(TileStatus::Failed {
                        stage: Some(stage),
                        error: e,
                    });
                    break;
                }
            }
        }

        let completed = status.is_none();
        if self.cleanup.applies(completed) {
            self.remove_intermediates(&mut produced);
        } else if !completed {
            debug!("Keeping {} artifacts for inspection", produced.len());
        }

        let status = status.unwrap_or_else(|| {
            let intermediates = self.profile.intermediates();
            produced.retain(|a| !intermediates.contains(&a.kind));
            info!("Completed in {:.1}s", started.elapsed().as_secs_f64());
            TileStatus::Completed { products: produced }
        });
        TileOutcome::new(job, Some(tile.identity), status, started.elapsed())
    }

    /// Run one stage and return the artifact it wrote, or `None` when the
    /// output already existed and is not the tile's to delete.
    fn run_stage(&self, stage: Stage, tile: &TileDescriptor) -> PipelineResult<Option<ArtifactRef>> {
        let output = self.store.artifact(stage.output(), stage.name(), tile);
        match stage {
            Stage::Fetch => self.fetch(tile, output),
            _ => self.run_tool(stage, tile, output).map(Some),
        }
    }

    /// Nothing is removed up front: the locator may name the destination.
    fn fetch(&self, tile: &TileDescriptor, output: ArtifactRef) -> PipelineResult<Option<ArtifactRef>> {
        let fetched = self.fetcher.fetch(&tile.locator, &output.path)?;
        match fetched {
            Fetched::Written(bytes) => {
                metrics::counter!(metric_defs::FETCHED_BYTES.name).increment(bytes);
                info!("{}: {} bytes from {}", Stage::Fetch, bytes, tile.locator);
                Ok(Some(output))
            }
            Fetched::InPlace(bytes) => {
                info!("{}: using {} in place ({} bytes)", Stage::Fetch, output.path.display(), bytes);
                Ok(None)
            }
        }
    }

    fn run_tool(&self, stage: Stage, tile: &TileDescriptor, output: ArtifactRef) -> PipelineResult<ArtifactRef> {
        if remove_if_present(&output.path)? {
            debug!("Removed stale {}", output.path.display());
        }

        let command = self.command_for(stage, tile, &output)?;
        info!("{}: {}", stage, command);
        let result = self.tools.run(&command, &TracingObserver { stage: stage.name() })?;

        if !result.success() {
            let stderr: Vec<_> = result
                .lines
                .iter()
                .filter(|l| l.stream == OutputStream::Stderr)
                .collect();
            for line in &stderr[stderr.len().saturating_sub(FAILURE_CONTEXT_LINES)..] {
                warn!("{}: {}", stage, line.text);
            }
            match remove_if_present(&output.path) {
                Ok(true) => debug!("Removed partial {}", output.path.display()),
                Ok(false) => {}
                Err(e) => warn!("Could not remove partial {}: {}", output.path.display(), e),
            }
            return Err(PipelineError::NonZeroExit {
                stage: stage.name(),
                tile: tile.identity.clone(),
                command: command.to_string(),
                code: result.exit_code,
            });
        }

        if !output.path.is_file() {
            return Err(PipelineError::MissingOutput {
                stage: stage.name(),
                path: output.path,
            });
        }
        Ok(output)
    }

    /// External command for a tool stage.
    fn command_for(&self, stage: Stage, tile: &TileDescriptor, output: &ArtifactRef) -> PipelineResult<ToolCommand> {
        let unsupported = || PipelineError::NoCommand { stage: stage.name() };
        let input = self.store.resolve_path(stage.input().ok_or_else(unsupported)?, tile);
        let out = output.path.as_path();
        let tools = &self.settings;
        let pipeline_file = || tools.pipeline_file(stage).ok_or_else(unsupported);

        let command = match stage {
            Stage::Fetch => return Err(unsupported()),
            Stage::Extract => stage::extract_command(
                tools,
                &input,
                &ArtifactKind::PointCloud.file_name(&tile.identity),
                self.store.directory(ArtifactDir::Extracted),
            ),
            Stage::Convert => stage::convert_command(tools, &pipeline_file()?, &input, out),
            Stage::RasterizeDsm
            | Stage::RasterizeDtm
            | Stage::RasterizeBuildings
            | Stage::RasterizeVegetation => {
                stage::rasterize_command(tools, &pipeline_file()?, &input, out, &tile.bounds)
            }
            Stage::FillDsm => stage::fill_command(tools, tools.dsm_fill, &input, out),
            Stage::FillDtm => stage::fill_command(tools, tools.dtm_fill, &input, out),
            Stage::ShadeDsm => stage::hillshade_command(tools, tools.dsm_hillshade, &input, out),
            Stage::ShadeDtm => stage::hillshade_command(tools, tools.dtm_hillshade, &input, out),
            Stage::ShadeRaster => stage::hillshade_command(tools, tools.raster_hillshade, &input, out),
        };
        Ok(command)
    }

    /// Delete the profile's intermediates among `produced`.
    ///
    /// Deletion errors are logged; they never fail the tile.
    fn remove_intermediates(&self, produced: &mut Vec<ArtifactRef>) {
        let intermediates = self.profile.intermediates();
        produced.retain(|artifact| {
            if !intermediates.contains(&artifact.kind) {
                return true;
            }
            match self.store.delete(artifact) {
                Ok(true) => {
                    metrics::counter!(metric_defs::ARTIFACTS_DELETED.name).increment(1);
                    debug!("Deleted {} {}", artifact.kind, artifact.path.display());
                    false
                }
                Ok(false) => false,
                Err(e) => {
                    warn!("Could not delete {}: {}", artifact.path.display(), e);
                    true
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::ProcessRunner;
    use lidarpipe_tiles::{DirectoryLayout, FetchConfig, HttpFetcher};

    #[test]
    fn test_every_tool_stage_has_a_command() {
        let tmp = tempfile::tempdir().unwrap();
        let pipeline = TilePipeline::new(
            Profile::Surface3d,
            ArtifactStore::open(&DirectoryLayout::under(tmp.path())).unwrap(),
            Arc::new(ProcessRunner::new()),
            Arc::new(HttpFetcher::new(&FetchConfig::default()).unwrap()),
        );
        let tile = pipeline
            .naming
            .describe("https://host/swisssurface3d_2019_2600-1200_2056_5728.las.zip")
            .unwrap();

        for profile in [Profile::Surface3d, Profile::Raster] {
            for &stage in profile.stages() {
                let output = pipeline.store.artifact(stage.output(), stage.name(), &tile);
                match (stage, pipeline.command_for(stage, &tile, &output)) {
                    (Stage::Fetch, Err(PipelineError::NoCommand { stage })) => assert_eq!(stage, "fetch"),
                    (Stage::Fetch, other) => panic!("fetch has no command, got {other:?}"),
                    (_, Ok(command)) => assert!(!command.program.is_empty(), "{stage}"),
                    (_, Err(e)) => panic!("{stage}: {e}"),
                }
            }
        }
    }
}
