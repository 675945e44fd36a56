//! # lidarpipe-runner
//!
//! Batch processing of survey tiles into terrain products.
//!
//! Each tile goes through a fixed sequence of stages, every one of which is an
//! external program (`unzip`, `pdal`, `gdal_fillnodata.py`, `gdaldem`) run to
//! completion:
//!
//! ```text
//! fetch -> extract -> convert -> rasterize-dsm -> fill-dsm -> shade-dsm
//!       -> rasterize-dtm -> fill-dtm -> shade-dtm
//!       -> rasterize-buildings -> rasterize-vegetation -> cleanup
//! ```
//!
//! Tiles run in parallel on a bounded pool of worker threads; the stages of a
//! single tile always run in order. A failing tile is abandoned at the failing
//! stage and reported, and the rest of the batch carries on.
//!
//! ## Modules
//!
//! - [`tool`]: running external programs and streaming their output
//! - [`stage`]: stage list per [`Profile`] and the command templates
//! - [`pipeline`]: one tile through every stage, with cleanup
//! - [`runner`]: planning and the worker pool
//! - [`config`]: YAML run configuration
//! - [`metrics`]: metric declarations
//! - [`metrics_export`]: in-memory recorder and JSON summary
//!
//! ## Example
//!
//! ```no_run
//! use lidarpipe_runner::{
//!     plan, CancellationToken, PipelineRunner, ProcessRunner, RunnerConfig, TilePipeline,
//! };
//! use lidarpipe_tiles::{ArtifactStore, HttpFetcher, TileManifest};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RunnerConfig::load("lidarpipe.yaml")?;
//! config.validate()?;
//!
//! let manifest = TileManifest::load(&config.manifest)?;
//! let jobs = plan(&manifest, &config.resolved_naming())?;
//!
//! let pipeline = TilePipeline::new(
//!     config.profile,
//!     ArtifactStore::open(&config.layout)?,
//!     Arc::new(ProcessRunner::new()),
//!     Arc::new(HttpFetcher::new(&config.fetch)?),
//! )
//! .with_naming(config.resolved_naming())
//! .with_tool_settings(config.tools.clone())
//! .with_cleanup(config.cleanup);
//!
//! let report = PipelineRunner::new(config.concurrency).run(&pipeline, jobs, &CancellationToken::new());
//! std::process::exit(i32::from(report.exit_code()));
//! # }
//! ```

pub mod config;
pub mod error;
pub mod metrics;
pub mod metrics_export;
pub mod pipeline;
pub mod runner;
pub mod stage;
pub mod tool;

pub use config::RunnerConfig;
pub use error::{PipelineError, PipelineResult, RunError};
pub use pipeline::{CancellationToken, CleanupPolicy, TileOutcome, TilePipeline, TileStatus};
pub use runner::{plan, PipelineRunner, RunReport, TileJob};
pub use stage::{FillParams, HillshadeParams, Profile, Stage, ToolsConfig};
pub use tool::{
    CollectingObserver, NullObserver, OutputLine, OutputObserver, OutputStream, ProcessRunner,
    ToolCommand, ToolOutput, ToolRunner, TracingObserver,
};
