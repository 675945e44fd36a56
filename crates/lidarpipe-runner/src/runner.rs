//! Bounded worker pool over manifest entries.
//!
//! ## Scheduling
//!
//! [`plan`] turns the manifest into an ordered job list. [`PipelineRunner`]
//! queues every job on a channel in manifest order and starts `concurrency`
//! named worker threads, each pulling the next job as soon as it finishes its
//! current tile. Tiles are independent: one failing, panicking or being
//! cancelled never affects the others. The run returns once every job has an
//! outcome, and the report lists outcomes in manifest order regardless of
//! completion order.

use crate::error::{PipelineError, RunError};
use crate::metrics::metric_defs;
use crate::pipeline::{CancellationToken, TileOutcome, TilePipeline, TileStatus};
use crate::stage::Stage;
use crossbeam_channel::{Receiver, Sender};
use lidarpipe_tiles::{NamingPolicy, TileIdentity, TileManifest};
use std::collections::{HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// One tile to process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileJob {
    /// Position in the job list.
    pub index: usize,
    /// 1-based manifest line.
    pub line: usize,
    /// Locator as listed.
    pub locator: String,
}

impl TileJob {
    /// Job for a locator outside of any manifest.
    pub fn new<S: Into<String>>(index: usize, locator: S) -> Self {
        Self {
            index,
            line: index + 1,
            locator: locator.into(),
        }
    }
}

/// Build the job list for a manifest.
///
/// A locator listed twice is processed once. Two different locators that
/// derive the same identity would write the same artifact paths, so that
/// aborts the run. Locators whose identity cannot be derived are still
/// scheduled; they fail individually when their tile starts.
pub fn plan(manifest: &TileManifest, naming: &NamingPolicy) -> Result<Vec<TileJob>, RunError> {
    let mut locators = HashSet::new();
    let mut identities: HashMap<TileIdentity, &str> = HashMap::new();
    let mut jobs = Vec::with_capacity(manifest.len());

    for entry in manifest.entries() {
        if !locators.insert(entry.locator.as_str()) {
            warn!("Line {}: skipping duplicate locator {}", entry.line, entry.locator);
            continue;
        }

        match naming.derive_identity(&entry.locator) {
            Ok(identity) => {
                if let Some(first) = identities.get(&identity) {
                    return Err(RunError::DuplicateIdentity {
                        identity,
                        first: first.to_string(),
                        second: entry.locator.clone(),
                    });
                }
                identities.insert(identity, entry.locator.as_str());
            }
            Err(e) => warn!("Line {}: {}", entry.line, e),
        }

        jobs.push(TileJob {
            index: jobs.len(),
            line: entry.line,
            locator: entry.locator.clone(),
        });
    }

    debug!("Planned {} tiles from {} manifest entries", jobs.len(), manifest.len());
    Ok(jobs)
}

/// Outcomes of a run, in manifest order.
#[derive(Debug)]
pub struct RunReport {
    /// One outcome per job.
    pub outcomes: Vec<TileOutcome>,
    /// Wall time of the whole run.
    pub elapsed: Duration,
}

impl RunReport {
    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    pub fn completed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_completed()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_failed()).count()
    }

    pub fn cancelled(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_cancelled()).count()
    }

    /// Process exit code: 0 when every tile completed, 1 otherwise.
    pub fn exit_code(&self) -> u8 {
        if self.completed() == self.total() {
            0
        } else {
            1
        }
    }

    /// Log a one-line summary plus one line per unsuccessful tile.
    pub fn log_summary(&self) {
        info!(
            "{} tiles in {:.1}s: {} completed, {} failed, {} cancelled",
            self.total(),
            self.elapsed.as_secs_f64(),
            self.completed(),
            self.failed(),
            self.cancelled()
        );
        for outcome in &self.outcomes {
            let name = outcome
                .identity
                .as_ref()
                .map_or(outcome.locator.as_str(), TileIdentity::as_str);
            match &outcome.status {
                TileStatus::Completed { .. } => {}
                TileStatus::Failed { stage, error } => {
                    let stage = stage.map_or("identify", |s| s.name());
                    warn!("  {} failed at {}: {}", name, stage, error);
                }
                TileStatus::Cancelled { next_stage } => {
                    warn!("  {} cancelled before {}", name, next_stage);
                }
            }
        }
    }
}

/// Runs tile pipelines on a bounded pool of worker threads.
#[derive(Debug, Clone, Copy)]
pub struct PipelineRunner {
    concurrency: usize,
}

impl PipelineRunner {
    /// Create a runner; a concurrency of 0 is treated as 1.
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Process every job and wait for all of them.
    pub fn run(&self, pipeline: &TilePipeline, jobs: Vec<TileJob>, cancel: &CancellationToken) -> RunReport {
        let started = Instant::now();
        let total = jobs.len();
        let workers = self.concurrency.min(total).max(1);
        info!("Processing {} tiles with {} workers", total, workers);

        let (job_tx, job_rx) = crossbeam_channel::unbounded();
        for job in jobs {
            // The receiver outlives this loop
            let _ = job_tx.send(job);
        }
        drop(job_tx);

        let (outcome_tx, outcome_rx) = crossbeam_channel::unbounded();
        thread::scope(|s| {
            let mut spawned = 0;
            for n in 0..workers {
                let job_rx = job_rx.clone();
                let outcome_tx = outcome_tx.clone();
                let spawn = thread::Builder::new()
                    .name(format!("tile-worker-{}", n))
                    .spawn_scoped(s, move || worker_loop(pipeline, job_rx, outcome_tx, cancel));
                match spawn {
                    Ok(_) => spawned += 1,
                    Err(e) => warn!("Could not start worker {}: {}", n, e),
                }
            }
            if spawned == 0 {
                warn!("No worker threads available, processing on the calling thread");
                worker_loop(pipeline, job_rx.clone(), outcome_tx.clone(), cancel);
            }
        });
        drop(outcome_tx);

        let mut outcomes: Vec<TileOutcome> = outcome_rx.iter().collect();
        outcomes.sort_by_key(|o| o.index);
        RunReport {
            outcomes,
            elapsed: started.elapsed(),
        }
    }
}

fn worker_loop(
    pipeline: &TilePipeline,
    jobs: Receiver<TileJob>,
    outcomes: Sender<TileOutcome>,
    cancel: &CancellationToken,
) {
    for job in jobs {
        let outcome = if cancel.is_cancelled() {
            let next_stage = pipeline.profile().stages().first().copied().unwrap_or(Stage::Fetch);
            TileOutcome::new(&job, None, TileStatus::Cancelled { next_stage }, Duration::ZERO)
        } else {
            run_guarded(pipeline, &job, cancel)
        };
        record_outcome(&outcome);
        if outcomes.send(outcome).is_err() {
            break;
        }
    }
}

/// Execute one tile, turning a panic into a failed outcome.
fn run_guarded(pipeline: &TilePipeline, job: &TileJob, cancel: &CancellationToken) -> TileOutcome {
    let started = Instant::now();
    metrics::gauge!(metric_defs::ACTIVE_WORKERS.name).increment(1.0);
    let result = panic::catch_unwind(AssertUnwindSafe(|| pipeline.execute(job, cancel)));
    metrics::gauge!(metric_defs::ACTIVE_WORKERS.name).decrement(1.0);

    result.unwrap_or_else(|payload| {
        let message = panic_message(payload.as_ref());
        error!("Tile '{}' panicked: {}", job.locator, message);
        let status = TileStatus::Failed {
            stage: None,
            error: PipelineError::Panicked(message),
        };
        TileOutcome::new(job, None, status, started.elapsed())
    })
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn record_outcome(outcome: &TileOutcome) {
    match &outcome.status {
        TileStatus::Completed { .. } => {
            metrics::counter!(metric_defs::TILES_COMPLETED.name).increment(1);
        }
        TileStatus::Failed { stage, .. } => {
            let stage = stage.map_or("identify", |s| s.name());
            metrics::counter!(metric_defs::TILES_FAILED.name, "stage" => stage).increment(1);
        }
        TileStatus::Cancelled { .. } => {
            metrics::counter!(metric_defs::TILES_CANCELLED.name).increment(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(lines: &[&str]) -> TileManifest {
        TileManifest::parse(&lines.join("\n"))
    }

    const A: &str = "https://host/swisssurface3d_2019_2600-1200_2056_5728.las.zip";
    const B: &str = "https://host/swisssurface3d_2019_2601-1200_2056_5728.las.zip";

    #[test]
    fn test_plan_keeps_manifest_order() {
        let jobs = plan(&manifest(&[B, A]), &NamingPolicy::surface3d()).unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].locator, B);
        assert_eq!(jobs[1].locator, A);
        assert_eq!(jobs[1].index, 1);
    }

    #[test]
    fn test_plan_drops_exact_duplicates() {
        let jobs = plan(&manifest(&[A, B, A]), &NamingPolicy::surface3d()).unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[1].line, 2);
    }

    #[test]
    fn test_plan_rejects_conflicting_identity() {
        let mirror = "/mirror/swisssurface3d_2019_2600-1200_2056_5728.las.zip";
        let err = plan(&manifest(&[A, mirror]), &NamingPolicy::surface3d()).unwrap_err();
        match err {
            RunError::DuplicateIdentity { identity, first, second } => {
                assert_eq!(identity.as_str(), "2600_1200");
                assert_eq!(first, A);
                assert_eq!(second, mirror);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_plan_schedules_malformed_locators() {
        let jobs = plan(&manifest(&[A, "https://host/short.zip"]), &NamingPolicy::surface3d()).unwrap();
        assert_eq!(jobs.len(), 2);
    }

    #[test]
    fn test_runner_concurrency_floor() {
        assert_eq!(PipelineRunner::new(0).concurrency(), 1);
        assert_eq!(PipelineRunner::new(24).concurrency(), 24);
    }

    #[test]
    fn test_panic_message() {
        let payload = panic::catch_unwind(|| panic!("boom {}", 7)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "boom 7");
        let payload = panic::catch_unwind(|| panic!("static")).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "static");
    }
}
