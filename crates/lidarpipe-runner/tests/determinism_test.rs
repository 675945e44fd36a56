//! Determinism tests for the worker pool.
//!
//! The set of artifacts a run leaves behind, and the order of its report, must
//! not depend on how many workers ran or in which order tiles finished.

mod common;

use common::{archive_name, Behavior, Fixture, ScriptedRunner};
use lidarpipe_runner::{plan, CancellationToken, PipelineRunner, Profile, RunReport};
use lidarpipe_tiles::{NamingPolicy, TileManifest};
use std::sync::Arc;

/// Cells of a 6 x 5 block of tiles.
fn cells() -> Vec<String> {
    (0..30)
        .map(|i| format!("{}-{}", 2600 + i % 6, 1200 + i / 6))
        .collect()
}

/// Run the whole block with `workers` threads; every seventh tile fails.
fn run_block(workers: usize) -> (Fixture, RunReport) {
    let fixture = Fixture::new();
    let mut runner = ScriptedRunner::new();
    for (i, cell) in cells().iter().enumerate() {
        if i % 7 == 3 {
            let identity = cell.replace('-', "_");
            runner = runner.when(&format!("dtm/orig_{}.tif", identity), Behavior::Fail(1));
        }
    }

    let manifest = TileManifest::from_locators(cells().iter().map(|c| fixture.publish(&archive_name(c))));
    let jobs = plan(&manifest, &NamingPolicy::surface3d()).unwrap();
    let pipeline = fixture.pipeline(Profile::Surface3d, Arc::new(runner));
    let report = PipelineRunner::new(workers).run(&pipeline, jobs, &CancellationToken::new());
    (fixture, report)
}

fn summary(report: &RunReport) -> Vec<(usize, String, bool)> {
    report
        .outcomes
        .iter()
        .map(|o| {
            let identity = o.identity.as_ref().map(|i| i.to_string()).unwrap_or_default();
            (o.index, identity, o.is_completed())
        })
        .collect()
}

#[test]
fn test_pool_size_does_not_change_artifacts() {
    let (serial_fixture, serial) = run_block(1);
    let (parallel_fixture, parallel) = run_block(24);

    assert_eq!(serial.total(), 30);
    assert_eq!(serial.failed(), 4);
    assert_eq!(summary(&serial), summary(&parallel));

    let serial_files = serial_fixture.snapshot();
    assert!(!serial_files.is_empty());
    assert_eq!(serial_files, parallel_fixture.snapshot());
}

#[test]
fn test_report_follows_manifest_order() {
    let (_fixture, report) = run_block(8);
    let expected: Vec<String> = cells().iter().map(|c| c.replace('-', "_")).collect();
    let actual: Vec<String> = report
        .outcomes
        .iter()
        .map(|o| o.identity.as_ref().unwrap().to_string())
        .collect();
    assert_eq!(actual, expected);
}

#[test]
fn test_repeated_runs_are_identical() {
    let snapshots: Vec<_> = (0..3).map(|_| run_block(6).0.snapshot()).collect();
    assert_eq!(snapshots[0], snapshots[1]);
    assert_eq!(snapshots[1], snapshots[2]);
}
