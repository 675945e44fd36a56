//! Tests against real child processes.

#![cfg(unix)]

mod common;

use common::{fake_tools, write_script};
use lidarpipe_runner::{
    CancellationToken, CollectingObserver, OutputStream, ProcessRunner, Profile, TileJob,
    TilePipeline, TileStatus, ToolCommand, ToolRunner,
};
use lidarpipe_tiles::{ArtifactStore, DirectoryLayout, FetchConfig, HttpFetcher};
use std::fs;
use std::sync::Arc;

fn sh(script: &str) -> ToolCommand {
    ToolCommand::new("sh").arg("-c").arg(script)
}

#[test]
fn test_streams_both_pipes_and_reports_exit_code() {
    let observer = CollectingObserver::default();
    let output = ProcessRunner::new()
        .run(&sh("echo out; echo err >&2; exit 3"), &observer)
        .unwrap();

    assert_eq!(output.exit_code, Some(3));
    assert!(!output.success());
    assert_eq!(output.lines, observer.lines());

    let stdout: Vec<_> = output
        .lines
        .iter()
        .filter(|l| l.stream == OutputStream::Stdout)
        .map(|l| l.text.as_str())
        .collect();
    let stderr: Vec<_> = output
        .lines
        .iter()
        .filter(|l| l.stream == OutputStream::Stderr)
        .map(|l| l.text.as_str())
        .collect();
    assert_eq!(stdout, ["out"]);
    assert_eq!(stderr, ["err"]);
}

#[test]
fn test_heavy_output_on_both_pipes_does_not_stall() {
    let script = "i=0; while [ $i -lt 5000 ]; do echo \"line $i\"; echo \"warn $i\" >&2; i=$((i+1)); done";
    let observer = CollectingObserver::default();
    let output = ProcessRunner::new().run(&sh(script), &observer).unwrap();

    assert!(output.success());
    assert_eq!(output.lines.len(), 10_000);
    let last_stdout = output
        .lines
        .iter()
        .rev()
        .find(|l| l.stream == OutputStream::Stdout)
        .unwrap();
    assert_eq!(last_stdout.text, "line 4999");
}

#[test]
fn test_partial_last_line_is_kept() {
    let observer = CollectingObserver::default();
    let output = ProcessRunner::new().run(&sh("printf 'no newline'"), &observer).unwrap();
    assert_eq!(output.lines.len(), 1);
    assert_eq!(output.lines[0].text, "no newline");
}

#[test]
fn test_full_pipeline_with_child_processes() {
    let tmp = tempfile::tempdir().unwrap();
    let bin = tmp.path().join("bin");
    fs::create_dir_all(&bin).unwrap();
    let source = tmp.path().join("swisssurface3d_2019_2600-1200_2056_5728.las.zip");
    fs::write(&source, "points").unwrap();

    let store = ArtifactStore::open(&DirectoryLayout::under(tmp.path().join("work"))).unwrap();
    let fetcher = HttpFetcher::new(&FetchConfig::default()).unwrap();
    let pipeline = TilePipeline::new(
        Profile::Surface3d,
        store,
        Arc::new(ProcessRunner::new()),
        Arc::new(fetcher),
    )
    .with_tool_settings(fake_tools(&bin));

    let job = TileJob::new(0, source.display().to_string());
    let outcome = pipeline.execute(&job, &CancellationToken::new());

    let TileStatus::Completed { products } = outcome.status else {
        panic!("expected completion, got {:?}", outcome.status);
    };
    assert_eq!(products.len(), 6);
    let work = tmp.path().join("work");
    assert_eq!(fs::read_to_string(work.join("dsm_shaded_relief/2600_1200.tif")).unwrap(), "shaded\n");
    assert_eq!(fs::read_to_string(work.join("ndsm_vegetation/2600_1200.tif")).unwrap(), "pdal\n");
    assert!(!work.join("las/2600_1200.las").exists());
    assert!(source.exists(), "a local source is copied, never moved");
}

#[test]
fn test_failing_child_process_fails_the_tile() {
    let tmp = tempfile::tempdir().unwrap();
    let bin = tmp.path().join("bin");
    fs::create_dir_all(&bin).unwrap();
    let source = tmp.path().join("swisssurface3d_2019_2600-1200_2056_5728.las.zip");
    fs::write(&source, "points").unwrap();

    let mut tools = fake_tools(&bin);
    tools.fillnodata = write_script(&bin, "broken", "echo 'ERROR 4: cannot open' >&2\nexit 1");

    let store = ArtifactStore::open(&DirectoryLayout::under(tmp.path().join("work"))).unwrap();
    let pipeline = TilePipeline::new(
        Profile::Surface3d,
        store,
        Arc::new(ProcessRunner::new()),
        Arc::new(HttpFetcher::new(&FetchConfig::default()).unwrap()),
    )
    .with_tool_settings(tools);

    let outcome = pipeline.execute(&TileJob::new(0, source.display().to_string()), &CancellationToken::new());

    assert!(matches!(
        outcome.status,
        TileStatus::Failed {
            stage: Some(lidarpipe_runner::Stage::FillDsm),
            ..
        }
    ));
    assert!(tmp.path().join("work/dsm/orig_2600_1200.tif").exists());
}
