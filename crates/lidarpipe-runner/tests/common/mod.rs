//! Shared fixtures for runner integration tests.
//!
//! [`ScriptedRunner`] stands in for the external tools: it works out the
//! output path from each command line the same way the real tools would and
//! writes a small text file there, or fails on request.

#![allow(dead_code)]

use lidarpipe_runner::{
    CancellationToken, OutputLine, OutputObserver, OutputStream, PipelineResult, Profile,
    TilePipeline, ToolCommand, ToolOutput, ToolRunner, ToolsConfig,
};
use lidarpipe_tiles::{ArtifactStore, DirectoryLayout, FetchConfig, HttpFetcher};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Archive file name for a `DDDD-DDDD` cell.
pub fn archive_name(cell: &str) -> String {
    format!("swisssurface3d_2019_{}_2056_5728.las.zip", cell)
}

/// Raster tile file name for a `DDDD-DDDD` cell.
pub fn raster_name(cell: &str) -> String {
    format!("swisssurface3d-raster_2019_{}_0.5_2056_5728.tif", cell)
}

/// A local mirror of source tiles plus a work root.
pub struct Fixture {
    pub tmp: tempfile::TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("mirror")).unwrap();
        Self { tmp }
    }

    pub fn work(&self) -> PathBuf {
        self.tmp.path().join("work")
    }

    /// Put a source file in the mirror and return its locator.
    pub fn publish(&self, file_name: &str) -> String {
        let path = self.tmp.path().join("mirror").join(file_name);
        fs::write(&path, format!("source {}", file_name)).unwrap();
        format!("file://{}", path.display())
    }

    pub fn store(&self) -> ArtifactStore {
        ArtifactStore::open(&DirectoryLayout::under(self.work())).unwrap()
    }

    pub fn pipeline(&self, profile: Profile, runner: Arc<ScriptedRunner>) -> TilePipeline {
        let fetcher = HttpFetcher::new(&FetchConfig::default()).unwrap();
        TilePipeline::new(profile, self.store(), runner, Arc::new(fetcher))
    }

    /// Whether `<work>/<relative>` exists.
    pub fn exists(&self, relative: &str) -> bool {
        self.work().join(relative).exists()
    }

    /// Every file below the work root as `(relative path, contents)`, sorted.
    pub fn snapshot(&self) -> Vec<(String, String)> {
        let mut files = Vec::new();
        collect(&self.work(), &self.work(), &mut files);
        files.sort();
        files
    }
}

fn collect(root: &Path, dir: &Path, files: &mut Vec<(String, String)>) {
    for entry in fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
            collect(root, &path, files);
        } else {
            let relative = path.strip_prefix(root).unwrap().display().to_string();
            files.push((relative, fs::read_to_string(&path).unwrap()));
        }
    }
}

/// Write an executable shell script and return its path.
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> String {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path.display().to_string()
}

/// Shell stand-ins for the external tools, honoring the same arguments.
#[cfg(unix)]
pub fn fake_tools(dir: &Path) -> ToolsConfig {
    fs::create_dir_all(dir).unwrap();
    ToolsConfig {
        // -o -j <archive> <member> -d <dir>
        unzip: write_script(dir, "unzip", "cp \"$3\" \"$6/$4\""),
        pdal: write_script(
            dir,
            "pdal",
            "for a in \"$@\"; do case \"$a\" in --writers.*.filename=*) out=\"${a#*=}\";; esac; done\n\
             echo \"writing $out\"\n\
             echo pdal > \"$out\"",
        ),
        fillnodata: write_script(dir, "fillnodata", "for a in \"$@\"; do out=\"$a\"; done\necho filled > \"$out\""),
        gdaldem: write_script(dir, "gdaldem", "echo shaded > \"$3\""),
        ..ToolsConfig::default()
    }
}

/// What the scripted tool does for a matching command.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Write partial output, print to stderr, exit with the code.
    Fail(i32),
    /// Exit 0 without writing output.
    SkipOutput,
    /// Write output, then cancel the token.
    Cancel(CancellationToken),
    Panic,
}

/// Fake external tools.
#[derive(Default)]
pub struct ScriptedRunner {
    rules: Vec<(String, Behavior)>,
    commands: Mutex<Vec<ToolCommand>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `behavior` to commands whose line contains `needle`.
    pub fn when(mut self, needle: &str, behavior: Behavior) -> Self {
        self.rules.push((needle.to_string(), behavior));
        self
    }

    /// Commands run so far.
    pub fn commands(&self) -> Vec<ToolCommand> {
        self.commands.lock().unwrap().clone()
    }

    /// Command lines run so far.
    pub fn command_lines(&self) -> Vec<String> {
        self.commands().iter().map(ToString::to_string).collect()
    }
}

fn flag_value<'a>(command: &'a ToolCommand, flag: &str) -> Option<&'a str> {
    command.args.iter().find_map(|a| a.strip_prefix(flag))
}

/// Input and output paths, derived like the real tools do.
fn io_paths(command: &ToolCommand) -> (PathBuf, PathBuf) {
    let args = &command.args;
    match command.program.as_str() {
        "unzip" => (PathBuf::from(&args[2]), Path::new(&args[5]).join(&args[3])),
        "pdal" => {
            let input = flag_value(command, "--readers.las.filename=").unwrap();
            let output = flag_value(command, "--writers.las.filename=")
                .or_else(|| flag_value(command, "--writers.gdal.filename="))
                .unwrap();
            (PathBuf::from(input), PathBuf::from(output))
        }
        "gdal_fillnodata.py" => (
            PathBuf::from(&args[args.len() - 2]),
            PathBuf::from(&args[args.len() - 1]),
        ),
        "gdaldem" => (PathBuf::from(&args[1]), PathBuf::from(&args[2])),
        other => panic!("unexpected program {other}"),
    }
}

fn file_name(path: &Path) -> String {
    path.file_name().unwrap().to_string_lossy().into_owned()
}

impl ToolRunner for ScriptedRunner {
    fn run(&self, command: &ToolCommand, observer: &dyn OutputObserver) -> PipelineResult<ToolOutput> {
        self.commands.lock().unwrap().push(command.clone());
        let line = command.to_string();
        let behavior = self
            .rules
            .iter()
            .find(|(needle, _)| line.contains(needle.as_str()))
            .map(|(_, b)| b.clone());

        let (input, output) = io_paths(command);
        let mut lines = Vec::new();
        if !input.is_file() {
            let text = format!("{}: cannot open {}", command.program, input.display());
            lines.push(OutputLine {
                stream: OutputStream::Stderr,
                text,
            });
            return Ok(ToolOutput {
                exit_code: Some(2),
                lines,
            });
        }

        let contents = format!("{} <- {}", command.program, file_name(&input));
        let exit_code = match behavior {
            None => {
                fs::write(&output, contents).unwrap();
                0
            }
            Some(Behavior::Fail(code)) => {
                fs::write(&output, "partial").unwrap();
                lines.push(OutputLine {
                    stream: OutputStream::Stderr,
                    text: format!("{} failed", command.program),
                });
                code
            }
            Some(Behavior::SkipOutput) => 0,
            Some(Behavior::Cancel(token)) => {
                fs::write(&output, contents).unwrap();
                token.cancel();
                0
            }
            Some(Behavior::Panic) => panic!("scripted panic in {}", command.program),
        };

        for line in &lines {
            observer.on_line(line);
        }
        Ok(ToolOutput {
            exit_code: Some(exit_code),
            lines,
        })
    }
}
