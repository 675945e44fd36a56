//! External tool invocation.
//!
//! Every pipeline stage after the download is one external program run to
//! completion. [`ProcessRunner`] starts the program, streams its stdout and
//! stderr line by line to an [`OutputObserver`] while it runs, and returns the
//! exit code as data. Only a failure to start the program is an error here;
//! whether a non-zero exit is fatal is the caller's decision.
//!
//! ## Streaming
//!
//! Each output pipe is drained by its own scoped thread into a channel, and the
//! calling thread forwards lines to the observer as they arrive. Neither pipe
//! can fill up and stall the child, and the observer always runs on the
//! caller's thread (inside the tile's tracing span).

use crate::error::{PipelineError, PipelineResult};
use crossbeam_channel::Sender;
use std::fmt;
use std::io::{BufRead, BufReader, Read};
use std::process::{Command, Stdio};
use std::sync::Mutex;
use std::thread;
use tracing::debug;

/// A program and its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    /// Program name (looked up on `PATH`) or path.
    pub program: String,
    /// Arguments, passed without shell interpretation.
    pub args: Vec<String>,
}

impl ToolCommand {
    /// Create a command with no arguments.
    pub fn new<S: Into<String>>(program: S) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Append one argument.
    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

impl fmt::Display for ToolCommand {
    /// Space-joined command line, as one would type it.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Which pipe a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// One line of tool output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    /// Source pipe.
    pub stream: OutputStream,
    /// Line text without the trailing newline.
    pub text: String,
}

/// Result of a finished tool run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    /// Exit code; `None` if the process was killed by a signal.
    pub exit_code: Option<i32>,
    /// Combined output in arrival order.
    pub lines: Vec<OutputLine>,
}

impl ToolOutput {
    /// True for exit code 0.
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Receives tool output while the tool runs.
pub trait OutputObserver {
    /// Called once per line, in arrival order.
    fn on_line(&self, line: &OutputLine);
}

/// Logs tool output through `tracing`.
#[derive(Debug, Clone, Copy)]
pub struct TracingObserver {
    /// Stage name attached to every line.
    pub stage: &'static str,
}

impl OutputObserver for TracingObserver {
    fn on_line(&self, line: &OutputLine) {
        match line.stream {
            OutputStream::Stdout => debug!(target: "lidarpipe::tool", stage = self.stage, "{}", line.text),
            OutputStream::Stderr => debug!(target: "lidarpipe::tool", stage = self.stage, stream = "stderr", "{}", line.text),
        }
    }
}

/// Discards output.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullObserver;

impl OutputObserver for NullObserver {
    fn on_line(&self, _line: &OutputLine) {}
}

/// Collects output lines; handy for callers that want to inspect them later.
#[derive(Debug, Default)]
pub struct CollectingObserver {
    lines: Mutex<Vec<OutputLine>>,
}

impl CollectingObserver {
    /// Lines seen so far.
    pub fn lines(&self) -> Vec<OutputLine> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }
}

impl OutputObserver for CollectingObserver {
    fn on_line(&self, line: &OutputLine) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(line.clone());
        }
    }
}

/// Runs external commands. Shared by every worker.
pub trait ToolRunner: Send + Sync {
    /// Run a command to completion.
    fn run(&self, command: &ToolCommand, observer: &dyn OutputObserver) -> PipelineResult<ToolOutput>;
}

/// Runs commands as child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    /// Create a process runner.
    pub fn new() -> Self {
        Self
    }
}

/// Forward lines from a pipe to the channel until EOF.
fn pump<R: Read>(reader: R, stream: OutputStream, tx: Sender<OutputLine>) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&buf)
                    .trim_end_matches(['\n', '\r'])
                    .to_string();
                if tx.send(OutputLine { stream, text }).is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!("Stopped reading {:?}: {}", stream, e);
                break;
            }
        }
    }
}

impl ToolRunner for ProcessRunner {
    fn run(&self, command: &ToolCommand, observer: &dyn OutputObserver) -> PipelineResult<ToolOutput> {
        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| PipelineError::ProcessLaunch {
                program: command.program.clone(),
                source,
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut lines = Vec::new();

        thread::scope(|s| {
            if let Some(out) = stdout {
                let tx = tx.clone();
                s.spawn(move || pump(out, OutputStream::Stdout, tx));
            }
            if let Some(err) = stderr {
                let tx = tx.clone();
                s.spawn(move || pump(err, OutputStream::Stderr, tx));
            }
            // The loop ends once both pumps have hit EOF and dropped their senders
            drop(tx);
            for line in rx {
                observer.on_line(&line);
                lines.push(line);
            }
        });

        let status = child.wait()?;
        Ok(ToolOutput {
            exit_code: status.code(),
            lines,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_display() {
        let cmd = ToolCommand::new("gdal_fillnodata.py")
            .args(["-md", "100", "-si", "2"])
            .arg("in.tif")
            .arg("out.tif");
        assert_eq!(cmd.to_string(), "gdal_fillnodata.py -md 100 -si 2 in.tif out.tif");
    }

    #[test]
    fn test_output_success() {
        let ok = ToolOutput {
            exit_code: Some(0),
            lines: vec![],
        };
        let failed = ToolOutput {
            exit_code: Some(1),
            lines: vec![],
        };
        let killed = ToolOutput {
            exit_code: None,
            lines: vec![],
        };
        assert!(ok.success());
        assert!(!failed.success());
        assert!(!killed.success());
    }

    #[test]
    fn test_launch_failure() {
        let err = ProcessRunner::new()
            .run(&ToolCommand::new("lidarpipe-no-such-tool-xyz"), &NullObserver)
            .unwrap_err();
        assert!(matches!(err, PipelineError::ProcessLaunch { .. }));
    }
}
