//! Core types used throughout loupe: the target process, captured frames and errors.
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub type Pid = libc::pid_t;

/// A running process that hosts the R interpreter we attach to.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, Serialize, Deserialize)]
pub struct TargetProcess {
    pub pid: Pid,
}

/// One entry of the interpreter's call stack, outermost frame first.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Serialize, Deserialize)]
pub struct Frame {
    /// 1-based frame number, as reported by `sys.calls()`.
    pub index: usize,
    /// Frame number of the caller's frame; 0 means the top level.
    pub parent: usize,
    /// Printed form of the frame's evaluation environment.
    pub environment: String,
    /// Deparsed call.
    pub call: String,
}

/// The call stack recovered from the target, after the frames contributed by the injection
/// plumbing have been removed.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Default, Serialize, Deserialize)]
pub struct CapturedFrames {
    /// How many trailing frames were removed before the snapshot was written.
    pub trimmed: usize,
    pub frames: Vec<Frame>,
}

#[derive(Error, Debug)]
pub enum LoupeError {
    #[error("No running process named `{0}`. Is it running?")]
    Resolution(String),
    #[error("Couldn't find an executable debugger named `{0}`")]
    BackendNotFound(String),
    #[error("Debugger exited unsuccessfully ({})", describe_exit(.code))]
    DebuggerExecution { code: Option<i32>, output: String },
    #[error("The debugger succeeded but {} was never written", .0.display())]
    MissingArtifact(PathBuf),
    #[error("Couldn't read frames artifact: {0}")]
    Serialization(String),
    #[error("Debugger didn't finish within {0:?}. The target's GC, debug and interrupt state may not have been restored")]
    Timeout(Duration),
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("exit code {}", c),
        None => "terminated by a signal".to_string(),
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{} {} [{}]", self.index, self.call, self.environment)
    }
}

impl CapturedFrames {
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Frame> {
        self.frames.iter()
    }

    /// The frame the target was executing when it was interrupted.
    pub fn innermost(&self) -> Option<&Frame> {
        self.frames.last()
    }

    /// Drops the `offset` innermost frames. A stack shallower than `offset` becomes empty.
    pub fn trim(&mut self, offset: usize) {
        let keep = self.frames.len().saturating_sub(offset);
        self.frames.truncate(keep);
        self.trimmed += offset;
    }
}
