use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Error, Result};

use crate::attach::{Attach, WorkingSet};
use crate::core::backend::{self, DebuggerBackend};
use crate::core::process::{self, Target};
use crate::core::types::{CapturedFrames, LoupeError, TargetProcess};
use crate::script::{EvalEnvironment, Payload};
use crate::storage;

/// A configuration bundle for a capture
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// The process to attach to. Default: the newest process named `rsession`.
    pub target: Target,
    /// Name or path of the debugger. When unset, `LOUPE_DEBUGGER` is consulted and then the
    /// platform default (`lldb` on macOS, `gdb` elsewhere).
    pub debugger: Option<String>,
    /// What the injected code writes to the `output` artifact.
    pub payload: Payload,
    /// Where the injected code runs inside the target.
    pub environment: EvalEnvironment,
    /// Kill the debugger if it hasn't finished after this long. Default: none.
    ///
    /// A debugger killed mid-evaluation may leave the target with GC and interrupts disabled.
    pub timeout: Option<Duration>,
    /// Directory the per-invocation working directory is created in. Default: the system temp
    /// directory.
    pub working_root: PathBuf,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        CaptureConfig {
            target: Target::default(),
            debugger: None,
            payload: Payload::default(),
            environment: EvalEnvironment::default(),
            timeout: None,
            working_root: std::env::temp_dir(),
        }
    }
}

/// What came back from the target.
#[derive(Debug, Serialize)]
pub struct Capture {
    pub target: TargetProcess,
    #[serde(skip)]
    pub workset: WorkingSet,
    /// Contents of the `output` artifact, if the target wrote one.
    pub output: Option<String>,
    /// The call stack, or `None` if the target never wrote it.
    pub frames: Option<CapturedFrames>,
    /// Everything the debugger printed.
    pub debugger_output: String,
}

/// Attaches to the configured target, captures its R call stack and detaches.
///
/// Fails when the target can't be resolved, the debugger can't be found, or the debugger exits
/// unsuccessfully. A debugger that succeeds without the target writing any frames is only worth a
/// warning: the result just has no frames.
pub fn capture(config: &CaptureConfig) -> Result<Capture, Error> {
    let target = process::resolve(&config.target)?;
    let backend = backend::select_from_env(config.debugger.as_deref())?;
    capture_with(config, target, &backend)
}

/// Like `capture`, with the target and debugger already chosen.
pub fn capture_with(
    config: &CaptureConfig,
    target: TargetProcess,
    backend: &DebuggerBackend,
) -> Result<Capture, Error> {
    let workset = WorkingSet::create(&config.working_root)?;
    let attach = Attach {
        target,
        backend,
        payload: &config.payload,
        environment: config.environment,
        timeout: config.timeout,
    };

    let run = match attach.run(&workset) {
        Ok(run) => run,
        Err(e) => {
            // Whatever the target managed to write can still help explain the failure, but the
            // frames of a failed run aren't trusted.
            if let Ok(Some(text)) = read_output(&workset) {
                warn!("Partial output from the target:\n{}", text);
            }
            return Err(e);
        }
    };

    read_results(target, workset, run.output)
}

/// Loads whatever artifacts the target left in `workset` after a successful debugger run.
pub fn read_results(
    target: TargetProcess,
    workset: WorkingSet,
    debugger_output: String,
) -> Result<Capture, Error> {
    let output = read_output(&workset)?;

    let frames_path = workset.frames();
    let frames = if frames_path.exists() {
        Some(storage::load(&frames_path)?)
    } else {
        let missing = LoupeError::MissingArtifact(frames_path);
        warn!("{}. Debugger output:\n{}", missing, debugger_output);
        None
    };

    Ok(Capture {
        target,
        workset,
        output,
        frames,
        debugger_output,
    })
}

fn read_output(workset: &WorkingSet) -> Result<Option<String>> {
    let path = workset.output();
    if !path.exists() {
        return Ok(None);
    }
    let bytes = fs::read(&path).context(format!("Failed to read {}", path.display()))?;
    Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
}
