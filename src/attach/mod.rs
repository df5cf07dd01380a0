use std::fs::{self, File};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use crate::core::backend::DebuggerBackend;
use crate::core::types::{LoupeError, TargetProcess};
use crate::script::{ControlScript, EvalEnvironment, InjectedScript, Payload};

pub mod workset;

pub use self::workset::WorkingSet;

const POLL_INTERVAL: Duration = Duration::from_millis(10);
const TERMINATE_GRACE: Duration = Duration::from_secs(1);

/// Everything needed for one attach/inject/detach cycle.
#[derive(Debug)]
pub struct Attach<'a> {
    pub target: TargetProcess,
    pub backend: &'a DebuggerBackend,
    pub payload: &'a Payload,
    pub environment: EvalEnvironment,
    /// How long the debugger may run before it is killed. `None` waits forever.
    pub timeout: Option<Duration>,
}

/// A debugger session that exited successfully.
#[derive(Debug)]
pub struct DebuggerRun {
    pub status: ExitStatus,
    /// The debugger's stdout and stderr, interleaved.
    pub output: String,
}

impl<'a> Attach<'a> {
    /// Writes both scripts into `workset`, runs the debugger against the target and waits for it
    /// to exit.
    ///
    /// A nonzero exit is a `DebuggerExecution` error carrying everything the debugger printed.
    /// This blocks the calling thread for as long as the debugger runs; a target blocked on a
    /// lock can hold it up indefinitely unless a timeout is set.
    pub fn run(&self, workset: &WorkingSet) -> Result<DebuggerRun> {
        let (script, output, frames) = (workset.script(), workset.output(), workset.frames());
        fs::write(&script, InjectedScript::new(&output, &frames, self.payload).render())
            .context(format!("Failed to write {}", script.display()))?;

        let control = workset.control();
        let dialect = self.backend.dialect;
        fs::write(
            &control,
            ControlScript::new(&script, self.environment).render(dialect.control()),
        )
        .context(format!("Failed to write {}", control.display()))?;

        let log = File::create(workset.log()).context("Failed to create debugger log")?;
        info!(
            "Attaching {} to pid {}",
            self.backend.executable.display(),
            self.target.pid
        );
        let mut child = Command::new(&self.backend.executable)
            .args(dialect.attach_args(self.target.pid, &control))
            .stdin(Stdio::null())
            .stdout(log.try_clone()?)
            .stderr(log)
            .spawn()
            .context(format!(
                "Failed to start {}",
                self.backend.executable.display()
            ))?;

        let status = wait(&mut child, self.timeout)?;
        let output = String::from_utf8_lossy(&fs::read(workset.log())?).into_owned();
        debug!("Debugger exited with {}", status);

        if !status.success() {
            return Err(LoupeError::DebuggerExecution {
                code: status.code(),
                output,
            }
            .into());
        }
        Ok(DebuggerRun { status, output })
    }
}

fn wait(child: &mut Child, timeout: Option<Duration>) -> Result<ExitStatus> {
    let timeout = match timeout {
        Some(t) => t,
        None => return Ok(child.wait()?),
    };

    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }
        if Instant::now() >= deadline {
            break;
        }
        std::thread::sleep(POLL_INTERVAL);
    }

    warn!(
        "Debugger (pid {}) still running after {:?}, terminating it",
        child.id(),
        timeout
    );
    terminate(child)?;
    Err(LoupeError::Timeout(timeout).into())
}

// SIGTERM lets the debugger detach on its way out; SIGKILL if it doesn't take the hint.
fn terminate(child: &mut Child) -> Result<()> {
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if kill(Pid::from_raw(child.id() as i32), Signal::SIGTERM).is_ok() {
            let deadline = Instant::now() + TERMINATE_GRACE;
            while Instant::now() < deadline {
                if child.try_wait()?.is_some() {
                    return Ok(());
                }
                std::thread::sleep(POLL_INTERVAL);
            }
        }
    }
    if let Err(e) = child.kill() {
        debug!("Failed to kill debugger {}: {:?}", child.id(), e);
    }
    child.wait()?;
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::core::backend::Dialect;
    use crate::core::process::tests::executable_script;

    static TRACEBACK: Payload = Payload::Traceback;

    fn backend(dir: &Path, body: &str) -> DebuggerBackend {
        DebuggerBackend {
            dialect: Dialect::Gdb,
            executable: executable_script(dir, "fake-gdb", body),
        }
    }

    fn attach<'a>(backend: &'a DebuggerBackend, timeout: Option<Duration>) -> Attach<'a> {
        Attach {
            target: TargetProcess { pid: 4242 },
            backend,
            payload: &TRACEBACK,
            environment: EvalEnvironment::PrivateChild,
            timeout,
        }
    }

    #[test]
    fn test_run_materializes_scripts_and_captures_output() {
        let _ = env_logger::try_init();
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path(), r#"echo "args: $*"; echo "to stderr" >&2"#);
        let workset = WorkingSet::create(dir.path()).unwrap();

        let run = attach(&backend, None).run(&workset).unwrap();
        assert!(run.status.success());
        let expected = format!("args: -p 4242 -batch -x {}", workset.control().display());
        assert!(run.output.contains(&expected), "{}", run.output);
        assert!(run.output.contains("to stderr"));

        let script = fs::read_to_string(workset.script()).unwrap();
        assert!(script.contains(&workset.frames().display().to_string()));
        let control = fs::read_to_string(workset.control()).unwrap();
        assert!(control.contains(&workset.script().display().to_string()));
        assert!(control.ends_with("detach\nquit\n"));
    }

    #[test]
    fn test_nonzero_exit_is_a_debugger_error() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(
            dir.path(),
            "echo 'ptrace: Operation not permitted.' >&2; exit 1",
        );
        let workset = WorkingSet::create(dir.path()).unwrap();

        let err = attach(&backend, None).run(&workset).unwrap_err();
        match err.downcast_ref::<LoupeError>() {
            Some(LoupeError::DebuggerExecution { code, output }) => {
                assert_eq!(*code, Some(1));
                assert_eq!(output.trim(), "ptrace: Operation not permitted.");
            }
            other => panic!("expected DebuggerExecution, got {:?}", other),
        }
    }

    #[test]
    fn test_timeout_kills_the_debugger() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path(), "exec sleep 30");
        let workset = WorkingSet::create(dir.path()).unwrap();

        let start = Instant::now();
        let err = attach(&backend, Some(Duration::from_millis(200)))
            .run(&workset)
            .unwrap_err();
        assert!(start.elapsed() < Duration::from_secs(10));
        match err.downcast_ref::<LoupeError>() {
            Some(LoupeError::Timeout(t)) => assert_eq!(*t, Duration::from_millis(200)),
            other => panic!("expected Timeout, got {:?}", other),
        }
    }

    #[test]
    fn test_fast_debugger_within_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path(), "exit 0");
        let workset = WorkingSet::create(dir.path()).unwrap();
        let run = attach(&backend, Some(Duration::from_secs(10)))
            .run(&workset)
            .unwrap();
        assert!(run.status.success());
    }
}
