use std::ffi::OsStr;
use std::fmt;
use std::str::FromStr;

use sysinfo::{ProcessesToUpdate, System};

use crate::core::types::{LoupeError, Pid, TargetProcess};

/// Name of the process image that hosts the R session when no target is given.
pub const DEFAULT_PROCESS_NAME: &str = "rsession";

/// What the operator asked us to attach to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Pid(Pid),
    Name(String),
}

impl Default for Target {
    fn default() -> Self {
        Target::Name(DEFAULT_PROCESS_NAME.to_string())
    }
}

impl FromStr for Target {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.parse::<Pid>() {
            Ok(pid) => Target::Pid(pid),
            Err(_) => Target::Name(s.to_string()),
        })
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Target::Pid(pid) => write!(f, "pid {}", pid),
            Target::Name(name) => write!(f, "`{}`", name),
        }
    }
}

/// Turns a target into a concrete PID. Numeric PIDs are trusted as given; names are looked up in
/// the process table and the most recently started match wins.
pub fn resolve(target: &Target) -> Result<TargetProcess, LoupeError> {
    let name = match target {
        Target::Pid(pid) => return Ok(TargetProcess { pid: *pid }),
        Target::Name(name) => name,
    };

    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);
    let candidates = system
        .processes_by_exact_name(OsStr::new(name))
        .map(|p| (p.pid().as_u32() as Pid, p.start_time()));

    match newest(candidates) {
        Some(pid) => {
            debug!("Resolved `{}` to pid {}", name, pid);
            Ok(TargetProcess { pid })
        }
        None => Err(LoupeError::Resolution(name.clone())),
    }
}

// Ties on start time (which only has one-second resolution) go to the higher PID.
fn newest<I>(candidates: I) -> Option<Pid>
where
    I: Iterator<Item = (Pid, u64)>,
{
    candidates
        .max_by_key(|&(pid, start_time)| (start_time, pid))
        .map(|(pid, _)| pid)
}
