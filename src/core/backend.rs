use std::env;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

use crate::core::types::{LoupeError, Pid};

/// Environment variable naming the debugger to use when none is given explicitly.
pub const DEBUGGER_ENV_VAR: &str = "LOUPE_DEBUGGER";

/// The scripting dialect (and command line) a debugger understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Gdb,
    Lldb,
}

/// A debugger we know how to drive, and where its executable lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebuggerBackend {
    pub dialect: Dialect,
    pub executable: PathBuf,
}

impl Dialect {
    /// LLDB is the system debugger on macOS; GDB everywhere else.
    pub fn platform_default() -> Dialect {
        if cfg!(target_os = "macos") {
            Dialect::Lldb
        } else {
            Dialect::Gdb
        }
    }

    pub fn executable_name(self) -> &'static str {
        match self {
            Dialect::Gdb => "gdb",
            Dialect::Lldb => "lldb",
        }
    }

    /// Guesses the dialect from a debugger's file name: anything called `lldb*` speaks LLDB.
    pub fn from_executable(path: &Path) -> Dialect {
        match path.file_name().and_then(|n| n.to_str()) {
            Some(name) if name.starts_with("lldb") => Dialect::Lldb,
            _ => Dialect::Gdb,
        }
    }

    /// Arguments that attach to `pid`, run `control_script` non-interactively and exit.
    pub fn attach_args(self, pid: Pid, control_script: &Path) -> Vec<OsString> {
        let flags: &[&str] = match self {
            Dialect::Gdb => &["-batch", "-x"],
            Dialect::Lldb => &["--batch", "-s"],
        };
        let mut args: Vec<OsString> = vec!["-p".into(), pid.to_string().into()];
        args.extend(flags.iter().map(OsString::from));
        args.push(control_script.into());
        args
    }
}

/// Picks the debugger to drive. Precedence is `explicit`, then `env_override`, then the platform
/// default. The only side effect is checking that the executable exists.
pub fn select(
    explicit: Option<&str>,
    env_override: Option<&str>,
) -> Result<DebuggerBackend, LoupeError> {
    select_in(explicit, env_override, env::var_os("PATH").as_deref())
}

/// Like `select`, searching `search_path` for bare names instead of `PATH`.
pub fn select_in(
    explicit: Option<&str>,
    env_override: Option<&str>,
    search_path: Option<&OsStr>,
) -> Result<DebuggerBackend, LoupeError> {
    let requested = explicit
        .filter(|s| !s.is_empty())
        .or(env_override.filter(|s| !s.is_empty()))
        .unwrap_or_else(|| Dialect::platform_default().executable_name());

    match find_executable(requested, search_path) {
        Some(executable) => {
            let dialect = Dialect::from_executable(&executable);
            debug!("Using {:?} debugger at {}", dialect, executable.display());
            Ok(DebuggerBackend {
                dialect,
                executable,
            })
        }
        None => Err(LoupeError::BackendNotFound(requested.to_string())),
    }
}

/// Like `select`, reading the override from `LOUPE_DEBUGGER`.
pub fn select_from_env(explicit: Option<&str>) -> Result<DebuggerBackend, LoupeError> {
    let env_override = env::var(DEBUGGER_ENV_VAR).ok();
    select(explicit, env_override.as_deref())
}

/// Resolves `name` the way a shell would: paths are checked directly, bare names are searched
/// for on `search_path`.
fn find_executable(name: &str, search_path: Option<&OsStr>) -> Option<PathBuf> {
    let candidate = Path::new(name);
    if candidate.components().count() > 1 {
        return is_executable(candidate).then(|| candidate.to_path_buf());
    }
    env::split_paths(search_path?)
        .map(|dir| dir.join(name))
        .find(|path| is_executable(path))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    match path.metadata() {
        Ok(m) => m.is_file() && m.permissions().mode() & 0o111 != 0,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
