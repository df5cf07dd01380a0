use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;

/// The private directory one invocation works in.
///
/// Both loupe and the target write here: loupe writes the two scripts, the R code running inside
/// the target writes `output` and `frames`. Nothing is deleted afterwards, so a failed attach can
/// be inspected by hand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkingSet {
    dir: PathBuf,
}

impl WorkingSet {
    /// Creates a uniquely named directory under `root`.
    pub fn create(root: &Path) -> Result<WorkingSet> {
        let prefix = format!("loupe-{}-", Utc::now().format("%Y%m%dT%H%M%SZ"));
        let dir = tempfile::Builder::new()
            .prefix(&prefix)
            .tempdir_in(root)
            .context(format!("Failed to create working directory in {}", root.display()))?
            .keep();
        open_to_target(&dir)?;
        debug!("Working set: {}", dir.display());
        Ok(WorkingSet { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// R source evaluated inside the target.
    pub fn script(&self) -> PathBuf {
        self.dir.join("script.R")
    }

    /// Free-form text written by the target: a traceback, or the result of an expression.
    pub fn output(&self) -> PathBuf {
        self.dir.join("output")
    }

    /// The serialized call stack written by the target.
    pub fn frames(&self) -> PathBuf {
        self.dir.join("frames")
    }

    /// Commands for the debugger.
    pub fn control(&self) -> PathBuf {
        self.dir.join("control")
    }

    /// Everything the debugger printed.
    pub fn log(&self) -> PathBuf {
        self.dir.join("debugger.log")
    }
}

// The target usually runs as a different user than we do (we're often running under sudo), and
// it has to be able to create files in here.
#[cfg(unix)]
fn open_to_target(dir: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(dir, fs::Permissions::from_mode(0o777))
        .context(format!("Failed to set permissions on {}", dir.display()))?;
    Ok(())
}

#[cfg(not(unix))]
fn open_to_target(_dir: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_is_unique_and_kept() {
        let root = tempfile::tempdir().unwrap();
        let first = WorkingSet::create(root.path()).unwrap();
        let second = WorkingSet::create(root.path()).unwrap();
        assert_ne!(first, second);
        assert!(first.dir().is_dir());
        assert!(first.dir().starts_with(root.path()));

        let name = first.dir().file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("loupe-"));
    }

    #[test]
    fn test_paths_live_in_the_directory() {
        let root = tempfile::tempdir().unwrap();
        let ws = WorkingSet::create(root.path()).unwrap();
        for path in [ws.script(), ws.output(), ws.frames(), ws.control(), ws.log()] {
            assert_eq!(path.parent().unwrap(), ws.dir());
            assert!(!path.exists());
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_directory_is_writable_by_target() {
        use std::os::unix::fs::PermissionsExt;

        let root = tempfile::tempdir().unwrap();
        let ws = WorkingSet::create(root.path()).unwrap();
        let mode = fs::metadata(ws.dir()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o777);
    }

    #[test]
    fn test_missing_root() {
        assert!(WorkingSet::create(Path::new("/nonexistent/loupe-root")).is_err());
    }
}
