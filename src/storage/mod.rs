//! The on-disk format of the `frames` artifact.
//!
//! The artifact is written by R code running inside the target and read back by loupe, which
//! may be a different version from the one that generated the R code. It is a gzip stream whose
//! first line is a magic number plus version,
//!
//! ```text
//! loupe01
//! ```
//!
//! followed by a version-specific body. Readers reject versions they don't know rather than
//! guessing.
use std::fs::File;
use std::io::prelude::*;
use std::io::BufReader;
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::core::types::{CapturedFrames, LoupeError};

mod v1;

/// Magic number and current version, as written on the first line.
pub const MAGIC: &str = "loupe01";

const MAGIC_PREFIX: &str = "loupe";

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub(crate) struct Version(u32);

impl Version {
    fn parse(line: &str) -> Result<Version, LoupeError> {
        line.strip_prefix(MAGIC_PREFIX)
            .filter(|v| v.len() == 2)
            .and_then(|v| v.parse().ok())
            .map(Version)
            .ok_or_else(|| LoupeError::Serialization(format!("bad header {:?}", line)))
    }
}

pub(crate) trait Storage: Sized {
    fn from_reader<R: BufRead>(r: R) -> Result<Self, LoupeError>;
    fn version() -> Version;
}

/// Reads a frames artifact from disk.
pub fn load(path: &Path) -> Result<CapturedFrames, LoupeError> {
    let file = File::open(path).map_err(|e| {
        LoupeError::Serialization(format!("couldn't open {}: {}", path.display(), e))
    })?;
    read(file)
}

/// Reads a gzipped frames artifact.
pub fn read<R: Read>(r: R) -> Result<CapturedFrames, LoupeError> {
    let mut reader = BufReader::new(GzDecoder::new(r));
    let mut header = String::new();
    reader
        .read_line(&mut header)
        .map_err(|e| LoupeError::Serialization(format!("couldn't read header: {}", e)))?;

    let version = Version::parse(header.trim_end())?;
    if version == v1::Data::version() {
        Ok(v1::Data::from_reader(reader)?.0)
    } else {
        Err(LoupeError::Serialization(format!(
            "unsupported version {} (this loupe reads {})",
            version.0,
            v1::Data::version().0
        )))
    }
}

/// Writes `frames` in the current format.
pub fn write<W: Write>(w: W, frames: &CapturedFrames) -> std::io::Result<()> {
    let mut encoder = GzEncoder::new(w, Compression::default());
    writeln!(encoder, "{}", MAGIC)?;
    v1::write(&mut encoder, frames)?;
    encoder.finish()?;
    Ok(())
}

pub fn store(path: &Path, frames: &CapturedFrames) -> std::io::Result<()> {
    write(File::create(path)?, frames)
}
