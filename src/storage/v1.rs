//! Version 1 body: a `trimmed \t count` line, then one line per frame, outermost first:
//!
//! ```text
//! index \t parent \t environment \t call
//! ```
//!
//! Backslash, tab, newline and carriage return inside a field are written as `\\`, `\t`, `\n`
//! and `\r`. Lines are decoded lossily since deparsed calls come out in the target's native
//! encoding.
use std::io::prelude::*;

use crate::core::types::{CapturedFrames, Frame, LoupeError};

use super::*;

pub(crate) struct Data(pub CapturedFrames);

impl Storage for Data {
    fn from_reader<R: BufRead>(mut r: R) -> Result<Data, LoupeError> {
        let mut lines = Vec::new();
        loop {
            let mut buf = Vec::new();
            let n = r
                .read_until(b'\n', &mut buf)
                .map_err(|e| LoupeError::Serialization(e.to_string()))?;
            if n == 0 {
                break;
            }
            let line = String::from_utf8_lossy(&buf);
            lines.push(line.trim_end_matches(&['\n', '\r'][..]).to_string());
        }

        let mut lines = lines.into_iter();
        let counts = lines
            .next()
            .ok_or_else(|| LoupeError::Serialization("missing frame count".to_string()))?;
        let (trimmed, count) = match counts.split('\t').collect::<Vec<_>>()[..] {
            [trimmed, count] => (number(trimmed)?, number(count)?),
            _ => return Err(corrupt(&counts)),
        };

        let frames = lines.map(|l| parse_frame(&l)).collect::<Result<Vec<_>, _>>()?;
        if frames.len() != count {
            return Err(LoupeError::Serialization(format!(
                "expected {} frames, found {}",
                count,
                frames.len()
            )));
        }
        Ok(Data(CapturedFrames { trimmed, frames }))
    }

    fn version() -> Version {
        Version(1)
    }
}

pub(crate) fn write<W: Write>(w: &mut W, frames: &CapturedFrames) -> std::io::Result<()> {
    writeln!(w, "{}\t{}", frames.trimmed, frames.depth())?;
    for f in frames.iter() {
        writeln!(
            w,
            "{}\t{}\t{}\t{}",
            f.index,
            f.parent,
            escape(&f.environment),
            escape(&f.call)
        )?;
    }
    Ok(())
}

fn parse_frame(line: &str) -> Result<Frame, LoupeError> {
    match line.split('\t').collect::<Vec<_>>()[..] {
        [index, parent, environment, call] => Ok(Frame {
            index: number(index)?,
            parent: number(parent)?,
            environment: unescape(environment),
            call: unescape(call),
        }),
        _ => Err(corrupt(line)),
    }
}

fn number(field: &str) -> Result<usize, LoupeError> {
    field.trim().parse().map_err(|_| corrupt(field))
}

fn corrupt(line: &str) -> LoupeError {
    LoupeError::Serialization(format!("malformed line {:?}", line))
}

fn escape(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    for c in field.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out
}

// Unknown escapes are kept as written.
fn unescape(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut chars = field.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}
