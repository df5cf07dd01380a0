//! Generators for the two scripts an attach needs: the R code injected into the target, and the
//! debugger commands that get it evaluated.
//!
//! Neither script is built by pasting strings into a template. Every value that ends up inside a
//! literal goes through one of the quoting functions below, so a path containing a quote or a
//! backslash can't change the meaning of the script.
use std::fmt::Write;

pub mod control;
pub mod injected;

pub use self::control::{ControlDialect, ControlScript, EvalEnvironment, Gdb, Lldb};
pub use self::injected::{InjectedScript, Payload, INJECTION_FRAMES};

/// Quotes `s` as a C string literal, the form both debuggers' expression evaluators accept.
/// Anything outside printable ASCII is written as an octal byte escape.
pub fn c_string_literal(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for b in s.bytes() {
        match b {
            b'"' => out.push_str("\\\""),
            b'\\' => out.push_str("\\\\"),
            b'\n' => out.push_str("\\n"),
            b'\t' => out.push_str("\\t"),
            b'\r' => out.push_str("\\r"),
            0x20..=0x7e => out.push(b as char),
            _ => {
                let _ = write!(out, "\\{:03o}", b);
            }
        }
    }
    out.push('"');
    out
}

/// Quotes `s` as an R string literal. Non-ASCII characters are written as `\U{..}` escapes so the
/// script reads the same whatever the target's native encoding is.
pub fn r_string_literal(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            ' '..='~' => out.push(c),
            c if c.is_ascii() => {
                let _ = write!(out, "\\x{:02x}", c as u32);
            }
            c => {
                let _ = write!(out, "\\U{{{:x}}}", c as u32);
            }
        }
    }
    out.push('"');
    out
}
