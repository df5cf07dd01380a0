//! loupe: look inside a running R session.
//!
//! loupe attaches a native debugger (GDB or LLDB) to a live process hosting the R interpreter,
//! makes the interpreter evaluate a small R script, and detaches. The script writes the current
//! R call stack, plus a traceback or the result of an arbitrary expression, to files loupe reads
//! back. The target keeps running afterwards.
//!
//! ```no_run
//! use loupe::{capture, CaptureConfig, Target};
//!
//! let config = CaptureConfig {
//!     target: Target::Pid(1234),
//!     ..Default::default()
//! };
//! let capture = capture(&config)?;
//! if let Some(frames) = capture.frames {
//!     for frame in frames.iter().rev() {
//!         println!("{}", frame);
//!     }
//! }
//! # Ok::<(), anyhow::Error>(())
//! ```
#[macro_use]
extern crate log;
#[macro_use]
extern crate serde_derive;

pub mod attach;
pub mod core;
pub mod script;
pub mod snapshot;
pub mod storage;
pub mod ui;

pub use crate::core::process::Target;
pub use crate::core::types::{CapturedFrames, Frame, LoupeError, Pid, TargetProcess};
pub use crate::script::{EvalEnvironment, Payload};
pub use crate::snapshot::{capture, Capture, CaptureConfig};
