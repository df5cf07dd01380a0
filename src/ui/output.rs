use std::io::Write;
use std::path::Path;

use anyhow::{Error, Result};

use crate::snapshot::Capture;

pub trait Outputter {
    fn complete(&mut self, capture: &Capture, w: &mut dyn Write) -> Result<(), Error>;
}

#[derive(clap::ValueEnum, Copy, Debug, Clone, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// The target's output followed by its call stack, innermost frame first
    #[default]
    Text,
    /// Everything captured, as one JSON document
    Json,
}

impl OutputFormat {
    pub fn outputter(self) -> Box<dyn Outputter> {
        match self {
            OutputFormat::Text => Box::new(Text),
            OutputFormat::Json => Box::new(Json),
        }
    }
}

pub struct Text;

impl Outputter for Text {
    fn complete(&mut self, capture: &Capture, w: &mut dyn Write) -> Result<(), Error> {
        if let Some(ref output) = capture.output {
            w.write_all(output.as_bytes())?;
            if !output.is_empty() && !output.ends_with('\n') {
                writeln!(w)?;
            }
        }

        match capture.frames {
            None => writeln!(
                w,
                "No call stack was written by pid {}. Debugger output is in {}",
                capture.target.pid,
                capture.workset.log().display()
            )?,
            Some(ref frames) if frames.is_empty() => writeln!(
                w,
                "No active R calls in pid {} (idle at top level)",
                capture.target.pid
            )?,
            Some(ref frames) => {
                writeln!(
                    w,
                    "R call stack of pid {} ({} frames, innermost first):",
                    capture.target.pid,
                    frames.depth()
                )?;
                for frame in frames.iter().rev() {
                    writeln!(w, "{}", frame)?;
                }
            }
        }
        Ok(())
    }
}

pub struct Json;

#[derive(Serialize)]
struct Report<'a> {
    working_directory: &'a Path,
    #[serde(flatten)]
    capture: &'a Capture,
}

impl Outputter for Json {
    fn complete(&mut self, capture: &Capture, w: &mut dyn Write) -> Result<(), Error> {
        let report = Report {
            working_directory: capture.workset.dir(),
            capture,
        };
        serde_json::to_writer_pretty(&mut *w, &report)?;
        writeln!(w)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attach::WorkingSet;
    use crate::core::types::{CapturedFrames, Frame, TargetProcess};

    fn capture(root: &Path, output: Option<&str>, frames: Option<CapturedFrames>) -> Capture {
        Capture {
            target: TargetProcess { pid: 1234 },
            workset: WorkingSet::create(root).unwrap(),
            output: output.map(|s| s.to_string()),
            frames,
            debugger_output: "[Inferior 1 (process 1234) detached]\n".to_string(),
        }
    }

    fn frames() -> CapturedFrames {
        CapturedFrames {
            trimmed: 3,
            frames: vec![
                Frame {
                    index: 1,
                    parent: 0,
                    environment: "<environment: 0x1>".to_string(),
                    call: "run()".to_string(),
                },
                Frame {
                    index: 2,
                    parent: 1,
                    environment: "<environment: 0x2>".to_string(),
                    call: "Sys.sleep(100)".to_string(),
                },
            ],
        }
    }

    fn render(format: OutputFormat, capture: &Capture) -> String {
        let mut buf = Vec::new();
        format.outputter().complete(capture, &mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn test_text_innermost_first() {
        let root = tempfile::tempdir().unwrap();
        let capture = capture(root.path(), Some("traceback"), Some(frames()));
        let text = render(OutputFormat::Text, &capture);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "traceback");
        assert_eq!(lines[1], "R call stack of pid 1234 (2 frames, innermost first):");
        assert_eq!(lines[2], "#2 Sys.sleep(100) [<environment: 0x2>]");
        assert_eq!(lines[3], "#1 run() [<environment: 0x1>]");
    }

    #[test]
    fn test_text_idle_and_missing() {
        let root = tempfile::tempdir().unwrap();
        let idle = capture(root.path(), None, Some(CapturedFrames::default()));
        assert!(render(OutputFormat::Text, &idle).contains("No active R calls"));

        let missing = capture(root.path(), None, None);
        let text = render(OutputFormat::Text, &missing);
        assert!(text.contains("No call stack was written"));
        assert!(text.contains("debugger.log"));
    }

    #[test]
    fn test_json() {
        let root = tempfile::tempdir().unwrap();
        let capture = capture(root.path(), Some("3"), Some(frames()));
        let json: serde_json::Value =
            serde_json::from_str(&render(OutputFormat::Json, &capture)).unwrap();
        assert_eq!(json["target"]["pid"], 1234);
        assert_eq!(json["output"], "3");
        assert_eq!(json["frames"]["trimmed"], 3);
        assert_eq!(json["frames"]["frames"][1]["call"], "Sys.sleep(100)");
        assert_eq!(
            json["working_directory"],
            capture.workset.dir().to_str().unwrap()
        );
    }
}
