use std::fmt::Write;
use std::path::Path;

use crate::script::r_string_literal;
use crate::storage;

/// Number of frames the injection itself puts on the R call stack when the script runs. The
/// control script evaluates `tryCatch(sys.source(...), error = ...)`, which stacks `tryCatch`,
/// `tryCatchList`, `tryCatchOne` and `doTryCatch`, then `sys.source()`, the `eval()` closure it
/// calls, and the context `eval` opens for the expression. These are trimmed so the snapshot
/// ends where the target was interrupted.
///
/// This depends on exactly how the control script enters the interpreter. Change one and the
/// other has to be recalibrated.
pub const INJECTION_FRAMES: usize = 7;

/// What the injected script writes to the `output` artifact.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Payload {
    /// A structured backtrace from `rlang`, when the target has it installed.
    #[default]
    Traceback,
    /// The printed result of evaluating this R source in the innermost target frame.
    Evaluate(String),
}

/// The R source evaluated inside the target.
#[derive(Debug)]
pub struct InjectedScript<'a> {
    output: &'a Path,
    frames: &'a Path,
    payload: &'a Payload,
}

// The stack is read before anything else runs, at the top level of the sourced file, so the
// only frames above the target's own are the INJECTION_FRAMES.
const CAPTURE: &str = r#".loupe_calls <- sys.calls()
.loupe_parents <- sys.parents()
.loupe_envs <- sys.frames()
.loupe_depth <- max(0L, length(.loupe_calls) - .loupe_trim)
"#;

const TRACEBACK: &str = r#"tryCatch({
    if (.loupe_depth > 0L && requireNamespace("rlang", quietly = TRUE)) {
        .loupe_trace <- rlang::trace_back(bottom = .loupe_envs[[.loupe_depth]])
        writeLines(format(.loupe_trace), .loupe_output)
    }
}, error = function(e) NULL)
"#;

const EVALUATE: &str = r#"tryCatch({
    .loupe_env <- if (.loupe_depth > 0L) .loupe_envs[[.loupe_depth]] else globalenv()
    .loupe_result <- tryCatch(
        utils::capture.output(print(eval(parse(text = .loupe_expr), envir = .loupe_env))),
        error = function(e) paste("Error:", conditionMessage(e))
    )
    writeLines(.loupe_result, .loupe_output)
}, error = function(e) NULL)
"#;

// Every field is escaped the same way `storage::v1` unescapes it.
const FRAMES: &str = r#"tryCatch({
    .loupe_escape <- function(x) {
        x <- gsub("\\", "\\\\", x, fixed = TRUE)
        x <- gsub("\t", "\\t", x, fixed = TRUE)
        x <- gsub("\n", "\\n", x, fixed = TRUE)
        gsub("\r", "\\r", x, fixed = TRUE)
    }
    .loupe_lines <- vapply(seq_len(.loupe_depth), function(i) {
        call <- paste(deparse(.loupe_calls[[i]], nlines = 20L), collapse = "\n")
        env <- paste(utils::capture.output(print(.loupe_envs[[i]])), collapse = " ")
        paste(i, .loupe_parents[[i]], .loupe_escape(env), .loupe_escape(call), sep = "\t")
    }, character(1))
    .loupe_con <- gzfile(.loupe_frames, open = "w")
    writeLines(c(.loupe_format, paste(.loupe_trim, .loupe_depth, sep = "\t"), .loupe_lines), .loupe_con)
    close(.loupe_con)
}, error = function(e) NULL)
"#;

const CLEANUP: &str = r#"rm(list = grep("^[.]loupe_", ls(all.names = TRUE), value = TRUE))
"#;

impl<'a> InjectedScript<'a> {
    pub fn new(output: &'a Path, frames: &'a Path, payload: &'a Payload) -> Self {
        InjectedScript {
            output,
            frames,
            payload,
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str("# Generated by loupe and evaluated inside the target process.\n");
        self.bind(&mut out, ".loupe_output", &path_literal(self.output));
        self.bind(&mut out, ".loupe_frames", &path_literal(self.frames));
        self.bind(&mut out, ".loupe_format", &r_string_literal(storage::MAGIC));
        self.bind(&mut out, ".loupe_trim", &format!("{}L", INJECTION_FRAMES));
        if let Payload::Evaluate(expr) = self.payload {
            self.bind(&mut out, ".loupe_expr", &r_string_literal(expr));
        }

        out.push_str(CAPTURE);
        // The output artifact is best effort; a failure there must not cost us the frames.
        match self.payload {
            Payload::Traceback => out.push_str(TRACEBACK),
            Payload::Evaluate(_) => out.push_str(EVALUATE),
        }
        out.push_str(FRAMES);
        out.push_str(CLEANUP);
        out
    }

    fn bind(&self, out: &mut String, name: &str, value: &str) {
        let _ = writeln!(out, "{} <- {}", name, value);
    }
}

fn path_literal(path: &Path) -> String {
    r_string_literal(&path.to_string_lossy())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(payload: &Payload) -> String {
        InjectedScript::new(
            Path::new("/tmp/loupe-1/output"),
            Path::new("/tmp/loupe-1/frames"),
            payload,
        )
        .render()
    }

    #[test]
    fn test_slots_are_bound_first() {
        let script = render(&Payload::Traceback);
        let lines: Vec<&str> = script.lines().collect();
        assert_eq!(lines[1], r#".loupe_output <- "/tmp/loupe-1/output""#);
        assert_eq!(lines[2], r#".loupe_frames <- "/tmp/loupe-1/frames""#);
        assert_eq!(lines[3], r#".loupe_format <- "loupe01""#);
        assert_eq!(lines[4], ".loupe_trim <- 7L");
        assert_eq!(lines[5], ".loupe_calls <- sys.calls()");
    }

    #[test]
    fn test_traceback_payload() {
        let script = render(&Payload::Traceback);
        assert!(script.contains("rlang::trace_back"));
        assert!(!script.contains(".loupe_expr"));
    }

    #[test]
    fn test_evaluate_payload_is_quoted() {
        let script = render(&Payload::Evaluate(r#"ls("package:base")"#.to_string()));
        assert!(script.contains(r#".loupe_expr <- "ls(\"package:base\")""#));
        assert!(script.contains("parse(text = .loupe_expr)"));
        assert!(!script.contains("rlang::trace_back"));
    }

    #[test]
    fn test_stack_is_captured_before_payload_and_written_after() {
        let script = render(&Payload::Traceback);
        let capture = script.find("sys.calls()").unwrap();
        let traceback = script.find("rlang::trace_back").unwrap();
        let frames = script.find("gzfile(.loupe_frames").unwrap();
        let cleanup = script.find("rm(list").unwrap();
        assert!(capture < traceback && traceback < frames && frames < cleanup);
    }

    #[test]
    fn test_awkward_paths_are_escaped() {
        let payload = Payload::Traceback;
        let script = InjectedScript::new(
            Path::new(r#"/tmp/a"b\c/output"#),
            Path::new("/tmp/x/frames"),
            &payload,
        )
        .render();
        assert!(script.contains(r#".loupe_output <- "/tmp/a\"b\\c/output""#));
    }
}
