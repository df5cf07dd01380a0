#[macro_use]
extern crate log;

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Error, Result};
use clap::{CommandFactory, Parser};

use loupe::core::process::Target;
use loupe::core::types::{LoupeError, Pid};
use loupe::script::{EvalEnvironment, Payload};
use loupe::ui::output::OutputFormat;
use loupe::{capture, CaptureConfig};

/// Capture the call stack of a running R session without stopping it
#[derive(Parser, Debug)]
#[command(name = "loupe", version)]
struct Args {
    /// PID or process name of the R session. Default: the newest `rsession`
    #[arg(value_name = "PID|NAME", conflicts_with = "pid")]
    target: Option<Target>,

    /// PID of the R session
    #[arg(short, long)]
    pid: Option<Pid>,

    /// Debugger to attach with, by name or path. Default: $LOUPE_DEBUGGER, then gdb (lldb on
    /// macOS)
    #[arg(short, long)]
    debugger: Option<String>,

    /// R expression to evaluate in the innermost frame instead of printing a traceback
    #[arg(short, long, conflicts_with = "file")]
    expr: Option<String>,

    /// File of R code to evaluate in the innermost frame instead of printing a traceback
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// File to write the result to. Default: stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Kill the debugger if it's still running after this many seconds
    #[arg(short, long, value_name = "SECS")]
    timeout: Option<u64>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Environment the injected code runs in
    #[arg(long, value_enum, default_value_t = EvalEnvironment::PrivateChild)]
    environment: EvalEnvironment,

    /// Directory to create the working directory in. Default: the system temp directory
    #[arg(long, value_name = "DIR")]
    working_root: Option<PathBuf>,
}

impl Args {
    fn config(&self) -> Result<CaptureConfig> {
        let target = match (self.pid, &self.target) {
            (Some(pid), _) => Target::Pid(pid),
            (None, Some(target)) => target.clone(),
            (None, None) => Target::default(),
        };

        let payload = match (&self.expr, &self.file) {
            (Some(expr), _) => Payload::Evaluate(expr.clone()),
            (None, Some(path)) => Payload::Evaluate(
                std::fs::read_to_string(path)
                    .context(format!("Failed to read {}", path.display()))?,
            ),
            (None, None) => Payload::Traceback,
        };

        let mut config = CaptureConfig {
            target,
            debugger: self.debugger.clone(),
            payload,
            environment: self.environment,
            timeout: self.timeout.map(Duration::from_secs),
            ..Default::default()
        };
        if let Some(ref root) = self.working_root {
            config.working_root = root.clone();
        }
        Ok(config)
    }
}

fn do_main(args: Args) -> Result<(), Error> {
    let config = args.config()?;
    let capture = capture(&config)?;
    info!("Artifacts kept in {}", capture.workset.dir().display());

    let mut out = open_output(args.output.as_deref())?;
    args.format.outputter().complete(&capture, &mut out)?;
    out.flush()?;
    Ok(())
}

fn open_output(path: Option<&Path>) -> Result<Box<dyn Write>> {
    match path {
        Some(path) => Ok(Box::new(
            File::create(path).context(format!("Failed to create {}", path.display()))?,
        )),
        None => Ok(Box::new(std::io::stdout())),
    }
}

fn main() {
    if std::env::args_os().len() <= 1 {
        let _ = Args::command().print_help();
        return;
    }
    let args = Args::parse();
    env_logger::init();

    if let Err(err) = do_main(args) {
        eprintln!("Error: {:#}", err);
        if let Some(LoupeError::DebuggerExecution { output, .. }) = err.downcast_ref::<LoupeError>() {
            eprint!("{}", output);
        }
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_arg_parsing() {
        let args = parse(&["loupe", "--pid", "1234"]);
        assert_eq!(args.config().unwrap().target, Target::Pid(1234));

        let args = parse(&["loupe", "1234"]);
        assert_eq!(args.config().unwrap().target, Target::Pid(1234));

        let args = parse(&["loupe", "R"]);
        assert_eq!(args.config().unwrap().target, Target::Name("R".to_string()));

        let args = parse(&["loupe", "-d", "lldb", "-t", "30", "-e", "ls()"]);
        let config = args.config().unwrap();
        assert_eq!(config.target, Target::default());
        assert_eq!(config.debugger.as_deref(), Some("lldb"));
        assert_eq!(config.timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.payload, Payload::Evaluate("ls()".to_string()));
        assert_eq!(config.environment, EvalEnvironment::PrivateChild);

        let args = parse(&["loupe", "--format", "json", "--environment", "global", "-o", "out"]);
        assert_eq!(args.format, OutputFormat::Json);
        assert_eq!(args.environment, EvalEnvironment::Global);
        assert_eq!(args.output, Some(PathBuf::from("out")));
    }

    #[test]
    fn test_conflicting_args() {
        assert!(Args::try_parse_from(["loupe", "-e", "1", "-f", "x.R"]).is_err());
        assert!(Args::try_parse_from(["loupe", "-p", "1", "rsession"]).is_err());
        assert!(Args::try_parse_from(["loupe", "--format", "yaml"]).is_err());
    }

    #[test]
    fn test_payload_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("probe.R");
        std::fs::write(&path, "print(search())\n").unwrap();
        let args = parse(&["loupe", "-f", path.to_str().unwrap()]);
        assert_eq!(
            args.config().unwrap().payload,
            Payload::Evaluate("print(search())\n".to_string())
        );

        let args = parse(&["loupe", "-f", "/nonexistent/probe.R"]);
        assert!(args.config().is_err());
    }

    #[test]
    fn test_working_root() {
        let args = parse(&["loupe", "--working-root", "/var/tmp"]);
        assert_eq!(args.config().unwrap().working_root, PathBuf::from("/var/tmp"));
        let args = parse(&["loupe", "1"]);
        assert_eq!(args.config().unwrap().working_root, std::env::temp_dir());
    }
}
