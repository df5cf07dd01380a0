use std::fmt;
use std::path::Path;

use crate::core::backend::Dialect;
use crate::script::{c_string_literal, r_string_literal};

/// Where the injected script's top-level code runs.
#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvalEnvironment {
    /// A fresh `new.env()` whose parent is the global environment, so nothing the script
    /// assigns is visible to the target afterwards.
    #[default]
    PrivateChild,
    /// The global environment itself. The script removes its own bindings when it's done.
    Global,
}

/// A C expression evaluated inside the target by the debugger.
///
/// Every function call and global read carries an explicit type, because R is usually shipped
/// without debug info and both debuggers refuse to guess the type of an undescribed symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Native {
    Global { ty: &'static str, name: &'static str },
    Call { ret: &'static str, func: &'static str, args: Vec<Native> },
    Assign(Box<Native>, Box<Native>),
    Int(i32),
    Str(String),
    /// A debugger convenience variable.
    Scratch(&'static str),
    /// The address of a function in the target.
    Address(&'static str),
}

impl fmt::Display for Native {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Native::Global { ty, name } => write!(f, "(*({} *) &{})", ty, name),
            Native::Call { ret, func, args } => {
                write!(f, "(({}) {}(", ret, func)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, "))")
            }
            Native::Assign(lhs, rhs) => write!(f, "({} = {})", lhs, rhs),
            Native::Int(n) => write!(f, "{}", n),
            Native::Str(s) => write!(f, "{}", c_string_literal(s)),
            Native::Scratch(slot) => write!(f, "$loupe_{}", slot),
            Native::Address(name) => write!(f, "((void *) &{})", name),
        }
    }
}

fn global_env() -> Native {
    Native::Global {
        ty: "void *",
        name: "R_GlobalEnv",
    }
}

fn base_env() -> Native {
    Native::Global {
        ty: "void *",
        name: "R_BaseEnv",
    }
}

/// Interpreter state that could fire in the middle of the injected call and has to be switched
/// off around it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafetyFlag {
    InterruptsSuspended,
    GlobalEnvDebug,
    BaseEnvDebug,
    GcEnabled,
}

pub const SAFETY_FLAGS: [SafetyFlag; 4] = [
    SafetyFlag::InterruptsSuspended,
    SafetyFlag::GlobalEnvDebug,
    SafetyFlag::BaseEnvDebug,
    SafetyFlag::GcEnabled,
];

impl SafetyFlag {
    /// Name of the scratch variable holding the saved value.
    pub fn slot(self) -> &'static str {
        match self {
            SafetyFlag::InterruptsSuspended => "interrupts",
            SafetyFlag::GlobalEnvDebug => "debug_global",
            SafetyFlag::BaseEnvDebug => "debug_base",
            SafetyFlag::GcEnabled => "gc",
        }
    }

    fn read(self) -> Native {
        match self {
            SafetyFlag::InterruptsSuspended => Native::Global {
                ty: "int",
                name: "R_interrupts_suspended",
            },
            SafetyFlag::GlobalEnvDebug => Native::Call {
                ret: "int",
                func: "RDEBUG",
                args: vec![global_env()],
            },
            SafetyFlag::BaseEnvDebug => Native::Call {
                ret: "int",
                func: "RDEBUG",
                args: vec![base_env()],
            },
            SafetyFlag::GcEnabled => Native::Global {
                ty: "int",
                name: "R_GCEnabled",
            },
        }
    }

    fn write(self, value: Native) -> Native {
        match self {
            SafetyFlag::InterruptsSuspended | SafetyFlag::GcEnabled => {
                Native::Assign(Box::new(self.read()), Box::new(value))
            }
            SafetyFlag::GlobalEnvDebug => Native::Call {
                ret: "void",
                func: NativeFunction::SetRDebug.name(),
                args: vec![global_env(), value],
            },
            SafetyFlag::BaseEnvDebug => Native::Call {
                ret: "void",
                func: NativeFunction::SetRDebug.name(),
                args: vec![base_env(), value],
            },
        }
    }

    /// The value that keeps the flag out of the way while the injected call runs.
    fn suspended(self) -> i32 {
        match self {
            SafetyFlag::InterruptsSuspended => 1,
            SafetyFlag::GlobalEnvDebug | SafetyFlag::BaseEnvDebug | SafetyFlag::GcEnabled => 0,
        }
    }
}

/// Functions first called after the flags are disabled. A debugger that can't find a symbol
/// abandons the rest of its script, so each one is looked up while nothing has been changed yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeFunction {
    SetRDebug,
    ParseEvalString,
}

pub const NATIVE_FUNCTIONS: [NativeFunction; 2] =
    [NativeFunction::SetRDebug, NativeFunction::ParseEvalString];

impl NativeFunction {
    pub fn name(self) -> &'static str {
        match self {
            NativeFunction::SetRDebug => "SET_RDEBUG",
            NativeFunction::ParseEvalString => "R_ParseEvalString",
        }
    }

    fn slot(self) -> &'static str {
        match self {
            NativeFunction::SetRDebug => "fn_set_rdebug",
            NativeFunction::ParseEvalString => "fn_parse_eval",
        }
    }
}

/// One step of the control script. The sequence is the same for every debugger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Save(SafetyFlag),
    Resolve(NativeFunction),
    Disable(SafetyFlag),
    BindEnvironment,
    Evaluate,
    Restore(SafetyFlag),
}

/// How one debugger spells the handful of operations a control script needs.
pub trait ControlDialect {
    /// Commands that make the session non-interactive.
    fn prologue(&self) -> &'static [&'static str];
    /// Stores `value`, of C type `ty`, in a convenience variable.
    fn save(&self, scratch: &Native, ty: &str, value: &Native) -> String;
    /// Evaluates `expr` in the target for its side effects.
    fn execute(&self, expr: &Native) -> String;
    /// Commands that let the target go and end the session.
    fn epilogue(&self) -> &'static [&'static str];
}

pub struct Gdb;

impl ControlDialect for Gdb {
    fn prologue(&self) -> &'static [&'static str] {
        &["set pagination off", "set confirm off"]
    }

    fn save(&self, scratch: &Native, _ty: &str, value: &Native) -> String {
        format!("set {} = {}", scratch, value)
    }

    fn execute(&self, expr: &Native) -> String {
        format!("call {}", expr)
    }

    fn epilogue(&self) -> &'static [&'static str] {
        &["detach", "quit"]
    }
}

pub struct Lldb;

impl ControlDialect for Lldb {
    fn prologue(&self) -> &'static [&'static str] {
        &["settings set auto-confirm true"]
    }

    fn save(&self, scratch: &Native, ty: &str, value: &Native) -> String {
        format!("expr -- {} {} = {}", ty, scratch, value)
    }

    fn execute(&self, expr: &Native) -> String {
        format!("expr -- {}", expr)
    }

    fn epilogue(&self) -> &'static [&'static str] {
        &["process detach", "quit"]
    }
}

impl Dialect {
    pub fn control(self) -> &'static dyn ControlDialect {
        match self {
            Dialect::Gdb => &Gdb,
            Dialect::Lldb => &Lldb,
        }
    }
}

/// The debugger commands that get the injected script evaluated inside the target.
///
/// There is no error handling in either debugger's script language, so the ordering of the steps
/// is the whole guarantee. Everything that can fail to resolve is touched before the first flag
/// is disabled, and the sourced script runs under `tryCatch` so an R error returns to the
/// debugger instead of unwinding past it. Every flag saved is then restored by the steps after
/// evaluation. If the evaluation crashes the target outright, nothing gets restored.
#[derive(Debug)]
pub struct ControlScript<'a> {
    script: &'a Path,
    environment: EvalEnvironment,
}

const ENV_SLOT: &str = "env";

impl<'a> ControlScript<'a> {
    /// `script` is the injected script's path as the target will see it.
    pub fn new(script: &'a Path, environment: EvalEnvironment) -> Self {
        ControlScript {
            script,
            environment,
        }
    }

    pub fn steps(&self) -> Vec<Step> {
        let mut steps: Vec<Step> = SAFETY_FLAGS.iter().map(|f| Step::Save(*f)).collect();
        steps.extend(NATIVE_FUNCTIONS.iter().map(|f| Step::Resolve(*f)));
        steps.push(Step::BindEnvironment);
        steps.extend(SAFETY_FLAGS.iter().map(|f| Step::Disable(*f)));
        steps.push(Step::Evaluate);
        steps.extend(SAFETY_FLAGS.iter().map(|f| Step::Restore(*f)));
        steps
    }

    pub fn render(&self, dialect: &dyn ControlDialect) -> String {
        let mut lines: Vec<String> = dialect.prologue().iter().map(|s| s.to_string()).collect();
        for step in self.steps() {
            lines.push(self.render_step(&step, dialect));
        }
        lines.extend(dialect.epilogue().iter().map(|s| s.to_string()));
        let mut out = lines.join("\n");
        out.push('\n');
        out
    }

    fn render_step(&self, step: &Step, dialect: &dyn ControlDialect) -> String {
        match *step {
            Step::Save(flag) => dialect.save(&Native::Scratch(flag.slot()), "int", &flag.read()),
            Step::Resolve(func) => {
                dialect.save(&Native::Scratch(func.slot()), "void *", &Native::Address(func.name()))
            }
            Step::Disable(flag) => dialect.execute(&flag.write(Native::Int(flag.suspended()))),
            Step::BindEnvironment => dialect.save(&Native::Scratch(ENV_SLOT), "void *", &global_env()),
            Step::Evaluate => dialect.execute(&self.evaluate_expr()),
            Step::Restore(flag) => dialect.execute(&flag.write(Native::Scratch(flag.slot()))),
        }
    }

    // The R source is itself a C string, so the path is quoted for R first and the result quoted
    // again for C. It is parsed and evaluated in the global environment.
    fn evaluate_expr(&self) -> Native {
        let envir = match self.environment {
            EvalEnvironment::PrivateChild => "new.env(parent = globalenv())",
            EvalEnvironment::Global => "globalenv()",
        };
        let source = format!(
            "tryCatch(sys.source({}, envir = {}), error = function(e) NULL)",
            r_string_literal(&self.script.to_string_lossy()),
            envir
        );
        Native::Call {
            ret: "void *",
            func: NativeFunction::ParseEvalString.name(),
            args: vec![Native::Str(source), Native::Scratch(ENV_SLOT)],
        }
    }
}
