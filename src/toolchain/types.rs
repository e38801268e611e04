use crate::config::Target;
use crate::unit::BuildUnit;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// A fully-formed subprocess call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    /// Working directory, or inherit when `None`.
    pub cwd: Option<PathBuf>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Shell-style rendering for log lines.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(|a| {
                if a.contains(' ') {
                    format!("\"{a}\"")
                } else {
                    a.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// How a finished subprocess is classified. Only `Success` counts as a pass;
/// a timeout is a failure that is never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    Success,
    Failed(i32),
    TimedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub stream: Stream,
    pub text: String,
}

/// Everything a subprocess printed, in arrival order, plus how it ended.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub exit: ExitKind,
    pub lines: Vec<OutputLine>,
    pub elapsed: Duration,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.exit == ExitKind::Success
    }

    /// Both streams interleaved, newline-joined.
    pub fn log(&self) -> String {
        self.lines
            .iter()
            .map(|l| l.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn stdout(&self) -> String {
        self.lines
            .iter()
            .filter(|l| l.stream == Stream::Stdout)
            .map(|l| l.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Synthetic output, for fakes and skipped steps.
    pub fn synthetic(exit: ExitKind, text: &str) -> Self {
        Self {
            exit,
            lines: text
                .lines()
                .map(|l| OutputLine {
                    stream: Stream::Stdout,
                    text: l.to_string(),
                })
                .collect(),
            elapsed: Duration::ZERO,
        }
    }
}

/// Which role a compile plays in the two-stage sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// First build for a board: keep library objects for reuse.
    Seed,
    /// Later builds: reuse the seeded objects with shallow dependency resolution.
    Batch,
    /// No artifact reuse.
    Standalone,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Seed => write!(f, "seed"),
            Stage::Batch => write!(f, "batch"),
            Stage::Standalone => write!(f, "standalone"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct InitRequest<'a> {
    pub target: &'a Target,
    pub build_dir: &'a Path,
    pub defines: &'a [String],
    pub build_flags: &'a [String],
    pub extra_packages: &'a [String],
    pub extra_scripts: &'a [PathBuf],
    pub customsdk: Option<&'a str>,
    pub no_install_deps: bool,
}

#[derive(Debug, Clone)]
pub struct CompileRequest<'a> {
    pub target: &'a Target,
    pub unit: &'a BuildUnit,
    pub build_dir: &'a Path,
    pub libs: &'a [PathBuf],
    pub stage: Stage,
    /// Ask the toolchain for its most detailed output.
    pub verbose: bool,
}

impl CompileRequest<'_> {
    pub fn verbose(&self) -> Self {
        Self {
            verbose: true,
            ..self.clone()
        }
    }
}
