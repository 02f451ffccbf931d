//! External process execution.
//!
//! Every runtime interaction goes through [`Runner::run`], which spawns the
//! process via an [`Executor`], checks the exit code against the accepted set
//! and optionally traces the exchange on the `pstart::trace` target.

use std::borrow::Cow;
use std::io::Write;
use std::process::{Command, ExitStatus, Stdio};
use std::rc::Rc;

use pstart_common::{CommandFailure, PstartError, PstartResult};

use crate::interrupt::Interrupt;

/// Exit codes a caller is prepared to handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitCodes {
    /// Only these codes count as success.
    Only(Vec<i32>),
    /// Any code is accepted; the caller inspects it.
    Any,
}

impl ExitCodes {
    /// Whether `code` is accepted.
    #[must_use]
    pub fn accepts(&self, code: i32) -> bool {
        match self {
            Self::Only(codes) => codes.contains(&code),
            Self::Any => true,
        }
    }
}

impl Default for ExitCodes {
    fn default() -> Self {
        Self::Only(vec![0])
    }
}

/// What the child sees on stdin.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Stdin {
    /// `/dev/null`, so a child that reads stdin gets EOF instead of hanging.
    #[default]
    Null,
    /// Feed these bytes, then close.
    Data(Vec<u8>),
    /// Share the orchestrator's own stdin (interactive commands).
    Inherit,
}

/// Options for a single [`Runner::run`] call.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Accepted exit codes.
    pub accept: ExitCodes,
    /// Child stdin.
    pub stdin: Stdin,
    /// Capture stdout/stderr instead of passing them through.
    pub capture: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            accept: ExitCodes::default(),
            stdin: Stdin::Null,
            capture: true,
        }
    }
}

impl RunOptions {
    /// Accept every exit code.
    #[must_use]
    pub fn accept_any(mut self) -> Self {
        self.accept = ExitCodes::Any;
        self
    }

    /// Accept exactly these exit codes.
    #[must_use]
    pub fn accept(mut self, codes: impl Into<Vec<i32>>) -> Self {
        self.accept = ExitCodes::Only(codes.into());
        self
    }

    /// Feed `data` on stdin.
    #[must_use]
    pub fn input(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.stdin = Stdin::Data(data.into());
        self
    }

    /// Attach the child to the terminal: inherited stdin, uncaptured output.
    #[must_use]
    pub fn interactive(mut self) -> Self {
        self.stdin = Stdin::Inherit;
        self.capture = false;
        self
    }
}

/// Outcome of an external command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunResult {
    /// Captured stdout, empty when not captured.
    pub stdout: Vec<u8>,
    /// Captured stderr, empty when not captured.
    pub stderr: Vec<u8>,
    /// Exit code; `128 + signal` for a signalled child.
    pub exit_code: i32,
}

impl RunResult {
    /// Stdout decoded lossily as UTF-8.
    #[must_use]
    pub fn stdout_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stdout)
    }

    /// Stderr decoded lossily as UTF-8.
    #[must_use]
    pub fn stderr_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stderr)
    }
}

/// Spawns processes and waits for them.
pub trait Executor {
    /// Run `argv` to completion.
    ///
    /// # Errors
    ///
    /// Returns an error only if the process could not be run at all; a
    /// non-zero exit is reported through [`RunResult::exit_code`].
    fn execute(&self, argv: &[String], stdin: &Stdin, capture: bool) -> std::io::Result<RunResult>;
}

/// [`Executor`] backed by [`std::process::Command`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemExecutor;

impl Executor for SystemExecutor {
    fn execute(&self, argv: &[String], stdin: &Stdin, capture: bool) -> std::io::Result<RunResult> {
        let (program, args) = argv.split_first().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command line")
        })?;

        let mut cmd = Command::new(program);
        cmd.args(args).stdin(match stdin {
            Stdin::Null => Stdio::null(),
            Stdin::Data(_) => Stdio::piped(),
            Stdin::Inherit => Stdio::inherit(),
        });
        if capture {
            cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        }

        let mut child = cmd.spawn()?;

        // Feed stdin from a separate thread so a chatty child can't deadlock
        // on a full stdout pipe while we are still writing.
        let output = std::thread::scope(|scope| {
            let writer = match (stdin, child.stdin.take()) {
                (Stdin::Data(data), Some(mut pipe)) => {
                    Some(scope.spawn(move || pipe.write_all(data)))
                }
                _ => None,
            };
            let output = child.wait_with_output()?;
            if let Some(Ok(Err(err))) = writer.map(std::thread::ScopedJoinHandle::join) {
                if err.kind() != std::io::ErrorKind::BrokenPipe {
                    return Err(err);
                }
            }
            Ok(output)
        })?;

        Ok(RunResult {
            stdout: output.stdout,
            stderr: output.stderr,
            exit_code: exit_code(output.status),
        })
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

/// Quote `arg` for display as part of a POSIX shell command line.
#[must_use]
pub fn shell_quote(arg: &str) -> Cow<'_, str> {
    let plain = !arg.is_empty()
        && arg
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"-_./:=@%+,".contains(&b));
    if plain {
        Cow::Borrowed(arg)
    } else {
        Cow::Owned(format!("'{}'", arg.replace('\'', r"'\''")))
    }
}

/// Join `argv` into a copy-pasteable shell command line.
#[must_use]
pub fn shell_join(argv: &[String]) -> String {
    argv.iter()
        .map(|arg| shell_quote(arg))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Runs external commands and enforces their exit codes.
#[derive(Clone)]
pub struct Runner {
    executor: Rc<dyn Executor>,
    trace: bool,
    interrupt: Option<Interrupt>,
}

impl Runner {
    /// Runner over an arbitrary executor.
    #[must_use]
    pub fn new(executor: Rc<dyn Executor>) -> Self {
        Self {
            executor,
            trace: false,
            interrupt: None,
        }
    }

    /// Runner that spawns real processes.
    #[must_use]
    pub fn system() -> Self {
        Self::new(Rc::new(SystemExecutor))
    }

    /// Echo every command, its input and its output on `pstart::trace`.
    #[must_use]
    pub fn with_trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }

    /// Fail with [`PstartError::Interrupted`] when `interrupt` was raised
    /// while a non-interactive command ran.
    #[must_use]
    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = Some(interrupt);
        self
    }

    /// Run `argv` and check its exit code.
    ///
    /// # Errors
    ///
    /// [`PstartError::Spawn`] if the program cannot be started,
    /// [`PstartError::Interrupted`] if a termination signal arrived meanwhile
    /// and [`PstartError::Command`] if it exits with an unaccepted code.
    pub fn run(&self, argv: &[String], options: &RunOptions) -> PstartResult<RunResult> {
        if self.trace {
            tracing::trace!(target: "pstart::trace", "$ {}", shell_join(argv));
            if let Stdin::Data(data) = &options.stdin {
                tracing::trace!(
                    target: "pstart::trace",
                    bytes = data.len(),
                    "stdin:\n{}",
                    String::from_utf8_lossy(data)
                );
            }
        }

        let result = self
            .executor
            .execute(argv, &options.stdin, options.capture)
            .map_err(|source| PstartError::Spawn {
                program: argv.first().cloned().unwrap_or_default(),
                source,
            })?;

        if self.interrupt.as_ref().is_some_and(Interrupt::take) {
            // Ctrl-C inside an interactive command belongs to that command.
            if options.stdin == Stdin::Inherit {
                tracing::debug!(exit_code = result.exit_code, "Signal passed to interactive command");
            } else {
                tracing::warn!(command = %shell_join(argv), "Interrupted");
                return Err(PstartError::Interrupted);
            }
        }

        if self.trace {
            tracing::trace!(
                target: "pstart::trace",
                exit_code = result.exit_code,
                "stdout:\n{}\nstderr:\n{}",
                result.stdout_lossy(),
                result.stderr_lossy()
            );
        }

        if !options.accept.accepts(result.exit_code) {
            let input = match &options.stdin {
                Stdin::Data(data) => Some(data.clone()),
                _ => None,
            };
            return Err(CommandFailure::new(
                argv.to_vec(),
                result.exit_code,
                result.stdout,
                result.stderr,
            )
            .with_input(input)
            .into());
        }

        Ok(result)
    }
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("trace", &self.trace)
            .field("interrupt", &self.interrupt)
            .finish_non_exhaustive()
    }
}
