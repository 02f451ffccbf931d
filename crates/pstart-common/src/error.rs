//! Error types shared by every pstart component.

use std::fmt;
use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias using [`PstartError`].
pub type PstartResult<T> = Result<T, PstartError>;

/// An external process exited with an exit code the caller did not accept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFailure {
    /// Full argument vector, program first.
    pub argv: Vec<String>,
    /// Exit code reported by the process.
    pub exit_code: i32,
    /// Captured standard output (empty when not captured).
    pub stdout: Vec<u8>,
    /// Captured standard error (empty when not captured).
    pub stderr: Vec<u8>,
    /// Data written to the child's stdin, if any.
    pub input: Option<Vec<u8>>,
    /// Human description of what was being attempted.
    pub description: String,
}

impl CommandFailure {
    /// Describe a failed invocation.
    #[must_use]
    pub fn new(argv: Vec<String>, exit_code: i32, stdout: Vec<u8>, stderr: Vec<u8>) -> Self {
        let description = format!(
            "`{}` exited with code {exit_code}",
            argv.first().map_or("<empty>", String::as_str)
        );
        Self {
            argv,
            exit_code,
            stdout,
            stderr,
            input: None,
            description,
        }
    }

    /// Record the stdin payload that was sent.
    #[must_use]
    pub fn with_input(mut self, input: Option<Vec<u8>>) -> Self {
        self.input = input;
        self
    }
}

impl fmt::Display for CommandFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.description)?;
        writeln!(f, "  command: {}", self.argv.join(" "))?;
        writeln!(f, "  exit code: {}", self.exit_code)?;
        if let Some(input) = &self.input {
            writeln!(f, "  input: {}", String::from_utf8_lossy(input).trim_end())?;
        }
        writeln!(f, "  stdout: {}", String::from_utf8_lossy(&self.stdout).trim_end())?;
        write!(f, "  stderr: {}", String::from_utf8_lossy(&self.stderr).trim_end())
    }
}

impl std::error::Error for CommandFailure {}

/// Errors raised while provisioning and driving a sandbox.
#[derive(Error, Diagnostic, Debug)]
pub enum PstartError {
    /// An external command exited with an unexpected code.
    #[error("{0}")]
    #[diagnostic(code(pstart::command::failed))]
    Command(Box<CommandFailure>),

    /// An external program could not be started at all.
    #[error("Failed to execute {program}: {source}")]
    #[diagnostic(
        code(pstart::command::spawn),
        help("Check that the program is installed and on PATH")
    )]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Underlying OS error.
        source: std::io::Error,
    },

    /// Unrecoverable condition with a user-facing explanation.
    #[error("{message}")]
    #[diagnostic(code(pstart::fatal))]
    Fatal {
        /// What went wrong, in user terms.
        message: String,
        /// The command failure that triggered this, if any.
        #[source]
        source: Option<Box<CommandFailure>>,
    },

    /// The target container does not exist on the remote.
    #[error("Container not found: {container}")]
    #[diagnostic(
        code(pstart::container::not_found),
        help("pstart never creates containers; launch one first with `lxc init`")
    )]
    ContainerNotFound {
        /// Container address as given.
        container: String,
    },

    /// The init agent binary is not installed next to pstart.
    #[error("Init agent not found at {}", path.display())]
    #[diagnostic(
        code(pstart::agent::missing),
        help("Install pstart-init alongside the pstart binary or set PSTART_AGENT")
    )]
    AgentMissing {
        /// Where the agent was expected.
        path: PathBuf,
    },

    /// Runtime output did not contain a key this tool relies on.
    #[error("{what} is missing the `{key}` key")]
    #[diagnostic(code(pstart::runtime::schema))]
    MissingKey {
        /// Which object was being decoded.
        what: String,
        /// The absent key.
        key: String,
    },

    /// Structured runtime output could not be decoded.
    #[error("Failed to decode runtime output: {0}")]
    #[diagnostic(code(pstart::runtime::decode))]
    Decode(String),

    /// Invalid `remote:name` container address.
    #[error("Invalid container reference: {value}")]
    #[diagnostic(
        code(pstart::container::invalid_ref),
        help("Use `name` or `remote:name`")
    )]
    InvalidContainerRef {
        /// The rejected input.
        value: String,
    },

    /// Invalid CIDR notation.
    #[error("Invalid CIDR: {value}")]
    #[diagnostic(code(pstart::network::invalid_cidr), help("Use a form like 10.3.23.1/24"))]
    InvalidCidr {
        /// The rejected input.
        value: String,
    },

    /// A cleanup was unregistered that was never registered.
    #[error("No cleanup registered under `{name}`")]
    #[diagnostic(code(pstart::cleanup::not_found))]
    CleanupNotFound {
        /// The requested cleanup name.
        name: String,
    },

    /// The run was interrupted by SIGINT, SIGTERM or SIGHUP.
    #[error("Interrupted")]
    #[diagnostic(code(pstart::interrupted))]
    Interrupted,
}

impl PstartError {
    /// Build a fatal error without an underlying command failure.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal {
            message: message.into(),
            source: None,
        }
    }
}

impl From<CommandFailure> for PstartError {
    fn from(failure: CommandFailure) -> Self {
        Self::Command(Box::new(failure))
    }
}

impl From<serde_yaml::Error> for PstartError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

impl From<serde_json::Error> for PstartError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

/// Attach a user-facing message to command failures.
pub trait FatalContext<T> {
    /// Turn a [`PstartError::Command`] into [`PstartError::Fatal`] carrying `message`.
    ///
    /// Other error kinds pass through untouched.
    fn or_fatal(self, message: impl FnOnce() -> String) -> PstartResult<T>;
}

impl<T> FatalContext<T> for PstartResult<T> {
    fn or_fatal(self, message: impl FnOnce() -> String) -> PstartResult<T> {
        self.map_err(|err| match err {
            PstartError::Command(failure) => PstartError::Fatal {
                message: message(),
                source: Some(failure),
            },
            other => other,
        })
    }
}
