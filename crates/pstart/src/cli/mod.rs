//! CLI definitions and the run context.

use std::path::PathBuf;

use clap::{ArgAction, ArgGroup, Parser};
use color_eyre::eyre::Result;
use pstart_common::paths::DEFAULT_BASE_NAME;
use pstart_common::{ContainerRef, PstartResult};

use crate::cleanup::CleanupRegistry;
use crate::interrupt::Interrupt;
use crate::lxc::LxcClient;
use crate::runner::Runner;
use crate::sandbox::{Sandbox, SandboxConfig};

/// What a run does to the sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Provision, boot and optionally run a command.
    Start,
    /// Stop and detach.
    Stop,
    /// Detach only.
    Clean,
}

/// pstart - throwaway LXD sandboxes
#[derive(Parser, Debug)]
#[command(name = "pstart")]
#[command(author, version, about, long_about = None)]
#[command(group(ArgGroup::new("mode").args(["start", "stop", "clean"])))]
pub struct Cli {
    /// Provision and boot the sandbox (default)
    #[arg(long)]
    pub start: bool,

    /// Stop the sandbox and detach its profile
    #[arg(long)]
    pub stop: bool,

    /// Detach the sandbox profile
    #[arg(long)]
    pub clean: bool,

    /// Name of the sandbox network and profile
    #[arg(short, long, env = "PSTART_BASE_NAME", default_value = DEFAULT_BASE_NAME)]
    pub base_name: String,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Trace every lxc invocation with its input and output
    #[arg(long)]
    pub dump: bool,

    /// lxc binary to invoke
    #[arg(long, env = "PSTART_LXC", default_value = "lxc")]
    pub lxc: String,

    /// Path to the init agent binary
    #[arg(long, env = "PSTART_AGENT")]
    pub agent: Option<PathBuf>,

    /// Container as remote:name or name
    pub container: ContainerRef,

    /// Command to run in the sandbox (start mode only)
    #[arg(
        trailing_var_arg = true,
        allow_hyphen_values = true,
        conflicts_with_all = ["stop", "clean"]
    )]
    pub command: Vec<String>,
}

impl Cli {
    /// Selected mode; `start` unless `--stop` or `--clean` was given.
    #[must_use]
    pub const fn mode(&self) -> Mode {
        if self.stop {
            Mode::Stop
        } else if self.clean {
            Mode::Clean
        } else {
            Mode::Start
        }
    }

    /// Log filter directive for the `-v` count.
    #[must_use]
    pub const fn log_directive(&self) -> &'static str {
        match self.verbose {
            0 => "pstart=error",
            1 => "pstart=info",
            _ => "pstart=debug",
        }
    }

    /// Sandbox settings from the parsed flags.
    #[must_use]
    pub fn sandbox_config(&self) -> SandboxConfig {
        let config = SandboxConfig::default().with_base_name(&self.base_name);
        match &self.agent {
            Some(agent) => config.with_agent_path(agent),
            None => config,
        }
    }

    /// Run the selected mode against `client`.
    ///
    /// Rollbacks go to `cleanups`; the caller decides when they drain.
    ///
    /// # Errors
    ///
    /// Whatever the sandbox step that failed reports.
    pub fn run(&self, client: &LxcClient, cleanups: &mut CleanupRegistry) -> PstartResult<i32> {
        let mut sandbox = Sandbox::new(client, cleanups, self.container.clone(), self.sandbox_config());
        match self.mode() {
            Mode::Start => {
                let command = (!self.command.is_empty()).then_some(self.command.as_slice());
                sandbox.start(command)
            }
            Mode::Stop => sandbox.stop().map(|()| 0),
            Mode::Clean => sandbox.clean().map(|()| 0),
        }
    }

    /// Execute the CLI command and return the process exit code.
    ///
    /// The cleanup registry lives for this call only, so pending rollbacks
    /// have drained by the time an error reaches the caller. Termination
    /// signals surface as [`pstart_common::PstartError::Interrupted`] after
    /// that drain.
    pub fn execute(self) -> Result<i32> {
        let interrupt = Interrupt::new();
        interrupt.install()?;

        let runner = Runner::system()
            .with_trace(self.dump)
            .with_interrupt(interrupt);
        let client = LxcClient::new(runner, self.lxc.clone());
        let mut cleanups = CleanupRegistry::new();

        tracing::debug!(container = %self.container, mode = ?self.mode(), lxc = %self.lxc, "Starting run");
        let code = self.run(&client, &mut cleanups)?;
        Ok(code)
    }
}
