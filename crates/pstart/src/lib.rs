//! # pstart
//!
//! Boots a throwaway LXD sandbox, runs a command in it and puts the host back
//! the way it was.
//!
//! A run attaches a shared NAT network and launch profile to an existing
//! container, injects the `pstart-init` agent, starts the container and waits
//! for the agent to report readiness. With a command, the command runs
//! interactively and the sandbox is stopped and detached afterwards.
//!
//! ## Usage
//!
//! ```no_run
//! use pstart::cleanup::CleanupRegistry;
//! use pstart::lxc::LxcClient;
//! use pstart::runner::Runner;
//! use pstart::sandbox::{Sandbox, SandboxConfig};
//!
//! # fn example() -> pstart_common::PstartResult<()> {
//! let client = LxcClient::new(Runner::system(), "lxc");
//! let mut cleanups = CleanupRegistry::new();
//! let container = "myhost:box1".parse()?;
//!
//! let command = vec!["echo".to_string(), "hi".to_string()];
//!
//! let mut sandbox = Sandbox::new(&client, &mut cleanups, container, SandboxConfig::default());
//! let code = sandbox.start(Some(command.as_slice()))?;
//! assert_eq!(code, 0);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod agent;
pub mod cleanup;
pub mod cli;
pub mod interrupt;
pub mod lxc;
pub mod provision;
pub mod runner;
pub mod sandbox;

pub use sandbox::{Sandbox, SandboxConfig, SandboxState};
