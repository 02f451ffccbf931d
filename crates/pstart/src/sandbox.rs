//! Sandbox lifecycle.
//!
//! [`Sandbox`] walks a container through the provisioning state machine:
//!
//! ```text
//! Probed -> NetworkReady -> ProfileReady -> ProfileAttached -> AgentInjected
//!        -> Started -> AgentReady [-> CommandRan] -> Stopped -> Cleaned
//! ```
//!
//! Every step that changes the container registers a rollback in the
//! [`CleanupRegistry`] before moving on. If a later step fails, the error
//! propagates and the registry's drain undoes what this run did; there is no
//! other rollback path.

use std::fmt;
use std::path::PathBuf;

use pstart_common::paths::{AGENT_GUEST_PATH, DEFAULT_BASE_NAME, resolve_agent_path};
use pstart_common::{ContainerRef, GatewayCidr, PstartResult};

use crate::agent::{self, AgentPayload};
use crate::cleanup::CleanupRegistry;
use crate::lxc::{InstanceStatus, LxcClient};
use crate::provision::Provisioner;

/// Sandbox settings.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Name of the network and profile on the container's remote.
    pub base_name: String,
    /// Host path of the init agent binary.
    pub agent_path: PathBuf,
    /// Gateway for networks created by this run; the stock gateway if unset.
    pub gateway: Option<GatewayCidr>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            base_name: DEFAULT_BASE_NAME.to_string(),
            agent_path: resolve_agent_path(),
            gateway: None,
        }
    }
}

impl SandboxConfig {
    /// Set the base name.
    #[must_use]
    pub fn with_base_name(mut self, base_name: impl Into<String>) -> Self {
        self.base_name = base_name.into();
        self
    }

    /// Set the agent location.
    #[must_use]
    pub fn with_agent_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.agent_path = path.into();
        self
    }

    /// Set the gateway for new networks.
    #[must_use]
    pub const fn with_gateway(mut self, gateway: GatewayCidr) -> Self {
        self.gateway = Some(gateway);
        self
    }
}

/// States of the sandbox lifecycle, in forward order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SandboxState {
    /// The container is known to exist.
    Probed,
    /// The sandbox network exists.
    NetworkReady,
    /// The launch profile exists.
    ProfileReady,
    /// The profile is applied to the container.
    ProfileAttached,
    /// The init agent is in place.
    AgentInjected,
    /// The container is running.
    Started,
    /// The agent reported readiness.
    AgentReady,
    /// The caller's command finished.
    CommandRan,
    /// The container is stopped.
    Stopped,
    /// The profile is detached.
    Cleaned,
}

impl fmt::Display for SandboxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Probed => write!(f, "probed"),
            Self::NetworkReady => write!(f, "network-ready"),
            Self::ProfileReady => write!(f, "profile-ready"),
            Self::ProfileAttached => write!(f, "profile-attached"),
            Self::AgentInjected => write!(f, "agent-injected"),
            Self::Started => write!(f, "started"),
            Self::AgentReady => write!(f, "agent-ready"),
            Self::CommandRan => write!(f, "command-ran"),
            Self::Stopped => write!(f, "stopped"),
            Self::Cleaned => write!(f, "cleaned"),
        }
    }
}

/// Stop `container` unless it is already stopped. Returns whether it stopped it.
fn stop_if_running(client: &LxcClient, container: &ContainerRef) -> PstartResult<bool> {
    let info = client.info(container)?;
    if info.status == InstanceStatus::Stopped {
        tracing::debug!(container = %container, "Already stopped");
        return Ok(false);
    }
    client.stop(container)?;
    Ok(true)
}

/// Remove `profile` from `container` if applied. Returns whether it removed it.
fn detach_profile(client: &LxcClient, container: &ContainerRef, profile: &str) -> PstartResult<bool> {
    if !client.instance_config(container)?.has_profile(profile) {
        tracing::debug!(container = %container, profile, "Profile not attached");
        return Ok(false);
    }
    client.profile_remove(container, profile)?;
    Ok(true)
}

/// Drives one container through the sandbox lifecycle.
pub struct Sandbox<'a> {
    client: &'a LxcClient,
    cleanups: &'a mut CleanupRegistry,
    container: ContainerRef,
    config: SandboxConfig,
    states: Vec<SandboxState>,
}

impl<'a> Sandbox<'a> {
    /// Sandbox plumbing for `container`, registering rollbacks in `cleanups`.
    pub fn new(
        client: &'a LxcClient,
        cleanups: &'a mut CleanupRegistry,
        container: ContainerRef,
        config: SandboxConfig,
    ) -> Self {
        Self {
            client,
            cleanups,
            container,
            config,
            states: Vec::new(),
        }
    }

    /// States reached so far, in order.
    #[must_use]
    pub fn states(&self) -> &[SandboxState] {
        &self.states
    }

    fn enter(&mut self, state: SandboxState) {
        tracing::info!(container = %self.container, %state, "Sandbox state");
        self.states.push(state);
    }

    fn cleanup_key(&self) -> String {
        format!("sandbox:{}", self.container)
    }

    /// Provision and boot the sandbox, then optionally run `command` in it.
    ///
    /// Without a command the sandbox is left running with the profile attached
    /// and `0` is returned. With a command, the sandbox is stopped and cleaned
    /// afterwards and the command's exit code is returned.
    ///
    /// # Errors
    ///
    /// Any failed step before the command aborts the run. Rollbacks for what
    /// this run changed stay queued in the cleanup registry.
    pub fn start(&mut self, command: Option<&[String]>) -> PstartResult<i32> {
        let info = self.client.info(&self.container)?;
        self.enter(SandboxState::Probed);

        let payload = AgentPayload::load(&self.config.agent_path)?;
        let base = self.config.base_name.clone();

        let mut provisioner = Provisioner::new(self.client)?;
        if let Some(gateway) = self.config.gateway {
            provisioner = provisioner.with_gateway(gateway);
        }
        let network = provisioner.ensure_network(&self.container, &base)?;
        self.enter(SandboxState::NetworkReady);

        provisioner.ensure_profile(&self.container, &base, &network.gateway)?;
        self.enter(SandboxState::ProfileReady);

        let attached_here = self.attach_profile(&base)?;
        self.enter(SandboxState::ProfileAttached);

        agent::inject(self.client, &self.container, &payload)?;
        self.enter(SandboxState::AgentInjected);

        if info.status == InstanceStatus::Running {
            tracing::info!(container = %self.container, "Already running, not starting");
        } else {
            self.client.start(&self.container)?;
            self.arm_teardown(&base, attached_here);
        }
        self.enter(SandboxState::Started);

        self.client.exec_checked(
            &self.container,
            &[AGENT_GUEST_PATH, "wait"],
            format!("Init agent in {} did not become ready", self.container),
        )?;
        self.enter(SandboxState::AgentReady);

        let Some(command) = command else {
            self.disarm()?;
            return Ok(0);
        };

        tracing::info!(container = %self.container, ?command, "Running command");
        let code = self.client.exec_interactive(&self.container, command)?;
        self.enter(SandboxState::CommandRan);
        tracing::info!(container = %self.container, exit_code = code, "Command finished");

        self.stop()?;
        self.disarm()?;
        Ok(code)
    }

    /// Stop the sandbox and detach its profile.
    ///
    /// # Errors
    ///
    /// Fatal if the container is missing or either step fails.
    pub fn stop(&mut self) -> PstartResult<()> {
        stop_if_running(self.client, &self.container)?;
        self.enter(SandboxState::Stopped);
        self.clean()
    }

    /// Detach the sandbox profile, if attached.
    ///
    /// # Errors
    ///
    /// Fatal if the container configuration cannot be read or the detach fails.
    pub fn clean(&mut self) -> PstartResult<()> {
        let base = self.config.base_name.clone();
        if detach_profile(self.client, &self.container, &base)? {
            tracing::info!(container = %self.container, profile = %base, "Profile detached");
        }
        self.enter(SandboxState::Cleaned);
        Ok(())
    }

    /// Apply the profile unless already applied. Returns whether it applied it.
    fn attach_profile(&mut self, base: &str) -> PstartResult<bool> {
        if self.client.instance_config(&self.container)?.has_profile(base) {
            tracing::info!(container = %self.container, profile = base, "Profile already attached");
            return Ok(false);
        }

        self.client.profile_add(&self.container, base)?;
        self.cleanups.register_with(
            self.cleanup_key(),
            (self.client.clone(), self.container.clone(), base.to_string()),
            |(client, container, profile)| detach_profile(&client, &container, &profile).map(drop),
        );
        Ok(true)
    }

    /// Replace the pending rollback with stop-then-detach once the container runs.
    fn arm_teardown(&mut self, base: &str, detach: bool) {
        self.cleanups.register_with(
            self.cleanup_key(),
            (self.client.clone(), self.container.clone(), base.to_string()),
            move |(client, container, profile)| {
                stop_if_running(&client, &container)?;
                if detach {
                    detach_profile(&client, &container, &profile)?;
                }
                Ok(())
            },
        );
    }

    /// Drop the pending rollback; what this run did is meant to stay.
    fn disarm(&mut self) -> PstartResult<()> {
        let key = self.cleanup_key();
        if self.cleanups.contains(&key) {
            self.cleanups.unregister(&key)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Sandbox<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sandbox")
            .field("container", &self.container)
            .field("config", &self.config)
            .field("states", &self.states)
            .finish_non_exhaustive()
    }
}
