//! Network and profile provisioning.
//!
//! Both resources follow the same probe-then-create pattern keyed on the
//! container's remote plus the base name. Existence is probed against the
//! runtime on every call, so provisioning is safe to repeat and to run from
//! independent processes. Nothing guards the window between the probe and the
//! create; a concurrent creator makes the second `create` fail, which surfaces
//! as a fatal error.

use pstart_common::paths::{DEFAULT_GATEWAY, NIC_DEVICE_NAME, agent_init_command};
use pstart_common::{ContainerRef, GatewayCidr, PstartError, PstartResult};

use crate::lxc::{LxcClient, NetworkConfig, NicDevice, ProfileConfig};

/// Creates or reuses the sandbox network and profile.
#[derive(Debug, Clone)]
pub struct Provisioner<'a> {
    client: &'a LxcClient,
    default_gateway: GatewayCidr,
}

impl<'a> Provisioner<'a> {
    /// Provisioner creating networks with the stock gateway.
    ///
    /// # Errors
    ///
    /// Never in practice; the stock gateway is a valid CIDR.
    pub fn new(client: &'a LxcClient) -> PstartResult<Self> {
        Ok(Self {
            client,
            default_gateway: GatewayCidr::parse(DEFAULT_GATEWAY)?,
        })
    }

    /// Use `gateway` for networks this provisioner creates.
    #[must_use]
    pub const fn with_gateway(mut self, gateway: GatewayCidr) -> Self {
        self.default_gateway = gateway;
        self
    }

    /// Ensure the NAT network `base` exists on the container's remote.
    ///
    /// An existing network is returned as recorded. A missing one is created
    /// with the default gateway and read back.
    ///
    /// # Errors
    ///
    /// Fatal if an existing network has no `ipv4.address`, if creation fails,
    /// or if the created network cannot be read back.
    pub fn ensure_network(&self, container: &ContainerRef, base: &str) -> PstartResult<NetworkConfig> {
        let name = container.scoped(base);

        if let Some(existing) = self.show_network(&name)? {
            tracing::info!(network = %name, gateway = %existing.gateway, "Reusing network");
            return Ok(existing);
        }

        tracing::info!(network = %name, gateway = %self.default_gateway, "Creating network");
        self.client.network_create(&name, &self.default_gateway, true)?;

        self.show_network(&name)?.ok_or_else(|| {
            PstartError::fatal(format!("Network {name} was created but cannot be read back"))
        })
    }

    fn show_network(&self, name: &str) -> PstartResult<Option<NetworkConfig>> {
        self.client.network_show(name).map_err(|err| match err {
            PstartError::MissingKey { .. } | PstartError::InvalidCidr { .. } => PstartError::Fatal {
                message: format!("Network {name} exists but has no usable ipv4.address: {err}"),
                source: None,
            },
            other => other,
        })
    }

    /// Ensure the launch profile `base` exists on the container's remote.
    ///
    /// A created profile pins the init command to the agent with
    /// `--network=<gateway>` and adds a bridged NIC on the `base` bridge. An
    /// existing profile is returned exactly as recorded, even when it was
    /// created for a different gateway. An existing profile that lacks the
    /// init command or NIC, as left behind when a run dies between
    /// `profile create` and `profile edit`, is rewritten.
    ///
    /// # Errors
    ///
    /// Fatal if creation or configuration fails, or if the profile still does
    /// not carry the expected init command and NIC afterwards.
    pub fn ensure_profile(
        &self,
        container: &ContainerRef,
        base: &str,
        gateway: &GatewayCidr,
    ) -> PstartResult<ProfileConfig> {
        let name = container.scoped(base);
        let wanted_command = agent_init_command(&gateway.to_string());
        let profile = ProfileConfig::new(
            &name,
            wanted_command.clone(),
            NicDevice::bridged(base, NIC_DEVICE_NAME),
        );

        match self.show_profile(&name) {
            Ok(Some(existing)) => {
                if existing.init_command == wanted_command {
                    tracing::info!(profile = %name, "Reusing profile");
                } else {
                    tracing::warn!(
                        profile = %name,
                        recorded = %existing.init_command,
                        wanted = %wanted_command,
                        "Reusing profile with a different init command"
                    );
                }
                return Ok(existing);
            }
            Ok(None) => {
                tracing::info!(profile = %name, init = %wanted_command, "Creating profile");
                self.client.profile_create(&name)?;
            }
            Err(PstartError::MissingKey { key, .. }) => {
                tracing::warn!(profile = %name, missing = %key, "Rewriting incomplete profile");
            }
            Err(err) => return Err(err),
        }

        self.client.profile_edit(&name, &profile.to_document())?;

        self.show_profile(&name)?.ok_or_else(|| {
            PstartError::fatal(format!("Profile {name} was created but cannot be read back"))
        })
    }

    fn show_profile(&self, name: &str) -> PstartResult<Option<ProfileConfig>> {
        self.client
            .profile_show(name)?
            .map(|doc| ProfileConfig::from_document(name, NIC_DEVICE_NAME, &doc))
            .transpose()
    }
}
