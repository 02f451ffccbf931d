//! Fixed locations and defaults.

use std::path::PathBuf;

use once_cell::sync::Lazy;

/// Base name used for the network and profile when none is given.
pub const DEFAULT_BASE_NAME: &str = "pstart0";

/// Gateway assigned to newly created sandbox networks.
pub const DEFAULT_GATEWAY: &str = "10.3.23.1/24";

/// File name of the init agent binary on the host.
pub const AGENT_BINARY_NAME: &str = "pstart-init";

/// Where the init agent lives inside the container.
pub const AGENT_GUEST_PATH: &str = "/sbin/pstart-init";

/// Mode of the injected agent (owner read/write/execute only).
pub const AGENT_GUEST_MODE: u32 = 0o700;

/// Name of the NIC device the profile adds.
pub const NIC_DEVICE_NAME: &str = "eth0";

/// Agent location override taken from the environment.
pub static PSTART_AGENT: Lazy<Option<PathBuf>> =
    Lazy::new(|| std::env::var_os("PSTART_AGENT").map(PathBuf::from));

/// Resolve the host-side agent binary.
///
/// `$PSTART_AGENT` wins; otherwise the agent is expected next to the running
/// executable.
#[must_use]
pub fn resolve_agent_path() -> PathBuf {
    if let Some(path) = PSTART_AGENT.as_ref() {
        return path.clone();
    }
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(AGENT_BINARY_NAME)))
        .unwrap_or_else(|| PathBuf::from(AGENT_BINARY_NAME))
}

/// Init command a sandbox profile pins for the given gateway.
#[must_use]
pub fn agent_init_command(gateway: &str) -> String {
    format!("{AGENT_GUEST_PATH} --network={gateway}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_command_references_agent() {
        assert_eq!(
            agent_init_command(DEFAULT_GATEWAY),
            "/sbin/pstart-init --network=10.3.23.1/24"
        );
    }

    #[test]
    fn agent_path_is_file_named_after_agent() {
        let path = resolve_agent_path();
        if PSTART_AGENT.is_none() {
            assert_eq!(path.file_name().unwrap(), AGENT_BINARY_NAME);
        }
    }
}
