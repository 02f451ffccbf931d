//! Typed views of `lxc` output.
//!
//! Each adapter pulls out only the keys pstart relies on and fails with
//! [`PstartError::MissingKey`] as soon as one is absent, instead of letting a
//! missing key surface later as a lookup error.

use std::collections::BTreeMap;
use std::fmt;

use pstart_common::{GatewayCidr, PstartError, PstartResult};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;

const IPV4_ADDRESS: &str = "ipv4.address";
const IPV4_NAT: &str = "ipv4.nat";
const RAW_LXC: &str = "raw.lxc";
const INIT_CMD: &str = "lxc.init.cmd";

fn missing(what: impl Into<String>, key: &str) -> PstartError {
    PstartError::MissingKey {
        what: what.into(),
        key: key.to_string(),
    }
}

/// Render a YAML scalar the way `lxc` would have written it on the CLI.
fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// A managed network as reported by `lxc network show`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkConfig {
    /// Runtime-scoped network name.
    pub name: String,
    /// Gateway address and prefix (`ipv4.address`).
    pub gateway: GatewayCidr,
    /// Whether outbound NAT is enabled (`ipv4.nat`).
    pub nat_enabled: bool,
    /// Every config key, as recorded by the runtime.
    pub config: BTreeMap<String, String>,
}

impl NetworkConfig {
    /// Decode `lxc network show` output for the network called `name`.
    ///
    /// # Errors
    ///
    /// Fails if `config` or `config."ipv4.address"` is absent, or the address
    /// is not valid CIDR notation.
    pub fn from_yaml(name: &str, doc: &Value) -> PstartResult<Self> {
        let what = || format!("network {name}");
        let config = doc
            .get("config")
            .and_then(Value::as_mapping)
            .ok_or_else(|| missing(what(), "config"))?;

        let config: BTreeMap<String, String> = config
            .iter()
            .filter_map(|(k, v)| Some((k.as_str()?.to_string(), scalar(v)?)))
            .collect();

        let gateway = config
            .get(IPV4_ADDRESS)
            .ok_or_else(|| missing(what(), IPV4_ADDRESS))?;
        let gateway = GatewayCidr::parse(gateway)?;
        let nat_enabled = config.get(IPV4_NAT).is_some_and(|v| v == "true");

        Ok(Self {
            name: name.to_string(),
            gateway,
            nat_enabled,
            config,
        })
    }
}

/// A bridged NIC device entry in a profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NicDevice {
    /// Device type, always `nic` for profiles pstart writes.
    pub kind: String,
    /// NIC flavour, `bridged`.
    pub nictype: String,
    /// Host bridge the NIC plugs into.
    pub parent: String,
    /// Interface name inside the container.
    pub name: String,
}

impl NicDevice {
    /// A bridged NIC named `name` on the bridge `parent`.
    #[must_use]
    pub fn bridged(parent: &str, name: &str) -> Self {
        Self {
            kind: "nic".to_string(),
            nictype: "bridged".to_string(),
            parent: parent.to_string(),
            name: name.to_string(),
        }
    }

    fn to_entry(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("type".to_string(), self.kind.clone()),
            ("nictype".to_string(), self.nictype.clone()),
            ("parent".to_string(), self.parent.clone()),
            ("name".to_string(), self.name.clone()),
        ])
    }

    fn from_entry(what: &str, entry: &BTreeMap<String, String>) -> PstartResult<Self> {
        let get = |key: &str| {
            entry
                .get(key)
                .cloned()
                .ok_or_else(|| missing(what.to_string(), key))
        };
        Ok(Self {
            kind: get("type")?,
            nictype: entry.get("nictype").cloned().unwrap_or_default(),
            parent: get("parent")?,
            name: get("name")?,
        })
    }
}

/// Profile body as exchanged with `lxc profile show` / `lxc profile edit`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileDocument {
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Profile config keys.
    #[serde(default)]
    pub config: BTreeMap<String, String>,
    /// Devices keyed by device name.
    #[serde(default)]
    pub devices: BTreeMap<String, BTreeMap<String, String>>,
}

/// A sandbox launch profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileConfig {
    /// Runtime-scoped profile name.
    pub name: String,
    /// Init command the profile pins for the container.
    pub init_command: String,
    /// The network device the profile adds.
    pub nic: NicDevice,
}

impl ProfileConfig {
    /// Profile that boots the container into `init_command` with `nic`.
    #[must_use]
    pub fn new(name: &str, init_command: String, nic: NicDevice) -> Self {
        Self {
            name: name.to_string(),
            init_command,
            nic,
        }
    }

    /// Body to hand to `lxc profile edit`.
    #[must_use]
    pub fn to_document(&self) -> ProfileDocument {
        ProfileDocument {
            description: "pstart sandbox profile".to_string(),
            config: BTreeMap::from([(
                RAW_LXC.to_string(),
                format!("{INIT_CMD} = {}", self.init_command),
            )]),
            devices: BTreeMap::from([(self.nic.name.clone(), self.nic.to_entry())]),
        }
    }

    /// Decode a profile called `name` whose NIC is the device `device`.
    ///
    /// # Errors
    ///
    /// Fails if the profile does not pin an init command through `raw.lxc` or
    /// lacks the NIC device.
    pub fn from_document(name: &str, device: &str, doc: &ProfileDocument) -> PstartResult<Self> {
        let what = format!("profile {name}");
        let raw = doc
            .config
            .get(RAW_LXC)
            .ok_or_else(|| missing(what.clone(), RAW_LXC))?;
        let init_command = raw
            .lines()
            .filter_map(|line| line.split_once('='))
            .find(|(key, _)| key.trim() == INIT_CMD)
            .map(|(_, value)| value.trim().to_string())
            .ok_or_else(|| missing(what.clone(), &format!("{RAW_LXC}: {INIT_CMD}")))?;
        let entry = doc
            .devices
            .get(device)
            .ok_or_else(|| missing(what.clone(), &format!("devices.{device}")))?;

        Ok(Self {
            name: name.to_string(),
            init_command,
            nic: NicDevice::from_entry(&what, entry)?,
        })
    }
}

/// The parts of `lxc config show <instance>` pstart needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceConfig {
    /// Profiles applied to the instance, in order.
    pub profiles: Vec<String>,
}

impl InstanceConfig {
    /// Decode `lxc config show` output.
    ///
    /// # Errors
    ///
    /// Fails if the top-level `profiles` sequence is absent.
    pub fn from_yaml(instance: &str, doc: &Value) -> PstartResult<Self> {
        let profiles = doc
            .get("profiles")
            .and_then(Value::as_sequence)
            .ok_or_else(|| missing(format!("instance {instance}"), "profiles"))?
            .iter()
            .filter_map(|p| p.as_str().map(str::to_string))
            .collect();
        Ok(Self { profiles })
    }

    /// Whether `profile` is applied.
    #[must_use]
    pub fn has_profile(&self, profile: &str) -> bool {
        self.profiles.iter().any(|p| p == profile)
    }
}

/// Run state of an instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceStatus {
    /// Running.
    Running,
    /// Stopped.
    Stopped,
    /// Frozen (paused).
    Frozen,
    /// Anything else the runtime reports.
    Other(String),
}

impl InstanceStatus {
    fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "running" => Self::Running,
            "stopped" => Self::Stopped,
            "frozen" => Self::Frozen,
            _ => Self::Other(s.trim().to_string()),
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::Frozen => write!(f, "frozen"),
            Self::Other(s) => write!(f, "{s}"),
        }
    }
}

/// The parts of `lxc info <instance>` pstart needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceInfo {
    /// Current run state.
    pub status: InstanceStatus,
}

impl InstanceInfo {
    /// Decode `lxc info` output.
    ///
    /// The output is line-oriented `Key: value` text that is not always valid
    /// YAML (resource sections), so only top-level lines are inspected.
    ///
    /// # Errors
    ///
    /// Fails if there is no top-level `Status:` line.
    pub fn parse(instance: &str, text: &str) -> PstartResult<Self> {
        let status = text
            .lines()
            .filter(|line| !line.starts_with(char::is_whitespace))
            .filter_map(|line| line.split_once(':'))
            .find(|(key, _)| key.eq_ignore_ascii_case("status"))
            .map(|(_, value)| InstanceStatus::parse(value))
            .ok_or_else(|| missing(format!("instance {instance}"), "Status"))?;
        Ok(Self { status })
    }
}
