//! Gateway address parsing.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{PstartError, PstartResult};

/// A host address with prefix length, e.g. `10.3.23.1/24`.
///
/// This is the form LXD uses for a managed network's `ipv4.address`: the
/// gateway's own address inside the subnet it serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GatewayCidr {
    addr: IpAddr,
    prefix: u8,
}

impl GatewayCidr {
    /// Create from parts.
    ///
    /// # Errors
    ///
    /// Returns an error if `prefix` is too long for the address family.
    pub fn new(addr: IpAddr, prefix: u8) -> PstartResult<Self> {
        let max = if addr.is_ipv4() { 32 } else { 128 };
        if prefix > max {
            return Err(PstartError::InvalidCidr {
                value: format!("{addr}/{prefix}"),
            });
        }
        Ok(Self { addr, prefix })
    }

    /// Gateway address.
    #[must_use]
    pub const fn addr(&self) -> IpAddr {
        self.addr
    }

    /// Prefix length.
    #[must_use]
    pub const fn prefix(&self) -> u8 {
        self.prefix
    }

    /// Parse `addr/prefix`.
    ///
    /// # Errors
    ///
    /// Returns an error if either half is malformed.
    pub fn parse(s: &str) -> PstartResult<Self> {
        let invalid = || PstartError::InvalidCidr {
            value: s.to_string(),
        };
        let (addr, prefix) = s.trim().split_once('/').ok_or_else(invalid)?;
        let addr: IpAddr = addr.parse().map_err(|_| invalid())?;
        let prefix: u8 = prefix.parse().map_err(|_| invalid())?;
        Self::new(addr, prefix).map_err(|_| invalid())
    }
}

impl fmt::Display for GatewayCidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix)
    }
}

impl FromStr for GatewayCidr {
    type Err = PstartError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for GatewayCidr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for GatewayCidr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}
