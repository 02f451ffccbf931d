//! Container addressing.

use std::fmt;
use std::str::FromStr;

use crate::error::{PstartError, PstartResult};

/// A container on a (possibly implicit) runtime remote.
///
/// Parsed from `remote:name` or a bare `name`. An empty remote means the
/// runtime's default remote.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerRef {
    remote: String,
    name: String,
}

impl ContainerRef {
    /// Create a reference from its parts, validating the name.
    ///
    /// # Errors
    ///
    /// Returns an error if `name` is empty or either part contains `:`.
    pub fn new(remote: impl Into<String>, name: impl Into<String>) -> PstartResult<Self> {
        let remote = remote.into();
        let name = name.into();
        if name.is_empty() || name.contains(':') || remote.contains(':') {
            return Err(PstartError::InvalidContainerRef {
                value: format!("{remote}:{name}"),
            });
        }
        Ok(Self { remote, name })
    }

    /// Remote part, empty for the default remote.
    #[must_use]
    pub fn remote(&self) -> &str {
        &self.remote
    }

    /// Container name on its remote.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Prefix that scopes a runtime object to this container's remote.
    #[must_use]
    pub fn remote_prefix(&self) -> String {
        if self.remote.is_empty() {
            String::new()
        } else {
            format!("{}:", self.remote)
        }
    }

    /// Name of a network or profile called `base` on the same remote.
    #[must_use]
    pub fn scoped(&self, base: &str) -> String {
        format!("{}{base}", self.remote_prefix())
    }

    /// Address of a file inside the container, as `file push`/`pull` expect it.
    #[must_use]
    pub fn file_target(&self, path: &str) -> String {
        format!("{self}{path}")
    }
}

impl fmt::Display for ContainerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.remote_prefix(), self.name)
    }
}

impl FromStr for ContainerRef {
    type Err = PstartError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((remote, name)) => Self::new(remote, name),
            None => Self::new("", s),
        }
        .map_err(|_| PstartError::InvalidContainerRef {
            value: s.to_string(),
        })
    }
}
