//! Init agent injection.

use std::path::{Path, PathBuf};

use pstart_common::paths::{AGENT_GUEST_MODE, AGENT_GUEST_PATH};
use pstart_common::{ContainerRef, PstartError, PstartResult};

use crate::lxc::LxcClient;

/// The init agent binary, loaded from the host.
#[derive(Clone, PartialEq, Eq)]
pub struct AgentPayload {
    source: PathBuf,
    bytes: Vec<u8>,
}

impl AgentPayload {
    /// Read the agent from `path`.
    ///
    /// # Errors
    ///
    /// [`PstartError::AgentMissing`] if the file is absent or unreadable.
    pub fn load(path: impl AsRef<Path>) -> PstartResult<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|err| {
            tracing::debug!(path = %path.display(), error = %err, "Cannot read init agent");
            PstartError::AgentMissing {
                path: path.to_path_buf(),
            }
        })?;
        tracing::debug!(path = %path.display(), size = bytes.len(), "Loaded init agent");
        Ok(Self {
            source: path.to_path_buf(),
            bytes,
        })
    }

    /// Wrap an in-memory payload.
    #[must_use]
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            source: PathBuf::from("<memory>"),
            bytes: bytes.into(),
        }
    }

    /// Where the payload was loaded from.
    #[must_use]
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Payload contents.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl std::fmt::Debug for AgentPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentPayload")
            .field("source", &self.source)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Push the agent to its fixed location, root-owned and mode 0700.
///
/// Always overwrites whatever is there.
///
/// # Errors
///
/// Fatal if the push fails.
pub fn inject(client: &LxcClient, container: &ContainerRef, payload: &AgentPayload) -> PstartResult<()> {
    tracing::debug!(
        container = %container,
        path = AGENT_GUEST_PATH,
        size = payload.bytes().len(),
        "Pushing init agent"
    );
    client.file_push(container, AGENT_GUEST_PATH, payload.bytes(), AGENT_GUEST_MODE, (0, 0))
}

/// Read the injected agent back from the container.
///
/// # Errors
///
/// Fatal if the pull fails.
pub fn read_back(client: &LxcClient, container: &ContainerRef) -> PstartResult<Vec<u8>> {
    client.file_pull(container, AGENT_GUEST_PATH)
}
