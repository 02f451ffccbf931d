//! # pstart-common
//!
//! Shared types for the pstart sandbox tool:
//! - Container addressing (`remote:name`)
//! - Gateway CIDR parsing
//! - Fixed agent paths and provisioning defaults
//! - Common error types

#![warn(missing_docs)]

pub mod cidr;
pub mod container_ref;
pub mod error;
pub mod paths;

pub use cidr::GatewayCidr;
pub use container_ref::ContainerRef;
pub use error::{CommandFailure, FatalContext, PstartError, PstartResult};
