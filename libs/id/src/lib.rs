//! # nodeadm-id
//!
//! Validated identifiers for the node admin.
//!
//! ## Design Principles
//!
//! - Names are assigned by the node repository and are stable for the
//!   lifetime of one allocation
//! - Every name has a canonical string form with strict parsing
//! - Names are typed so a hostname can never be passed where a container
//!   name is expected
//!
//! ## Name Kinds
//!
//! - `HostName`: DNS hostname of a node, e.g. `host1.example.com`
//! - `ContainerName`: runtime container name, e.g. `host1`
//! - `DockerImage`: image reference, e.g. `registry.example.com/vespa:6.1`
//!
//! All runtime operations are keyed by `ContainerName`; the orchestrator and
//! node repository are keyed by `HostName`.

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;
