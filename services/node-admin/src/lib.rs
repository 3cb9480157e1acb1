//! Node Admin Library
//!
//! The node admin runs on each physical host and keeps the containers of the
//! host's child nodes in line with the node repository. Stopping a node is
//! coordinated with the orchestrator so the cluster never loses too many
//! nodes at once.
//!
//! ## Architecture
//!
//! ```text
//! NodeAdminStateUpdater        (repository poll loop, RESUMED / SUSPENDED)
//! └── NodeAdmin                (one agent per assigned hostname)
//!     └── NodeAgent(hostname)  (tick-driven container convergence)
//!         ├── ContainerRuntime
//!         ├── Orchestrator
//!         └── NodeRepository
//! ```
//!
//! ## Modules
//!
//! - `actors`: Actor framework and the node agent
//! - `admin`: Agent population management
//! - `updater`: Top-level scheduler
//! - `docker`, `orchestrator`, `repository`: Clients for the outside world
//! - `mock`: In-memory clients recording their calls, for tests

pub mod actors;
pub mod admin;
pub mod config;
pub mod docker;
pub mod environment;
pub mod error;
pub mod mock;
pub mod node;
pub mod operations;
pub mod orchestrator;
pub mod repository;
pub mod runtime;
pub mod updater;

pub use actors::{AgentClients, NodeAgentConfig, NodeAgentHandle, NodeAgentSnapshot};
pub use admin::NodeAdmin;
pub use config::Config;
pub use error::AgentError;
pub use node::{NodeSpec, NodeState};
pub use updater::{AdminState, NodeAdminStateUpdater, UpdaterConfig, UpdaterError};
