//! Actor framework and the node agent built on it.
//!
//! ## Design Principles
//!
//! - **One actor per host**: each `NodeAgent` owns every side effect on its
//!   host's container, so runtime calls for one container never overlap
//! - **Tick-driven**: agents converge on a fixed interval and right after a
//!   spec or freeze change; nothing blocks inside a tick
//! - **Crash isolation**: a failing tick is logged and retried, and never
//!   reaches sibling agents
//! - **Graceful stop**: stopping an agent lets its in-flight tick finish

mod framework;
mod node_agent;

pub use framework::{
    Actor, ActorContext, ActorError, ActorHandle, ActorRef, Message, Supervisor,
};
pub use node_agent::{
    AgentClients, NodeAgent, NodeAgentConfig, NodeAgentHandle, NodeAgentMessage,
    NodeAgentSnapshot, AGENT_MAILBOX_SIZE,
};
