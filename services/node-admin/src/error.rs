//! Errors surfaced by a node agent tick.

use std::io;

use nodeadm_id::HostName;
use thiserror::Error;

use crate::orchestrator::OrchestratorError;
use crate::repository::RepositoryError;
use crate::runtime::RuntimeError;

/// Failure that aborts the current tick of one node agent.
///
/// None of these are fatal: the next tick re-observes the container and
/// resumes from wherever the previous one stopped.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("failed to resolve address of {hostname}: {source}")]
    AddressResolution {
        hostname: HostName,
        #[source]
        source: io::Error,
    },
}

impl AgentError {
    /// Transport-level failures that are expected to clear up on their own.
    ///
    /// Everything else is still retried, but logged as unexpected.
    pub fn is_transient(&self) -> bool {
        match self {
            AgentError::Runtime(e) => matches!(e, RuntimeError::Transport(_)),
            AgentError::Orchestrator(OrchestratorError::Http(_)) => true,
            AgentError::Repository(RepositoryError::Http(_)) => true,
            AgentError::Repository(RepositoryError::Api { status, .. })
            | AgentError::Orchestrator(OrchestratorError::Api { status, .. }) => *status >= 500,
            AgentError::AddressResolution { .. } => true,
            _ => false,
        }
    }
}
