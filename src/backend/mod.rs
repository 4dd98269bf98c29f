//! Provisioning backends: the collaborators that actually create resources.
//!
//! The planner only ever talks to `dyn ProvisioningBackend`. Two backends
//! ship: a deterministic simulator and a command bridge that hands each node
//! to an external program over JSON.

pub mod command;
pub mod simulated;

use crate::core::types::{Attributes, NodeLock, PlanAction, ResolvedParams, ResourceKind, ResourceStatus};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

pub use command::CommandBackend;
pub use simulated::SimulatedBackend;

/// Desired state of a node after placeholder resolution.
#[derive(Debug, Clone, Copy)]
pub struct DesiredState<'a> {
    pub node_id: &'a str,
    pub kind: ResourceKind,
    pub params: &'a ResolvedParams,
    /// BLAKE3 over kind, dependencies, params and content
    pub hash: &'a str,
}

/// Outcome of comparing desired state with the last applied state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    /// Never applied
    Create,
    /// Applied before, but inputs moved or the last attempt failed
    Update,
    Unchanged,
}

impl From<Change> for PlanAction {
    fn from(change: Change) -> Self {
        match change {
            Change::Create => PlanAction::Create,
            Change::Update => PlanAction::Update,
            Change::Unchanged => PlanAction::NoOp,
        }
    }
}

/// Hash-based diff: unchanged only when the last apply converged with the
/// same desired-state hash.
pub fn hash_diff(desired: &DesiredState<'_>, previous: Option<&NodeLock>) -> Change {
    match previous {
        None => Change::Create,
        Some(prev) if prev.status == ResourceStatus::Converged && prev.hash == desired.hash => {
            Change::Unchanged
        }
        Some(_) => Change::Update,
    }
}

/// Something that can bring a resource into existence.
#[async_trait]
pub trait ProvisioningBackend: Send + Sync {
    /// Backend name for logs and lock metadata
    fn name(&self) -> &str;

    /// Create or update a resource and report its live attributes.
    async fn materialize(
        &self,
        node_id: &str,
        kind: ResourceKind,
        params: &ResolvedParams,
    ) -> Result<Attributes, String>;

    /// Decide whether a node needs work.
    fn diff(&self, desired: &DesiredState<'_>, previous: Option<&NodeLock>) -> Change {
        hash_diff(desired, previous)
    }
}

/// Backend selection from the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum BackendKind {
    /// Deterministic in-process simulation
    #[default]
    Simulate,
    /// External provider program, one invocation per resource
    Command,
}

/// Build the selected backend.
pub fn build_backend(
    kind: BackendKind,
    provider: Option<PathBuf>,
) -> Result<Arc<dyn ProvisioningBackend>, String> {
    match kind {
        BackendKind::Simulate => Ok(Arc::new(SimulatedBackend::new())),
        BackendKind::Command => {
            let program = provider.ok_or("--backend command requires --provider <program>")?;
            Ok(Arc::new(CommandBackend::new(program)))
        }
    }
}
