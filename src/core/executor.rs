//! Executor: orchestration for apply.
//!
//! stacks → graph → prior state → plan (or preview) → per-stack locks → events

use super::planner::Planner;
use super::stack::StackSet;
use super::state;
use super::types::*;
use crate::backend::ProvisioningBackend;
use crate::tripwire::eventlog;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;

/// Configuration for an apply run.
pub struct ApplyConfig<'a> {
    pub config: &'a PlinthConfig,
    pub stacks: &'a StackSet,
    pub state_dir: &'a Path,
    pub backend: Arc<dyn ProvisioningBackend>,
    pub force: bool,
    pub dry_run: bool,
    /// Overrides `policy.concurrency`
    pub concurrency: Option<usize>,
    pub cancel: Option<watch::Receiver<bool>>,
}

/// What an apply run produced.
#[derive(Debug)]
pub enum ApplyOutcome {
    /// `dry_run`: nothing was materialized
    Preview(ExecutionPlan),
    Applied(PlanReport),
}

/// Run one apply over every stack.
pub async fn apply(cfg: ApplyConfig<'_>) -> Result<ApplyOutcome, String> {
    let policy = &cfg.config.policy;
    let graph = cfg.stacks.build_graph().map_err(|e| e.to_string())?;
    let mut locks = state::load_locks(cfg.state_dir, cfg.stacks)?;
    let prior = state::prior_state(&locks);

    let mut planner = Planner::new(cfg.backend.clone())
        .with_policy(policy)
        .with_force(cfg.force);
    if let Some(n) = cfg.concurrency {
        planner = planner.with_concurrency(n);
    }
    if let Some(cancel) = cfg.cancel.clone() {
        planner = planner.with_cancel(cancel);
    }

    if cfg.dry_run {
        let plan = planner
            .preview(&cfg.config.name, &graph, cfg.stacks, &prior)
            .map_err(|e| e.to_string())?;
        return Ok(ApplyOutcome::Preview(plan));
    }

    let start = Instant::now();
    let run_id = eventlog::generate_run_id();
    for stack in locks.keys() {
        log_tripwire(
            cfg.state_dir,
            stack,
            policy.tripwire,
            ProvenanceEvent::ApplyStarted {
                stack: stack.clone(),
                run_id: run_id.clone(),
                plinth_version: env!("CARGO_PKG_VERSION").to_string(),
            },
        );
    }

    let outcome = planner
        .run(&graph, cfg.stacks, &prior)
        .await
        .map_err(|e| e.to_string())?;
    let report = outcome.report;

    // Record whatever materialized, even when the pass was aborted
    for (stack, lock) in locks.iter_mut() {
        state::record_report(lock, &report);
        if policy.lock_file {
            state::save_lock(cfg.state_dir, lock)?;
        }
        if policy.tripwire {
            log_stack_events(cfg.state_dir, stack, &run_id, &report, start);
        }
    }

    match outcome.fatal {
        Some(e) => Err(e.to_string()),
        None => Ok(ApplyOutcome::Applied(report)),
    }
}

/// Log a tripwire event if tripwire is enabled.
fn log_tripwire(state_dir: &Path, stack: &str, tripwire: bool, event: ProvenanceEvent) {
    if tripwire {
        if let Err(e) = eventlog::append_event(state_dir, stack, event) {
            tracing::warn!(stack, error = %e, "cannot write provenance event");
        }
    }
}

/// Provenance event for one report entry.
fn entry_event(entry: &ReportEntry) -> ProvenanceEvent {
    let stack = entry.stack.clone();
    let node = entry.node_id.clone();
    match entry.new_state {
        NodeState::Materialized => match entry.action {
            Some(PlanAction::NoOp) => ProvenanceEvent::NodeUnchanged { stack, node },
            action => ProvenanceEvent::NodeMaterialized {
                stack,
                node,
                action: action.unwrap_or(PlanAction::Create).to_string(),
                duration_seconds: entry.duration_seconds,
                hash: entry.hash.clone().unwrap_or_default(),
            },
        },
        NodeState::Failed => ProvenanceEvent::NodeFailed {
            stack,
            node,
            error: entry.error.clone().unwrap_or_default(),
        },
        NodeState::Cancelled => ProvenanceEvent::NodeCancelled { stack, node },
        NodeState::Pending | NodeState::Materializing => ProvenanceEvent::NodeSkipped {
            stack,
            node,
            blocked_by: entry.blocked_by.clone().unwrap_or_default(),
        },
    }
}

fn log_stack_events(state_dir: &Path, stack: &str, run_id: &str, report: &PlanReport, start: Instant) {
    let (mut materialized, mut unchanged, mut failed, mut skipped, mut cancelled) = (0, 0, 0, 0, 0);
    for entry in report.entries.iter().filter(|e| e.stack == stack) {
        let event = entry_event(entry);
        match &event {
            ProvenanceEvent::NodeMaterialized { .. } => materialized += 1,
            ProvenanceEvent::NodeUnchanged { .. } => unchanged += 1,
            ProvenanceEvent::NodeFailed { .. } => failed += 1,
            ProvenanceEvent::NodeSkipped { .. } => skipped += 1,
            ProvenanceEvent::NodeCancelled { .. } => cancelled += 1,
            _ => {}
        }
        log_tripwire(state_dir, stack, true, event);
    }
    log_tripwire(
        state_dir,
        stack,
        true,
        ProvenanceEvent::ApplyCompleted {
            stack: stack.to_string(),
            run_id: run_id.to_string(),
            materialized,
            unchanged,
            failed,
            skipped,
            cancelled,
            total_seconds: start.elapsed().as_secs_f64(),
        },
    );
}
