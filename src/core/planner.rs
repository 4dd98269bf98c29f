//! Planning pass. Walks the graph in dependency order and converges each node.
//!
//! Ready nodes launch in topological order, at most `concurrency` at a time,
//! polled through a `FuturesUnordered`. Each node resolves its placeholders,
//! hashes its desired state, asks the backend whether anything changed, and
//! either reuses its last applied attributes or calls `materialize`.
//!
//! Shared mutable state is limited to two `RwLock`s: the node state and live
//! attribute table, and the export table. A branch never holds one lock while
//! waiting for the other, and never holds either across a backend call.

use super::error::{PlanError, Result};
use super::graph::DependencyGraph;
use super::outputs::ExportTable;
use super::resolver::{canonical_params, resolve_params, AttributeTable};
use super::stack::StackSet;
use super::types::*;
use crate::backend::{Change, DesiredState, ProvisioningBackend};
use crate::resources;
use crate::tripwire::hasher;
use futures::stream::{FuturesUnordered, StreamExt};
use indexmap::IndexMap;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, RwLock};

/// Last applied state of every node, keyed by node ID.
pub type PriorState = HashMap<String, NodeLock>;

#[derive(Debug, Default)]
struct PassState {
    states: IndexMap<String, NodeState>,
    attributes: AttributeTable,
}

/// Outcome of one node's run.
struct NodeRun {
    id: String,
    action: Option<PlanAction>,
    hash: Option<String>,
    result: Result<Attributes>,
    duration: Duration,
}

/// Result of `Planner::run`.
#[derive(Debug)]
pub struct PlanOutcome {
    /// Every node; those never launched after an abort are `Cancelled`
    pub report: PlanReport,
    /// Static defect that stopped the pass
    pub fatal: Option<PlanError>,
}

enum Wake {
    Finished(Option<NodeRun>),
    /// Cancel signal changed; false once the sender is gone
    Signal(bool),
}

/// Drives a `ProvisioningBackend` over a dependency graph.
pub struct Planner {
    backend: Arc<dyn ProvisioningBackend>,
    concurrency: usize,
    failure: FailurePolicy,
    force: bool,
    cancel: Option<watch::Receiver<bool>>,
}

impl Planner {
    pub fn new(backend: Arc<dyn ProvisioningBackend>) -> Self {
        let policy = Policy::default();
        Self {
            backend,
            concurrency: policy.concurrency,
            failure: policy.failure,
            force: false,
            cancel: None,
        }
    }

    pub fn with_policy(self, policy: &Policy) -> Self {
        self.with_concurrency(policy.concurrency)
            .with_failure_policy(policy.failure)
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_failure_policy(mut self, failure: FailurePolicy) -> Self {
        self.failure = failure;
        self
    }

    /// Re-materialize every node regardless of its last applied state.
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Stop launching new nodes once the receiver reads `true`.
    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn backend(&self) -> &dyn ProvisioningBackend {
        self.backend.as_ref()
    }

    /// Whether a node needs a backend call. Delegates to the backend's diff
    /// unless forced.
    pub fn has_changed(&self, desired: &DesiredState<'_>, previous: Option<&NodeLock>) -> Change {
        if self.force {
            return match previous {
                Some(_) => Change::Update,
                None => Change::Create,
            };
        }
        self.backend.diff(desired, previous)
    }

    /// Converge every node of `graph`.
    ///
    /// Provisioning failures are recorded per node and never abort the pass;
    /// static defects (`CycleDetected`, `UnresolvedReference`, ...) abort it
    /// once in-flight materializations have finished.
    pub async fn plan(
        &self,
        graph: &DependencyGraph,
        stacks: &StackSet,
        prior: &PriorState,
    ) -> Result<PlanReport> {
        let outcome = self.run(graph, stacks, prior).await?;
        match outcome.fatal {
            Some(e) => Err(e),
            None => Ok(outcome.report),
        }
    }

    /// Like `plan`, but an abort mid-pass still yields the report of
    /// everything that ran before it. Only errors raised before any node
    /// launches are returned as `Err`.
    pub async fn run(
        &self,
        graph: &DependencyGraph,
        stacks: &StackSet,
        prior: &PriorState,
    ) -> Result<PlanOutcome> {
        let started = Instant::now();
        let order = graph.topological_order()?;
        let position: HashMap<&str, usize> = order
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect();

        let shared = RwLock::new(PassState {
            states: order
                .iter()
                .map(|id| (id.clone(), NodeState::Pending))
                .collect(),
            attributes: AttributeTable::new(),
        });
        let exports = RwLock::new(stacks.export_table()?);

        let mut waiting: HashMap<&str, usize> = order
            .iter()
            .map(|id| (id.as_str(), graph.dependencies_of(id).map_or(0, |d| d.len())))
            .collect();
        let mut ready: BinaryHeap<Reverse<usize>> = order
            .iter()
            .enumerate()
            .filter(|(_, id)| waiting.get(id.as_str()) == Some(&0))
            .map(|(i, _)| Reverse(i))
            .collect();

        tracing::info!(
            nodes = order.len(),
            concurrency = self.concurrency,
            backend = self.backend.name(),
            "planning pass started"
        );

        let mut running = FuturesUnordered::new();
        let mut runs: HashMap<String, NodeRun> = HashMap::new();
        let mut completion_order = Vec::new();
        let mut first_failure: Option<String> = None;
        let mut fatal: Option<PlanError> = None;
        let mut cancelled = false;
        let mut cancel = self.cancel.clone();

        loop {
            if !cancelled && cancel.as_ref().is_some_and(|rx| *rx.borrow()) {
                cancelled = true;
                tracing::warn!(in_flight = running.len(), "cancellation requested");
            }
            let halted = cancelled
                || fatal.is_some()
                || (self.failure == FailurePolicy::StopOnFirst && first_failure.is_some());

            while !halted && running.len() < self.concurrency {
                let Some(Reverse(index)) = ready.pop() else {
                    break;
                };
                if let Some(node) = graph.get(&order[index]) {
                    running.push(self.materialize_node(node, graph, &shared, &exports, prior));
                }
            }
            if running.is_empty() {
                break;
            }

            let wake = match cancel.as_mut() {
                Some(rx) if !cancelled => tokio::select! {
                    run = running.next() => Wake::Finished(run),
                    changed = rx.changed() => Wake::Signal(changed.is_ok()),
                },
                _ => Wake::Finished(running.next().await),
            };
            let run = match wake {
                Wake::Signal(alive) => {
                    if !alive {
                        cancel = None;
                    }
                    continue;
                }
                Wake::Finished(None) => break,
                Wake::Finished(Some(run)) => run,
            };

            match &run.result {
                Ok(_) => {
                    completion_order.push(run.id.clone());
                    for dependent in graph.dependents_of(&run.id).into_iter().flatten() {
                        if let Some(count) = waiting.get_mut(dependent.as_str()) {
                            *count -= 1;
                            if *count == 0 {
                                if let Some(&i) = position.get(dependent.as_str()) {
                                    ready.push(Reverse(i));
                                }
                            }
                        }
                    }
                }
                Err(e @ PlanError::ProvisioningFailure { .. }) => {
                    tracing::warn!(node = %run.id, error = %e, "materialization failed");
                    first_failure.get_or_insert_with(|| run.id.clone());
                }
                Err(e) => {
                    tracing::error!(node = %run.id, error = %e, "aborting pass");
                    fatal.get_or_insert_with(|| e.clone());
                }
            }
            runs.insert(run.id.clone(), run);
        }
        drop(running);

        let PassState { states, .. } = shared.into_inner();
        let report = build_report(
            &order,
            graph,
            stacks,
            prior,
            &states,
            runs,
            completion_order,
            cancelled || fatal.is_some(),
            first_failure,
            started.elapsed(),
        );

        tracing::info!(
            materialized = report.materialized,
            unchanged = report.unchanged,
            failed = report.failed,
            skipped = report.skipped,
            cancelled = report.cancelled,
            aborted = fatal.is_some(),
            "planning pass finished"
        );
        Ok(PlanOutcome { report, fatal })
    }

    async fn materialize_node(
        &self,
        node: &ResourceNode,
        graph: &DependencyGraph,
        shared: &RwLock<PassState>,
        exports: &RwLock<ExportTable>,
        prior: &PriorState,
    ) -> NodeRun {
        let started = Instant::now();
        shared
            .write()
            .await
            .states
            .insert(node.id.clone(), NodeState::Materializing);
        tracing::debug!(node = %node.id, kind = %node.kind, "materializing");

        let mut run = NodeRun {
            id: node.id.clone(),
            action: None,
            hash: None,
            result: Ok(Attributes::new()),
            duration: Duration::ZERO,
        };
        let result = self
            .converge(node, graph, shared, exports, prior, &mut run)
            .await;
        if result.is_err() {
            shared
                .write()
                .await
                .states
                .insert(node.id.clone(), NodeState::Failed);
        }
        run.result = result;
        run.duration = started.elapsed();
        run
    }

    async fn converge(
        &self,
        node: &ResourceNode,
        graph: &DependencyGraph,
        shared: &RwLock<PassState>,
        exports: &RwLock<ExportTable>,
        prior: &PriorState,
        run: &mut NodeRun,
    ) -> Result<Attributes> {
        let params = resolve_live(node, shared, exports).await?;
        let hash = hash_desired_state(node, &dependency_ids(graph, &node.id), &params)
            .map_err(|cause| provisioning_failure(node, cause))?;
        run.hash = Some(hash.clone());

        let previous = prior.get(&node.id);
        let desired = DesiredState {
            node_id: &node.id,
            kind: node.kind,
            params: &params,
            hash: &hash,
        };
        let change = self.has_changed(&desired, previous);
        run.action = Some(change.into());

        let attributes = match (change, previous) {
            (Change::Unchanged, Some(prev)) => {
                tracing::debug!(node = %node.id, "unchanged, reusing last applied attributes");
                prev.attributes.clone()
            }
            _ => self
                .backend
                .materialize(&node.id, node.kind, &params)
                .await
                .map_err(|cause| provisioning_failure(node, cause))?,
        };

        {
            let mut state = shared.write().await;
            state
                .attributes
                .insert(node.id.clone(), attributes.clone());
            state
                .states
                .insert(node.id.clone(), NodeState::Materialized);
        }
        let published = exports.write().await.publish(&node.id, &attributes);
        for export in published {
            tracing::debug!(node = %node.id, %export, "export resolved");
        }
        Ok(attributes)
    }

    /// Dry-run preview: what `plan` would do, without calling `materialize`.
    ///
    /// Placeholders are resolved from the last applied attributes. A node
    /// whose inputs are only known after an upstream apply is an `Update`
    /// (or `Create` if it was never applied).
    pub fn preview(
        &self,
        name: &str,
        graph: &DependencyGraph,
        stacks: &StackSet,
        prior: &PriorState,
    ) -> Result<ExecutionPlan> {
        let order = graph.topological_order()?;

        let mut attributes = AttributeTable::new();
        let mut exports = stacks.export_table()?;
        for id in &order {
            if let Some(lock) = prior.get(id) {
                if lock.status == ResourceStatus::Converged {
                    attributes.insert(id.clone(), lock.attributes.clone());
                    exports.publish(id, &lock.attributes);
                }
            }
        }

        let mut changes = Vec::with_capacity(order.len());
        let (mut to_create, mut to_update, mut unchanged) = (0u32, 0u32, 0u32);
        for id in &order {
            let Some(node) = graph.get(id) else {
                continue;
            };
            let previous = prior.get(id);
            let known_after_apply = if previous.is_some() {
                PlanAction::Update
            } else {
                PlanAction::Create
            };

            let action = match resolve_params(node, &attributes, &exports) {
                Ok(params) => match hash_desired_state(node, &dependency_ids(graph, id), &params) {
                    Ok(hash) => {
                        let desired = DesiredState {
                            node_id: id,
                            kind: node.kind,
                            params: &params,
                            hash: &hash,
                        };
                        self.has_changed(&desired, previous).into()
                    }
                    Err(_) => known_after_apply,
                },
                Err(_) => known_after_apply,
            };

            match action {
                PlanAction::Create => to_create += 1,
                PlanAction::Update => to_update += 1,
                PlanAction::NoOp => unchanged += 1,
            }
            changes.push(PlannedChange {
                node_id: id.clone(),
                stack: stacks.stack_of(id).unwrap_or_default().to_string(),
                kind: node.kind,
                action,
                description: describe_action(node, action),
            });
        }

        let mut retained: Vec<String> = prior
            .keys()
            .filter(|id| !graph.contains(id))
            .cloned()
            .collect();
        retained.sort();

        Ok(ExecutionPlan {
            name: name.to_string(),
            changes,
            execution_order: order,
            retained,
            to_create,
            to_update,
            unchanged,
        })
    }
}

/// Resolve a node's placeholders against the live tables. Referenced
/// attributes are copied out first so the two locks are never held together.
async fn resolve_live(
    node: &ResourceNode,
    shared: &RwLock<PassState>,
    exports: &RwLock<ExportTable>,
) -> Result<ResolvedParams> {
    let (refs, _) = node.references();
    let attributes: AttributeTable = {
        let state = shared.read().await;
        refs.iter()
            .filter_map(|r| {
                state
                    .attributes
                    .get(&r.resource)
                    .map(|a| (r.resource.clone(), a.clone()))
            })
            .collect()
    };
    let exports = exports.read().await;
    resolve_params(node, &attributes, &exports)
}

fn provisioning_failure(node: &ResourceNode, cause: String) -> PlanError {
    PlanError::ProvisioningFailure {
        node: node.id.clone(),
        kind: node.kind,
        cause,
    }
}

fn dependency_ids<'a>(graph: &'a DependencyGraph, id: &str) -> Vec<&'a str> {
    graph
        .dependencies_of(id)
        .map(|deps| deps.iter().map(String::as_str).collect())
        .unwrap_or_default()
}

/// BLAKE3 over everything that makes up a node's desired state: kind,
/// dependency set, resolved params, and external content. A deployment is
/// identified by its content, not the path it was read from.
pub fn hash_desired_state(
    node: &ResourceNode,
    dependencies: &[&str],
    params: &ResolvedParams,
) -> std::result::Result<String, String> {
    let mut deps = dependencies.to_vec();
    deps.sort_unstable();
    let kind = node.kind.to_string();
    let deps = deps.join(",");
    let (params_text, content) = match resources::content_hash(node.kind, params)? {
        Some(content) => {
            let mut located = params.clone();
            located.shift_remove("source");
            (canonical_params(&located), content)
        }
        None => (canonical_params(params), String::new()),
    };
    Ok(hasher::composite_hash(&[&kind, &deps, &params_text, &content]))
}

/// Human-readable description of a planned action.
fn describe_action(node: &ResourceNode, action: PlanAction) -> String {
    match action {
        PlanAction::Create => format!("{}: create {}", node.id, resources::describe(node)),
        PlanAction::Update => format!("{}: update {}", node.id, resources::describe(node)),
        PlanAction::NoOp => format!("{}: no changes", node.id),
    }
}

fn previous_state(lock: Option<&NodeLock>) -> NodeState {
    match lock.map(|l| l.status) {
        Some(ResourceStatus::Converged) => NodeState::Materialized,
        Some(ResourceStatus::Failed) => NodeState::Failed,
        None => NodeState::Pending,
    }
}

#[allow(clippy::too_many_arguments)]
fn build_report(
    order: &[String],
    graph: &DependencyGraph,
    stacks: &StackSet,
    prior: &PriorState,
    states: &IndexMap<String, NodeState>,
    mut runs: HashMap<String, NodeRun>,
    completion_order: Vec<String>,
    cancelled: bool,
    first_failure: Option<String>,
    total_duration: Duration,
) -> PlanReport {
    // First failed ancestor (in topological order) of every node left pending
    let mut blocked_by: HashMap<String, String> = HashMap::new();
    for id in order {
        if states.get(id) != Some(&NodeState::Failed) {
            continue;
        }
        for dependent in graph.transitive_dependents(id) {
            if states.get(&dependent) == Some(&NodeState::Pending) {
                blocked_by.entry(dependent).or_insert_with(|| id.clone());
            }
        }
    }

    let mut report = PlanReport {
        completion_order,
        total_duration,
        ..PlanReport::default()
    };

    for id in order {
        let Some(node) = graph.get(id) else {
            continue;
        };
        let mut new_state = states.get(id).copied().unwrap_or(NodeState::Pending);
        let mut blocked = blocked_by.remove(id);
        if new_state == NodeState::Pending && blocked.is_none() {
            if cancelled {
                new_state = NodeState::Cancelled;
            } else {
                // stop_on_first: never launched after the first failure
                blocked = first_failure.clone();
            }
        }

        let (action, hash, error, attributes, duration_seconds) = match runs.remove(id) {
            Some(run) => {
                let (error, attributes) = match run.result {
                    Ok(attrs) => (None, attrs),
                    Err(e) => (Some(e.to_string()), Attributes::new()),
                };
                (run.action, run.hash, error, attributes, run.duration.as_secs_f64())
            }
            None => (None, None, None, Attributes::new(), 0.0),
        };

        match new_state {
            NodeState::Materialized if action == Some(PlanAction::NoOp) => report.unchanged += 1,
            NodeState::Materialized => report.materialized += 1,
            NodeState::Failed => report.failed += 1,
            NodeState::Cancelled => report.cancelled += 1,
            NodeState::Pending | NodeState::Materializing => report.skipped += 1,
        }

        report.entries.push(ReportEntry {
            node_id: id.clone(),
            stack: stacks.stack_of(id).unwrap_or_default().to_string(),
            kind: node.kind,
            previous_state: previous_state(prior.get(id)),
            new_state,
            action,
            error,
            blocked_by: blocked,
            hash,
            attributes,
            duration_seconds,
        });
    }
    report
}
