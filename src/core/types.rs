//! Config schema, graph node, state lock, plan, and provenance types.
//!
//! Everything that crosses a serialization boundary (plinth.yaml, lock files,
//! the JSONL event log) derives Serialize/Deserialize.

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use serde_yaml_ng::{Mapping, Value};
use std::collections::HashMap;
use std::fmt;

/// Live attributes reported by a backend for a materialized node.
pub type Attributes = IndexMap<String, String>;

/// Declared (unresolved) parameters of a node.
pub type Params = IndexMap<String, ParamValue>;

/// Parameters after every `ref` / `import` placeholder has been substituted.
pub type ResolvedParams = IndexMap<String, Value>;

// ============================================================================
// Top-level plinth.yaml
// ============================================================================

/// Root configuration: the desired state of the site infrastructure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlinthConfig {
    /// Schema version (must be "1.0")
    pub version: String,

    /// Human-readable project name
    pub name: String,

    /// Optional description
    #[serde(default)]
    pub description: Option<String>,

    /// Global parameters (templatable)
    #[serde(default)]
    pub params: HashMap<String, Value>,

    /// Stack declarations (order-preserving)
    #[serde(default)]
    pub stacks: IndexMap<String, StackSpec>,

    /// Execution policy
    #[serde(default)]
    pub policy: Policy,
}

/// A deployable unit of resources.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StackSpec {
    #[serde(default)]
    pub description: Option<String>,

    /// Stacks that must be fully applied before this one
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Resource declarations (order-preserving)
    #[serde(default)]
    pub resources: IndexMap<String, ResourceSpec>,

    /// Outputs other stacks may import
    #[serde(default)]
    pub exports: IndexMap<String, ExportDecl>,
}

/// A single resource declaration inside a stack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceSpec {
    #[serde(rename = "type")]
    pub kind: ResourceKind,

    /// Resource IDs that must be materialized first
    #[serde(default)]
    pub depends_on: Vec<String>,

    #[serde(default)]
    pub params: Params,
}

/// An exported attribute: `name: { resource, attribute }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportDecl {
    pub resource: String,
    pub attribute: String,
}

// ============================================================================
// Policy
// ============================================================================

/// Execution policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    /// Failure handling
    #[serde(default)]
    pub failure: FailurePolicy,

    /// Maximum number of in-flight materializations
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Append provenance events on every apply
    #[serde(default = "default_true")]
    pub tripwire: bool,

    /// Persist last-applied state after apply
    #[serde(default = "default_true")]
    pub lock_file: bool,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            failure: FailurePolicy::default(),
            concurrency: default_concurrency(),
            tripwire: true,
            lock_file: true,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_concurrency() -> usize {
    4
}

/// Failure handling strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop launching new nodes after the first failure
    StopOnFirst,
    /// Skip dependents of a failed node, keep going elsewhere
    #[default]
    ContinueIndependent,
}

// ============================================================================
// Resources
// ============================================================================

/// Kind of provisioned resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Storage,
    CdnDistribution,
    DnsRecord,
    Certificate,
    AccessIdentity,
    Deployment,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Storage => write!(f, "storage"),
            Self::CdnDistribution => write!(f, "cdn_distribution"),
            Self::DnsRecord => write!(f, "dns_record"),
            Self::Certificate => write!(f, "certificate"),
            Self::AccessIdentity => write!(f, "access_identity"),
            Self::Deployment => write!(f, "deployment"),
        }
    }
}

/// Same-stack attribute reference: `{ ref: { resource, attribute } }`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AttrRef {
    pub resource: String,
    pub attribute: String,
}

/// Cross-stack output reference: `{ import: { stack, export } }`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputRef {
    pub stack: String,
    pub export: String,
}

impl fmt::Display for OutputRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.stack, self.export)
    }
}

/// A parameter value. Placeholders are recognised structurally: a mapping
/// whose only key is `ref` or `import` with a well-formed body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub enum ParamValue {
    Literal(Value),
    List(Vec<ParamValue>),
    Map(IndexMap<String, ParamValue>),
    Ref(AttrRef),
    Import(OutputRef),
}

impl ParamValue {
    /// Shorthand for a string literal.
    pub fn string(s: impl Into<String>) -> Self {
        Self::Literal(Value::String(s.into()))
    }

    /// Shorthand for a `ref` placeholder.
    pub fn attr(resource: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self::Ref(AttrRef {
            resource: resource.into(),
            attribute: attribute.into(),
        })
    }

    /// Shorthand for an `import` placeholder.
    pub fn import(stack: impl Into<String>, export: impl Into<String>) -> Self {
        Self::Import(OutputRef {
            stack: stack.into(),
            export: export.into(),
        })
    }

    /// Collect every placeholder reachable from this value.
    pub fn collect_refs<'a>(
        &'a self,
        refs: &mut Vec<&'a AttrRef>,
        imports: &mut Vec<&'a OutputRef>,
    ) {
        match self {
            Self::Literal(_) => {}
            Self::List(items) => {
                for item in items {
                    item.collect_refs(refs, imports);
                }
            }
            Self::Map(map) => {
                for value in map.values() {
                    value.collect_refs(refs, imports);
                }
            }
            Self::Ref(r) => refs.push(r),
            Self::Import(i) => imports.push(i),
        }
    }

    /// Literal string content, if this is a string literal.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Literal(Value::String(s)) => Some(s),
            _ => None,
        }
    }
}

impl From<Value> for ParamValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Sequence(items) => Self::List(items.into_iter().map(Self::from).collect()),
            Value::Mapping(map) => {
                if let Some(placeholder) = placeholder_from_mapping(&map) {
                    return placeholder;
                }
                Self::Map(
                    map.into_iter()
                        .map(|(k, v)| (yaml_value_to_string(&k), Self::from(v)))
                        .collect(),
                )
            }
            Value::Tagged(tagged) => Self::from(tagged.value),
            other => Self::Literal(other),
        }
    }
}

fn placeholder_from_mapping(map: &Mapping) -> Option<ParamValue> {
    if map.len() != 1 {
        return None;
    }
    if let Some(body) = map.get("ref") {
        let r: AttrRef = serde_yaml_ng::from_value(body.clone()).ok()?;
        return Some(ParamValue::Ref(r));
    }
    if let Some(body) = map.get("import") {
        let i: OutputRef = serde_yaml_ng::from_value(body.clone()).ok()?;
        return Some(ParamValue::Import(i));
    }
    None
}

fn single_key(key: &str, fields: [(&str, String); 2]) -> Value {
    let body: Mapping = fields
        .into_iter()
        .map(|(k, v)| (Value::String(k.to_string()), Value::String(v)))
        .collect();
    let mut outer = Mapping::new();
    outer.insert(Value::String(key.to_string()), Value::Mapping(body));
    Value::Mapping(outer)
}

impl From<ParamValue> for Value {
    fn from(param: ParamValue) -> Self {
        match param {
            ParamValue::Literal(v) => v,
            ParamValue::List(items) => {
                Value::Sequence(items.into_iter().map(Value::from).collect())
            }
            ParamValue::Map(map) => Value::Mapping(
                map.into_iter()
                    .map(|(k, v)| (Value::String(k), Value::from(v)))
                    .collect(),
            ),
            ParamValue::Ref(r) => single_key(
                "ref",
                [("resource", r.resource), ("attribute", r.attribute)],
            ),
            ParamValue::Import(i) => {
                single_key("import", [("stack", i.stack), ("export", i.export)])
            }
        }
    }
}

/// One desired resource in the dependency graph. Immutable once added:
/// the graph hands out shared references only.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceNode {
    pub id: String,
    pub kind: ResourceKind,
    pub params: Params,
    pub depends_on: IndexSet<String>,
}

impl ResourceNode {
    pub fn new(id: impl Into<String>, kind: ResourceKind) -> Self {
        Self {
            id: id.into(),
            kind,
            params: IndexMap::new(),
            depends_on: IndexSet::new(),
        }
    }

    /// Builder: add a parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: ParamValue) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    /// Builder: add a dependency.
    pub fn with_dependency(mut self, id: impl Into<String>) -> Self {
        self.depends_on.insert(id.into());
        self
    }

    /// All `ref` and `import` placeholders in declaration order.
    pub fn references(&self) -> (Vec<&AttrRef>, Vec<&OutputRef>) {
        let mut refs = Vec::new();
        let mut imports = Vec::new();
        for value in self.params.values() {
            value.collect_refs(&mut refs, &mut imports);
        }
        (refs, imports)
    }
}

/// Lifecycle of a node within one planning pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    Pending,
    Materializing,
    Materialized,
    Failed,
    /// Never started because the pass was cancelled.
    Cancelled,
}

impl NodeState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Materialized | Self::Failed)
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Materializing => write!(f, "MATERIALIZING"),
            Self::Materialized => write!(f, "MATERIALIZED"),
            Self::Failed => write!(f, "FAILED"),
            Self::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

// ============================================================================
// State / Lock file
// ============================================================================

/// Per-stack state lock file (last applied state).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateLock {
    /// Schema version
    pub schema: String,

    /// Stack name
    pub stack: String,

    /// When the lock was generated
    pub generated_at: String,

    /// Generator version
    pub generator: String,

    /// BLAKE3 version
    pub blake3_version: String,

    /// Per-node state
    pub resources: IndexMap<String, NodeLock>,
}

/// Per-node lock entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeLock {
    #[serde(rename = "type")]
    pub kind: ResourceKind,

    pub status: ResourceStatus,

    #[serde(default)]
    pub applied_at: Option<String>,

    #[serde(default)]
    pub duration_seconds: Option<f64>,

    /// BLAKE3 hash of the desired state that was applied
    pub hash: String,

    /// Live attributes returned by the backend
    #[serde(default)]
    pub attributes: Attributes,
}

/// Recorded outcome of the last materialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    Converged,
    Failed,
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Converged => write!(f, "CONVERGED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

// ============================================================================
// Plan preview
// ============================================================================

/// Action the planner takes (or would take) on a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanAction {
    Create,
    Update,
    NoOp,
}

impl fmt::Display for PlanAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "CREATE"),
            Self::Update => write!(f, "UPDATE"),
            Self::NoOp => write!(f, "NO-OP"),
        }
    }
}

/// A single previewed change.
#[derive(Debug, Clone)]
pub struct PlannedChange {
    pub node_id: String,
    pub stack: String,
    pub kind: ResourceKind,
    pub action: PlanAction,
    pub description: String,
}

/// Dry-run preview of a planning pass.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    /// Config name
    pub name: String,

    /// Changes in execution order
    pub changes: Vec<PlannedChange>,

    /// Topological execution order (node IDs)
    pub execution_order: Vec<String>,

    /// Lock entries whose resources are no longer declared (left in place)
    pub retained: Vec<String>,

    /// Summary counts
    pub to_create: u32,
    pub to_update: u32,
    pub unchanged: u32,
}

// ============================================================================
// Plan report
// ============================================================================

/// Outcome of one node in a materialization pass.
#[derive(Debug, Clone)]
pub struct ReportEntry {
    pub node_id: String,
    pub stack: String,
    pub kind: ResourceKind,

    /// State recorded by the previous apply (Pending if never applied)
    pub previous_state: NodeState,

    /// State at the end of this pass
    pub new_state: NodeState,

    /// What was done; None if the node never started
    pub action: Option<PlanAction>,

    pub error: Option<String>,

    /// Failed ancestor that kept this node from starting
    pub blocked_by: Option<String>,

    /// Desired-state hash, once computed
    pub hash: Option<String>,

    pub attributes: Attributes,

    pub duration_seconds: f64,
}

/// Result of `Planner::plan`, entries in topological order.
#[derive(Debug, Clone, Default)]
pub struct PlanReport {
    pub entries: Vec<ReportEntry>,

    /// Node IDs in the order their materialization finished
    pub completion_order: Vec<String>,

    pub materialized: u32,
    pub unchanged: u32,
    pub failed: u32,
    pub skipped: u32,
    pub cancelled: u32,
    pub total_duration: std::time::Duration,
}

impl PlanReport {
    pub fn entry(&self, node_id: &str) -> Option<&ReportEntry> {
        self.entries.iter().find(|e| e.node_id == node_id)
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.skipped == 0 && self.cancelled == 0
    }
}

// ============================================================================
// Provenance events
// ============================================================================

/// Provenance event for the JSONL event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProvenanceEvent {
    ApplyStarted {
        stack: String,
        run_id: String,
        plinth_version: String,
    },
    NodeMaterialized {
        stack: String,
        node: String,
        action: String,
        duration_seconds: f64,
        hash: String,
    },
    NodeUnchanged {
        stack: String,
        node: String,
    },
    NodeFailed {
        stack: String,
        node: String,
        error: String,
    },
    NodeSkipped {
        stack: String,
        node: String,
        blocked_by: String,
    },
    NodeCancelled {
        stack: String,
        node: String,
    },
    ApplyCompleted {
        stack: String,
        run_id: String,
        materialized: u32,
        unchanged: u32,
        failed: u32,
        skipped: u32,
        cancelled: u32,
        total_seconds: f64,
    },
}

/// Timestamped event wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampedEvent {
    pub ts: String,
    #[serde(flatten)]
    pub event: ProvenanceEvent,
}

// ============================================================================
// Template helper
// ============================================================================

/// Convert a serde_yaml_ng::Value to a string for template resolution.
pub fn yaml_value_to_string(val: &Value) -> String {
    match val {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        other => format!("{:?}", other),
    }
}

// ============================================================================
// Tests
// ============================================================================
