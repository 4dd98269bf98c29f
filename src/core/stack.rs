//! Stacks: deployable groups of nodes with exports and imports.
//!
//! `StackSet::build_graph` flattens every stack into one `DependencyGraph`,
//! turning references into edges:
//! - `depends_on` entries
//! - same-stack `ref` params (referenced node -> consumer)
//! - cross-stack `import` params (exporting node -> consumer)
//! - stack-level `depends_on` (every node of the dependency -> every node of the stack)

use super::error::{PlanError, Result};
use super::graph::DependencyGraph;
use super::outputs::ExportTable;
use super::types::{OutputRef, ResourceNode};
use indexmap::{IndexMap, IndexSet};

/// An exported node attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSpec {
    pub node: String,
    pub attribute: String,
}

/// A named group of nodes applied as one unit.
#[derive(Debug, Clone, Default)]
pub struct StackGroup {
    pub name: String,
    pub description: Option<String>,
    nodes: Vec<String>,
    exports: IndexMap<String, ExportSpec>,
    depends_on: IndexSet<String>,
}

impl StackGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Record membership of a node (declaration order).
    pub fn add_node(&mut self, id: impl Into<String>) {
        let id = id.into();
        if !self.nodes.contains(&id) {
            self.nodes.push(id);
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.iter().any(|n| n == id)
    }

    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    /// Register an output. The node must belong to this stack.
    pub fn export(&mut self, name: &str, node_id: &str, attribute: &str) -> Result<()> {
        if !self.contains(node_id) {
            return Err(PlanError::UnknownNode(node_id.to_string()));
        }
        if self.exports.contains_key(name) {
            return Err(PlanError::DuplicateExport {
                stack: self.name.clone(),
                export: name.to_string(),
            });
        }
        self.exports.insert(
            name.to_string(),
            ExportSpec {
                node: node_id.to_string(),
                attribute: attribute.to_string(),
            },
        );
        Ok(())
    }

    pub fn exports(&self) -> &IndexMap<String, ExportSpec> {
        &self.exports
    }

    /// Gate this whole stack behind another.
    pub fn add_dependency(&mut self, stack: impl Into<String>) {
        self.depends_on.insert(stack.into());
    }

    pub fn dependencies(&self) -> &IndexSet<String> {
        &self.depends_on
    }
}

/// Every stack of a project plus the nodes they own.
#[derive(Debug, Clone, Default)]
pub struct StackSet {
    stacks: IndexMap<String, StackGroup>,
    nodes: IndexMap<String, ResourceNode>,
    owner: IndexMap<String, String>,
}

impl StackSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_stack(&mut self, stack: StackGroup) -> Result<()> {
        if self.stacks.contains_key(&stack.name) {
            return Err(PlanError::DuplicateId(stack.name));
        }
        self.stacks.insert(stack.name.clone(), stack);
        Ok(())
    }

    /// Declare a node inside an existing stack. Node IDs are global.
    pub fn add_node(&mut self, stack: &str, node: ResourceNode) -> Result<()> {
        let group = self
            .stacks
            .get_mut(stack)
            .ok_or_else(|| PlanError::UnknownStack(stack.to_string()))?;
        if self.nodes.contains_key(&node.id) {
            return Err(PlanError::DuplicateId(node.id));
        }
        group.add_node(node.id.clone());
        self.owner.insert(node.id.clone(), stack.to_string());
        self.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    pub fn stack(&self, name: &str) -> Option<&StackGroup> {
        self.stacks.get(name)
    }

    pub fn stack_mut(&mut self, name: &str) -> Option<&mut StackGroup> {
        self.stacks.get_mut(name)
    }

    pub fn stacks(&self) -> impl Iterator<Item = &StackGroup> {
        self.stacks.values()
    }

    pub fn node(&self, id: &str) -> Option<&ResourceNode> {
        self.nodes.get(id)
    }

    pub fn nodes_mut(&mut self) -> impl Iterator<Item = &mut ResourceNode> {
        self.nodes.values_mut()
    }

    /// Stack that owns a node.
    pub fn stack_of(&self, node_id: &str) -> Option<&str> {
        self.owner.get(node_id).map(String::as_str)
    }

    /// Typed placeholder for another stack's export.
    pub fn import_ref(&self, from_stack: &str, export: &str) -> Result<OutputRef> {
        let group = self
            .stacks
            .get(from_stack)
            .ok_or_else(|| PlanError::UnknownStack(from_stack.to_string()))?;
        if !group.exports.contains_key(export) {
            return Err(PlanError::UnknownExport {
                stack: from_stack.to_string(),
                export: export.to_string(),
            });
        }
        Ok(OutputRef {
            stack: from_stack.to_string(),
            export: export.to_string(),
        })
    }

    /// A fresh, fully unresolved export table.
    pub fn export_table(&self) -> Result<ExportTable> {
        let mut table = ExportTable::new();
        for group in self.stacks.values() {
            for (name, spec) in &group.exports {
                table.declare(&group.name, name, &spec.node, &spec.attribute)?;
            }
        }
        Ok(table)
    }

    /// Stacks ordered by their `depends_on` relation, ties in declaration order.
    pub fn stack_order(&self) -> Result<Vec<String>> {
        let mut deps = Vec::with_capacity(self.stacks.len());
        for group in self.stacks.values() {
            for upstream in &group.depends_on {
                if !self.stacks.contains_key(upstream) {
                    return Err(PlanError::UnknownStack(upstream.clone()));
                }
            }
            deps.push((
                group.name.as_str(),
                group.depends_on.iter().map(String::as_str).collect(),
            ));
        }
        order_stacks(&deps).map_err(PlanError::CycleDetected)
    }

    /// Flatten every stack into one graph with declared and synthetic edges.
    pub fn build_graph(&self) -> Result<DependencyGraph> {
        // Empty stacks add no node edges, so stack cycles are checked here
        self.stack_order()?;
        let mut graph = DependencyGraph::from_nodes(self.nodes.values().cloned())?;

        for node in self.nodes.values() {
            let (refs, imports) = node.references();
            let owner = self.stack_of(&node.id).unwrap_or_default();

            for r in refs {
                if self.stack_of(&r.resource) != Some(owner) {
                    return Err(PlanError::UnknownNode(r.resource.clone()));
                }
                graph.add_edge(&r.resource, &node.id)?;
            }

            for i in imports {
                let source = self.export_source(i)?;
                graph.add_edge(source, &node.id)?;
            }
        }

        for group in self.stacks.values() {
            for upstream in &group.depends_on {
                let upstream_group = self
                    .stacks
                    .get(upstream)
                    .ok_or_else(|| PlanError::UnknownStack(upstream.clone()))?;
                for from in &upstream_group.nodes {
                    for to in &group.nodes {
                        graph.add_edge(from, to)?;
                    }
                }
            }
        }

        Ok(graph)
    }

    fn export_source(&self, r: &OutputRef) -> Result<&str> {
        let group = self
            .stacks
            .get(&r.stack)
            .ok_or_else(|| PlanError::UnknownStack(r.stack.clone()))?;
        group
            .exports
            .get(&r.export)
            .map(|spec| spec.node.as_str())
            .ok_or_else(|| PlanError::UnknownExport {
                stack: r.stack.clone(),
                export: r.export.clone(),
            })
    }
}

/// Kahn's algorithm over `(stack, depends_on)` pairs. Dependencies on
/// undeclared stacks are ignored. On a cycle, returns the stacks left
/// unordered, in declaration order.
pub(crate) fn order_stacks(
    stacks: &[(&str, Vec<&str>)],
) -> std::result::Result<Vec<String>, Vec<String>> {
    let declared: IndexSet<&str> = stacks.iter().map(|(name, _)| *name).collect();
    let mut remaining: Vec<(&str, IndexSet<&str>)> = stacks
        .iter()
        .map(|(name, deps)| {
            let deps = deps.iter().copied().filter(|d| declared.contains(d)).collect();
            (*name, deps)
        })
        .collect();

    let mut order = Vec::with_capacity(remaining.len());
    while let Some(pos) = remaining.iter().position(|(_, deps)| deps.is_empty()) {
        let (name, _) = remaining.remove(pos);
        for (_, deps) in remaining.iter_mut() {
            deps.shift_remove(name);
        }
        order.push(name.to_string());
    }

    if remaining.is_empty() {
        Ok(order)
    } else {
        Err(remaining.into_iter().map(|(name, _)| name.to_string()).collect())
    }
}
