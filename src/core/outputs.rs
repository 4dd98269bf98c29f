//! Exported-attribute table for cross-stack references.
//!
//! Each export is a set-once slot. It fills when its source node is
//! materialized and never changes afterwards.

use super::error::{PlanError, Result};
use super::types::{Attributes, OutputRef};
use indexmap::IndexMap;

#[derive(Debug, Clone, PartialEq, Eq)]
struct ExportSlot {
    node: String,
    attribute: String,
    value: Option<String>,
    /// Source node has published at least once
    source_published: bool,
}

/// `stack -> export name -> slot`
#[derive(Debug, Clone, Default)]
pub struct ExportTable {
    slots: IndexMap<String, IndexMap<String, ExportSlot>>,
}

impl ExportTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an unresolved export. Re-registering an existing name is
    /// refused.
    pub fn declare(&mut self, stack: &str, export: &str, node: &str, attribute: &str) -> Result<()> {
        let exports = self.slots.entry(stack.to_string()).or_default();
        if exports.contains_key(export) {
            return Err(PlanError::DuplicateExport {
                stack: stack.to_string(),
                export: export.to_string(),
            });
        }
        exports.insert(
            export.to_string(),
            ExportSlot {
                node: node.to_string(),
                attribute: attribute.to_string(),
                value: None,
                source_published: false,
            },
        );
        Ok(())
    }

    /// Node that produces an export.
    pub fn source_of(&self, r: &OutputRef) -> Result<&str> {
        self.slot(r).map(|s| s.node.as_str())
    }

    fn slot(&self, r: &OutputRef) -> Result<&ExportSlot> {
        let exports = self
            .slots
            .get(&r.stack)
            .ok_or_else(|| PlanError::UnknownStack(r.stack.clone()))?;
        exports.get(&r.export).ok_or_else(|| PlanError::UnknownExport {
            stack: r.stack.clone(),
            export: r.export.clone(),
        })
    }

    /// Fill every still-empty slot sourced from `node` with the matching live
    /// attribute. Returns the exports resolved by this call. Slots whose
    /// attribute the backend did not report stay unresolved.
    pub fn publish(&mut self, node: &str, attributes: &Attributes) -> Vec<OutputRef> {
        let mut published = Vec::new();
        for (stack, exports) in &mut self.slots {
            for (name, slot) in exports.iter_mut() {
                if slot.node != node || slot.value.is_some() {
                    continue;
                }
                slot.source_published = true;
                if let Some(value) = attributes.get(&slot.attribute) {
                    slot.value = Some(value.clone());
                    published.push(OutputRef {
                        stack: stack.clone(),
                        export: name.clone(),
                    });
                }
            }
        }
        published
    }

    /// Read a resolved export.
    pub fn resolve(&self, r: &OutputRef) -> Result<&str> {
        let slot = self.slot(r)?;
        slot.value.as_deref().ok_or_else(|| {
            let reason = if slot.source_published {
                format!(
                    "resource '{}' did not report attribute '{}'",
                    slot.node, slot.attribute
                )
            } else {
                format!("exporting resource '{}' not materialized", slot.node)
            };
            PlanError::UnresolvedReference {
                stack: r.stack.clone(),
                export: r.export.clone(),
                reason,
            }
        })
    }

    pub fn is_resolved(&self, r: &OutputRef) -> bool {
        self.resolve(r).is_ok()
    }

    pub fn len(&self) -> usize {
        self.slots.values().map(IndexMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
