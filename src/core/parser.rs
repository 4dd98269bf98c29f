//! YAML parsing, validation, and stack construction.
//!
//! Parses plinth.yaml and validates structural constraints:
//! - Version must be "1.0"
//! - Stack and resource IDs are well-formed; resource IDs are unique across stacks
//! - depends_on references (resource and stack level) must exist
//! - Stack dependencies are acyclic
//! - `ref` targets live in the same stack, `import` targets are declared exports
//! - Required params per resource kind

use super::resolver::resolve_node_templates;
use super::stack::{order_stacks, StackGroup, StackSet};
use super::types::*;
use crate::resources;
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;

// Stack names and resource IDs
static ID_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9_-]*$").unwrap());

/// Validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Parse a plinth.yaml file from disk.
pub fn parse_config_file(path: &Path) -> Result<PlinthConfig, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    parse_config(&content)
}

/// Parse a plinth.yaml from a string.
pub fn parse_config(yaml: &str) -> Result<PlinthConfig, String> {
    serde_yaml_ng::from_str(yaml).map_err(|e| format!("YAML parse error: {}", e))
}

/// Validate a parsed config. Returns a list of errors (empty = valid).
pub fn validate_config(config: &PlinthConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let mut push = |message: String| errors.push(ValidationError { message });

    if config.version != "1.0" {
        push(format!(
            "version must be \"1.0\", got \"{}\"",
            config.version
        ));
    }

    if config.name.is_empty() {
        push("name must not be empty".to_string());
    }

    if config.policy.concurrency == 0 {
        push("policy.concurrency must be at least 1".to_string());
    }

    // resource id -> owning stack
    let mut owners: HashMap<&str, &str> = HashMap::new();
    for (stack_name, stack) in &config.stacks {
        if !ID_PATTERN.is_match(stack_name) {
            push(format!("invalid stack name '{}'", stack_name));
        }
        for id in stack.resources.keys() {
            if !ID_PATTERN.is_match(id) {
                push(format!("invalid resource id '{}'", id));
            }
            if let Some(other) = owners.insert(id, stack_name) {
                push(format!(
                    "resource '{}' declared in both '{}' and '{}'",
                    id, other, stack_name
                ));
            }
        }
    }

    // Self-dependencies are reported on their own below
    let stack_deps: Vec<(&str, Vec<&str>)> = config
        .stacks
        .iter()
        .map(|(name, stack)| {
            let deps = stack
                .depends_on
                .iter()
                .map(String::as_str)
                .filter(|dep| dep != name)
                .collect();
            (name.as_str(), deps)
        })
        .collect();
    if let Err(cycle) = order_stacks(&stack_deps) {
        push(format!("stack dependency cycle among: {}", cycle.join(", ")));
    }

    for (stack_name, stack) in &config.stacks {
        for dep in &stack.depends_on {
            if dep == stack_name {
                push(format!("stack '{}' depends on itself", stack_name));
            } else if !config.stacks.contains_key(dep) {
                push(format!(
                    "stack '{}' depends on unknown stack '{}'",
                    stack_name, dep
                ));
            }
        }

        for (export, decl) in &stack.exports {
            if !stack.resources.contains_key(&decl.resource) {
                push(format!(
                    "stack '{}' export '{}' references unknown resource '{}'",
                    stack_name, export, decl.resource
                ));
            }
            if decl.attribute.is_empty() {
                push(format!(
                    "stack '{}' export '{}' has no attribute",
                    stack_name, export
                ));
            }
        }

        for (id, resource) in &stack.resources {
            for dep in &resource.depends_on {
                if dep == id {
                    push(format!("resource '{}' depends on itself", id));
                } else if !owners.contains_key(dep.as_str()) {
                    push(format!(
                        "resource '{}' depends on unknown resource '{}'",
                        id, dep
                    ));
                }
            }

            let node = ResourceNode {
                id: id.clone(),
                kind: resource.kind,
                params: resource.params.clone(),
                depends_on: Default::default(),
            };
            let (refs, imports) = node.references();
            for r in refs {
                if r.resource == *id {
                    push(format!("resource '{}' references itself", id));
                } else if !stack.resources.contains_key(&r.resource) {
                    push(format!(
                        "resource '{}' references '{}' outside stack '{}'",
                        id, r.resource, stack_name
                    ));
                }
            }
            for i in imports {
                match config.stacks.get(&i.stack) {
                    None => push(format!(
                        "resource '{}' imports from unknown stack '{}'",
                        id, i.stack
                    )),
                    Some(_) if i.stack == *stack_name => push(format!(
                        "resource '{}' imports from its own stack; use ref instead",
                        id
                    )),
                    Some(source) if !source.exports.contains_key(&i.export) => push(format!(
                        "resource '{}' imports undeclared export '{}'",
                        id, i
                    )),
                    Some(_) => {}
                }
            }

            for message in resources::validate(id, resource.kind, &resource.params) {
                push(message);
            }
        }
    }

    errors
}

/// Turn a validated config into stacks: templates expanded, nodes added,
/// exports and stack dependencies declared.
pub fn build_stacks(config: &PlinthConfig) -> Result<StackSet, String> {
    let mut set = StackSet::new();

    for (stack_name, spec) in &config.stacks {
        let mut group = StackGroup::new(stack_name.clone());
        group.description = spec.description.clone();
        for dep in &spec.depends_on {
            group.add_dependency(dep.clone());
        }
        set.add_stack(group).map_err(|e| e.to_string())?;

        for (id, resource) in &spec.resources {
            let mut node = ResourceNode::new(id.clone(), resource.kind);
            node.params = resource.params.clone();
            node.depends_on = resource.depends_on.iter().cloned().collect();
            let node = resolve_node_templates(&node, &config.params, stack_name)?;
            set.add_node(stack_name, node).map_err(|e| e.to_string())?;
        }

        let group = set
            .stack_mut(stack_name)
            .ok_or_else(|| format!("stack '{}' vanished", stack_name))?;
        for (export, decl) in &spec.exports {
            group
                .export(export, &decl.resource, &decl.attribute)
                .map_err(|e| format!("stack '{}' export '{}': {}", stack_name, export, e))?;
        }
    }

    Ok(set)
}

/// Parse, validate, and build stacks in one step.
///
/// Relative deployment sources are resolved against the config file's
/// directory and must exist.
pub fn load_stacks(path: &Path) -> Result<(PlinthConfig, StackSet), String> {
    let config = parse_config_file(path)?;
    let errors = validate_config(&config);
    if !errors.is_empty() {
        return Err(validation_failure(path, &errors));
    }
    let mut stacks = build_stacks(&config)?;
    let errors = anchor_sources(&mut stacks, config_dir(path));
    if !errors.is_empty() {
        return Err(validation_failure(path, &errors));
    }
    Ok((config, stacks))
}

fn validation_failure(path: &Path, errors: &[ValidationError]) -> String {
    let lines: Vec<String> = errors.iter().map(|e| format!("  - {}", e)).collect();
    format!(
        "{} has {} validation error(s):\n{}",
        path.display(),
        errors.len(),
        lines.join("\n")
    )
}

fn config_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    }
}

/// Rewrite literal deployment sources relative to `base`, reporting any
/// that do not exist.
fn anchor_sources(stacks: &mut StackSet, base: &Path) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    for node in stacks.nodes_mut() {
        if node.kind != ResourceKind::Deployment {
            continue;
        }
        let Some(source) = node.params.get("source").and_then(ParamValue::as_str) else {
            continue;
        };
        let anchored = base.join(source);
        if !anchored.exists() {
            errors.push(ValidationError {
                message: format!(
                    "resource '{}' (deployment): source {} does not exist",
                    node.id,
                    anchored.display()
                ),
            });
            continue;
        }
        let anchored = anchored.to_string_lossy().into_owned();
        node.params
            .insert("source".to_string(), ParamValue::string(anchored));
    }
    errors
}
