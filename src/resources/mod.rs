//! Resource kinds: per-kind validation, plan descriptions, and the live
//! attributes the simulated backend reports.
//!
//! Each kind module provides:
//! 1. `REQUIRED`: params that must be declared
//! 2. `validate`: extra checks on declared params (literals only; templates
//!    and placeholders are checked once resolved)
//! 3. `describe`: one-line summary for plan output
//! 4. `simulated_attributes`: deterministic attributes for a resolved node

pub mod certificate;
pub mod deployment;
pub mod distribution;
pub mod dns;
pub mod identity;
pub mod storage;

use crate::core::types::{
    yaml_value_to_string, Attributes, ParamValue, Params, ResolvedParams, ResourceKind,
    ResourceNode,
};
use serde_yaml_ng::Value;

/// Params every node of `kind` must declare.
pub fn required_params(kind: ResourceKind) -> &'static [&'static str] {
    match kind {
        ResourceKind::Storage => storage::REQUIRED,
        ResourceKind::AccessIdentity => identity::REQUIRED,
        ResourceKind::Certificate => certificate::REQUIRED,
        ResourceKind::CdnDistribution => distribution::REQUIRED,
        ResourceKind::DnsRecord => dns::REQUIRED,
        ResourceKind::Deployment => deployment::REQUIRED,
    }
}

/// Validate declared params. Returns human-readable problems (empty = valid).
pub fn validate(id: &str, kind: ResourceKind, params: &Params) -> Vec<String> {
    let mut errors: Vec<String> = required_params(kind)
        .iter()
        .filter(|key| !params.contains_key(**key))
        .map(|key| format!("resource '{}' ({}) has no {}", id, kind, key))
        .collect();

    let extra = match kind {
        ResourceKind::Storage => storage::validate(params),
        ResourceKind::AccessIdentity => Vec::new(),
        ResourceKind::Certificate => certificate::validate(params),
        ResourceKind::CdnDistribution => distribution::validate(params),
        ResourceKind::DnsRecord => dns::validate(params),
        ResourceKind::Deployment => deployment::validate(params),
    };
    errors.extend(
        extra
            .into_iter()
            .map(|msg| format!("resource '{}' ({}): {}", id, kind, msg)),
    );
    errors
}

/// One-line summary of a node for plan output.
pub fn describe(node: &ResourceNode) -> String {
    let p = &node.params;
    match node.kind {
        ResourceKind::Storage => storage::describe(p),
        ResourceKind::AccessIdentity => identity::describe(&node.id),
        ResourceKind::Certificate => certificate::describe(p),
        ResourceKind::CdnDistribution => distribution::describe(p),
        ResourceKind::DnsRecord => dns::describe(p),
        ResourceKind::Deployment => deployment::describe(p),
    }
}

/// Deterministic live attributes for a resolved node.
pub fn simulated_attributes(
    node_id: &str,
    kind: ResourceKind,
    params: &ResolvedParams,
) -> Result<Attributes, String> {
    match kind {
        ResourceKind::Storage => Ok(storage::simulated_attributes(params)),
        ResourceKind::AccessIdentity => Ok(identity::simulated_attributes(node_id)),
        ResourceKind::Certificate => Ok(certificate::simulated_attributes(node_id, params)),
        ResourceKind::CdnDistribution => Ok(distribution::simulated_attributes(node_id)),
        ResourceKind::DnsRecord => Ok(dns::simulated_attributes(params)),
        ResourceKind::Deployment => deployment::simulated_attributes(node_id, params),
    }
}

/// Extra desired-state input that lives outside the params (deployment
/// content). `None` for kinds without any.
///
/// When present it stands in for the `source` param, so moving the content
/// without changing it is not a change.
pub fn content_hash(kind: ResourceKind, params: &ResolvedParams) -> Result<Option<String>, String> {
    match kind {
        ResourceKind::Deployment => deployment::source_hash(params).map(Some),
        _ => Ok(None),
    }
}

/// Literal string param, or a `<placeholder>` label for display.
pub(crate) fn display_param(params: &Params, key: &str) -> String {
    match params.get(key) {
        Some(ParamValue::Literal(v)) => yaml_value_to_string(v),
        Some(ParamValue::Ref(r)) => format!("<{}.{}>", r.resource, r.attribute),
        Some(ParamValue::Import(i)) => format!("<import {}>", i),
        Some(ParamValue::List(items)) => format!("[{} items]", items.len()),
        Some(ParamValue::Map(_)) => "{...}".to_string(),
        None => "?".to_string(),
    }
}

/// Literal (template-free) string param, if any.
pub(crate) fn literal_str<'a>(params: &'a Params, key: &str) -> Option<&'a str> {
    params
        .get(key)
        .and_then(ParamValue::as_str)
        .filter(|s| !s.contains("{{"))
}

/// Resolved param rendered as a string (empty if absent).
pub(crate) fn resolved_str(params: &ResolvedParams, key: &str) -> String {
    params.get(key).map(yaml_value_to_string).unwrap_or_default()
}

/// Check an optional literal param against a closed set of values.
pub(crate) fn check_one_of(params: &Params, key: &str, allowed: &[&str]) -> Option<String> {
    let value = literal_str(params, key)?;
    if allowed.contains(&value) {
        None
    } else {
        Some(format!(
            "{} must be one of {}, got '{}'",
            key,
            allowed.join(", "),
            value
        ))
    }
}

/// Check an optional literal param is a boolean.
pub(crate) fn check_bool(params: &Params, key: &str) -> Option<String> {
    match params.get(key) {
        Some(ParamValue::Literal(Value::Bool(_))) | None => None,
        Some(ParamValue::Literal(Value::String(s))) if s.contains("{{") => None,
        Some(_) => Some(format!("{} must be true or false", key)),
    }
}

/// Check an optional literal param is a positive integer.
pub(crate) fn check_positive_int(params: &Params, key: &str) -> Option<String> {
    match params.get(key) {
        None => None,
        Some(ParamValue::Literal(Value::Number(n))) if n.as_u64().is_some_and(|v| v > 0) => None,
        Some(ParamValue::Literal(Value::String(s))) if s.contains("{{") => None,
        Some(_) => Some(format!("{} must be a positive integer", key)),
    }
}
