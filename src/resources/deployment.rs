//! Site-content deployment: copies a local source tree into the bucket and
//! invalidates CDN paths.

use super::{check_bool, display_param, resolved_str};
use crate::core::types::{Attributes, ParamValue, Params, ResolvedParams};
use crate::tripwire::hasher::{hash_path, short_digest};
use std::path::Path;

pub const REQUIRED: &[&str] = &["source", "destination_bucket"];

pub fn validate(params: &Params) -> Vec<String> {
    let mut errors = Vec::new();
    errors.extend(check_bool(params, "retain_on_delete"));
    match params.get("distribution_paths") {
        None => {}
        Some(ParamValue::List(paths)) => {
            for path in paths.iter().filter_map(ParamValue::as_str) {
                if !path.starts_with('/') {
                    errors.push(format!("distribution path '{}' must start with '/'", path));
                }
            }
        }
        Some(_) => errors.push("distribution_paths must be a list".to_string()),
    }
    errors
}

pub fn describe(params: &Params) -> String {
    format!(
        "deploy {} -> {}",
        display_param(params, "source"),
        display_param(params, "destination_bucket")
    )
}

/// Hash of the source tree. The source must exist locally.
pub fn source_hash(params: &ResolvedParams) -> Result<String, String> {
    let source = resolved_str(params, "source");
    if source.is_empty() {
        return Err("deployment source is empty".to_string());
    }
    let path = Path::new(&source);
    if !path.exists() {
        return Err(format!("deployment source {} does not exist", path.display()));
    }
    hash_path(path)
}

pub fn simulated_attributes(node_id: &str, params: &ResolvedParams) -> Result<Attributes, String> {
    let content_hash = source_hash(params)?;
    let deployment_id = format!(
        "deploy-{}",
        short_digest(&format!("{}:{}", node_id, content_hash), 12)
    );
    Ok(Attributes::from([
        ("deployment_id".to_string(), deployment_id),
        ("content_hash".to_string(), content_hash),
    ]))
}
