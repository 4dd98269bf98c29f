//! TLS certificate for the site domain (plus alternative names).

use super::{check_one_of, display_param, resolved_str};
use crate::core::types::{yaml_value_to_string, Attributes, ParamValue, Params, ResolvedParams};
use crate::tripwire::hasher::short_digest;
use serde_yaml_ng::Value;

pub const REQUIRED: &[&str] = &["domain_name"];

const VALIDATION_METHODS: &[&str] = &["dns", "email"];

pub fn validate(params: &Params) -> Vec<String> {
    let mut errors = Vec::new();
    errors.extend(check_one_of(params, "validation", VALIDATION_METHODS));
    match params.get("subject_alternative_names") {
        None | Some(ParamValue::List(_)) => {}
        Some(_) => errors.push("subject_alternative_names must be a list".to_string()),
    }
    errors
}

pub fn describe(params: &Params) -> String {
    let mut out = format!("certificate for {}", display_param(params, "domain_name"));
    if let Some(ParamValue::List(names)) = params.get("subject_alternative_names") {
        out.push_str(&format!(" (+{} alternative names)", names.len()));
    }
    out
}

/// Every name the certificate covers, primary first.
pub fn covered_names(params: &ResolvedParams) -> Vec<String> {
    let mut names = vec![resolved_str(params, "domain_name")];
    if let Some(Value::Sequence(items)) = params.get("subject_alternative_names") {
        names.extend(items.iter().map(yaml_value_to_string));
    }
    names
}

pub fn simulated_attributes(node_id: &str, params: &ResolvedParams) -> Attributes {
    let names = covered_names(params);
    let digest = short_digest(&format!("cert:{}:{}", node_id, names.join(",")), 32);
    let uuid = format!(
        "{}-{}-{}-{}-{}",
        &digest[..8],
        &digest[8..12],
        &digest[12..16],
        &digest[16..20],
        &digest[20..32]
    );
    Attributes::from([
        (
            "arn".to_string(),
            format!("arn:aws:acm:us-east-1:000000000000:certificate/{}", uuid),
        ),
        ("domain_name".to_string(), names[0].clone()),
    ])
}
