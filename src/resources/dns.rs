//! DNS alias records pointing the domain at the distribution.

use super::{check_one_of, check_positive_int, display_param, resolved_str};
use crate::core::types::{Attributes, Params, ResolvedParams};

pub const REQUIRED: &[&str] = &["record_name", "record_type", "target"];

const RECORD_TYPES: &[&str] = &["A", "AAAA", "CNAME"];

pub fn validate(params: &Params) -> Vec<String> {
    let mut errors = Vec::new();
    errors.extend(check_one_of(params, "record_type", RECORD_TYPES));
    errors.extend(check_positive_int(params, "ttl"));
    errors
}

pub fn describe(params: &Params) -> String {
    format!(
        "{} {} -> {}",
        display_param(params, "record_type"),
        display_param(params, "record_name"),
        display_param(params, "target")
    )
}

/// Fully qualified name with the trailing root dot.
pub fn fqdn(record_name: &str) -> String {
    if record_name.ends_with('.') {
        record_name.to_string()
    } else {
        format!("{}.", record_name)
    }
}

pub fn simulated_attributes(params: &ResolvedParams) -> Attributes {
    Attributes::from([
        ("fqdn".to_string(), fqdn(&resolved_str(params, "record_name"))),
        ("record_type".to_string(), resolved_str(params, "record_type")),
    ])
}
