//! Object storage bucket (site content, access logs).

use super::{check_bool, check_one_of, check_positive_int, display_param, literal_str, resolved_str};
use crate::core::types::{Attributes, Params, ResolvedParams};

pub const REQUIRED: &[&str] = &["bucket_name"];

/// Lifecycle of the bucket once it is no longer declared.
const REMOVAL_POLICIES: &[&str] = &["retain", "destroy"];

pub fn validate(params: &Params) -> Vec<String> {
    let mut errors = Vec::new();
    if let Some(name) = literal_str(params, "bucket_name") {
        if let Some(msg) = check_bucket_name(name) {
            errors.push(msg);
        }
    }
    errors.extend(check_one_of(params, "removal_policy", REMOVAL_POLICIES));
    errors.extend(check_bool(params, "versioned"));
    errors.extend(check_bool(params, "block_public_access"));
    errors.extend(check_positive_int(params, "expiration_days"));
    errors
}

/// Bucket names: 3-63 chars of lowercase letters, digits, dots and hyphens,
/// starting and ending with a letter or digit.
fn check_bucket_name(name: &str) -> Option<String> {
    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '.' || c == '-');
    let valid_edges = name
        .chars()
        .next()
        .zip(name.chars().last())
        .is_some_and(|(a, b)| a.is_ascii_alphanumeric() && b.is_ascii_alphanumeric());
    if (3..=63).contains(&name.len()) && valid_chars && valid_edges {
        None
    } else {
        Some(format!("invalid bucket name '{}'", name))
    }
}

pub fn describe(params: &Params) -> String {
    let mut out = format!("bucket {}", display_param(params, "bucket_name"));
    if params.contains_key("access_logs_bucket") {
        out.push_str(&format!(
            " (logs -> {})",
            display_param(params, "access_logs_bucket")
        ));
    }
    if params.contains_key("expiration_days") {
        out.push_str(&format!(
            " expire after {}d",
            display_param(params, "expiration_days")
        ));
    }
    out
}

pub fn simulated_attributes(params: &ResolvedParams) -> Attributes {
    let name = resolved_str(params, "bucket_name");
    Attributes::from([
        ("arn".to_string(), format!("arn:aws:s3:::{}", name)),
        (
            "regional_domain_name".to_string(),
            format!("{}.s3.us-east-1.amazonaws.com", name),
        ),
        ("bucket_name".to_string(), name),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ParamValue;
    use serde_yaml_ng::Value;

    fn params(name: &str) -> Params {
        Params::from([("bucket_name".to_string(), ParamValue::string(name))])
    }

    #[test]
    fn test_valid_bucket_names() {
        for name in ["example.com", "logs-example-com", "a1b", "{{params.domain_name}}"] {
            assert!(validate(&params(name)).is_empty(), "{name}");
        }
    }

    #[test]
    fn test_invalid_bucket_names() {
        for name in ["ab", "Example.com", "-site", "site-", "under_score"] {
            assert!(!validate(&params(name)).is_empty(), "{name}");
        }
    }

    #[test]
    fn test_optional_param_checks() {
        let mut p = params("example.com");
        p.insert("removal_policy".into(), ParamValue::string("snapshot"));
        p.insert(
            "expiration_days".into(),
            ParamValue::Literal(Value::Number(180.into())),
        );
        let errors = validate(&p);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("removal_policy"));
    }

    #[test]
    fn test_describe() {
        let mut p = params("example.com");
        p.insert("access_logs_bucket".into(), ParamValue::attr("logs", "bucket_name"));
        assert_eq!(describe(&p), "bucket example.com (logs -> <logs.bucket_name>)");
    }

    #[test]
    fn test_simulated_attributes() {
        let resolved = ResolvedParams::from([(
            "bucket_name".to_string(),
            Value::String("example.com".into()),
        )]);
        let attrs = simulated_attributes(&resolved);
        assert_eq!(attrs["bucket_name"], "example.com");
        assert_eq!(attrs["arn"], "arn:aws:s3:::example.com");
        assert_eq!(
            attrs["regional_domain_name"],
            "example.com.s3.us-east-1.amazonaws.com"
        );
    }
}
