//! Origin access identity: lets the CDN read a private bucket.

use crate::core::types::Attributes;
use crate::tripwire::hasher::short_digest;

pub const REQUIRED: &[&str] = &[];

pub fn describe(node_id: &str) -> String {
    format!("origin access identity for {}", node_id)
}

pub fn simulated_attributes(node_id: &str) -> Attributes {
    let identity_id = format!("E{}", short_digest(&format!("oai:{}", node_id), 13).to_uppercase());
    Attributes::from([
        (
            "path".to_string(),
            format!("origin-access-identity/cloudfront/{}", identity_id),
        ),
        (
            "canonical_user_id".to_string(),
            short_digest(&format!("oai-user:{}", node_id), 64),
        ),
        ("identity_id".to_string(), identity_id),
    ])
}
