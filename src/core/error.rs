//! Graph construction and planning errors.

use super::types::ResourceKind;
use thiserror::Error;

/// Errors raised while building or walking the resource graph.
///
/// Everything except `ProvisioningFailure` is a static defect in the declared
/// graph and aborts the pass before (or instead of) further materialization.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error("duplicate resource id: {0}")]
    DuplicateId(String),

    #[error("unknown resource: {0}")]
    UnknownNode(String),

    #[error("dependency cycle detected: {}", .0.join(" -> "))]
    CycleDetected(Vec<String>),

    #[error("unresolved reference {stack}.{export}: {reason}")]
    UnresolvedReference {
        stack: String,
        export: String,
        reason: String,
    },

    #[error("{kind} '{node}' failed: {cause}")]
    ProvisioningFailure {
        node: String,
        kind: ResourceKind,
        cause: String,
    },

    #[error("unknown stack: {0}")]
    UnknownStack(String),

    #[error("stack '{stack}' has no export '{export}'")]
    UnknownExport { stack: String, export: String },

    #[error("stack '{stack}' exports '{export}' more than once")]
    DuplicateExport { stack: String, export: String },
}

pub type Result<T> = std::result::Result<T, PlanError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_lists_path() {
        let e = PlanError::CycleDetected(vec!["a".into(), "b".into(), "a".into()]);
        assert_eq!(e.to_string(), "dependency cycle detected: a -> b -> a");
    }

    #[test]
    fn test_unresolved_reference_message() {
        let e = PlanError::UnresolvedReference {
            stack: "web".into(),
            export: "bucket-id".into(),
            reason: "resource 'site' did not report attribute 'bucket_id'".into(),
        };
        assert_eq!(
            e.to_string(),
            "unresolved reference web.bucket-id: resource 'site' did not report attribute 'bucket_id'"
        );
    }

    #[test]
    fn test_provisioning_failure_message() {
        let e = PlanError::ProvisioningFailure {
            node: "cert".into(),
            kind: ResourceKind::Certificate,
            cause: "validation timed out".into(),
        };
        assert_eq!(e.to_string(), "certificate 'cert' failed: validation timed out");
    }
}
