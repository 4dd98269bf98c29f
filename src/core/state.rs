//! Lock file management: load, save (atomic), path derivation, and folding a
//! planning pass back into last-applied state.

use super::planner::PriorState;
use super::stack::StackSet;
use super::types::{NodeLock, NodeState, PlanAction, PlanReport, ResourceStatus, StateLock};
use crate::tripwire::eventlog::now_iso8601;
use indexmap::IndexMap;
use std::path::{Path, PathBuf};

/// Derive the lock file path for a stack within the state directory.
pub fn lock_file_path(state_dir: &Path, stack: &str) -> PathBuf {
    state_dir.join(stack).join("state.lock.yaml")
}

/// Load a stack's lock file. Returns None if the file doesn't exist.
pub fn load_lock(state_dir: &Path, stack: &str) -> Result<Option<StateLock>, String> {
    let path = lock_file_path(state_dir, stack);
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    let lock: StateLock = serde_yaml_ng::from_str(&content)
        .map_err(|e| format!("invalid lock file {}: {}", path.display(), e))?;
    Ok(Some(lock))
}

/// Save a lock file atomically (write to temp, then rename).
pub fn save_lock(state_dir: &Path, lock: &StateLock) -> Result<(), String> {
    let path = lock_file_path(state_dir, &lock.stack);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("cannot create dir {}: {}", parent.display(), e))?;
    }

    let yaml = serde_yaml_ng::to_string(lock).map_err(|e| format!("serialize error: {}", e))?;

    let tmp_path = path.with_extension("lock.yaml.tmp");
    std::fs::write(&tmp_path, &yaml)
        .map_err(|e| format!("cannot write {}: {}", tmp_path.display(), e))?;
    std::fs::rename(&tmp_path, &path).map_err(|e| {
        format!(
            "cannot rename {} → {}: {}",
            tmp_path.display(),
            path.display(),
            e
        )
    })?;

    Ok(())
}

/// Create a new empty StateLock for a stack.
pub fn new_lock(stack: &str) -> StateLock {
    StateLock {
        schema: "1.0".to_string(),
        stack: stack.to_string(),
        generated_at: now_iso8601(),
        generator: format!("plinth {}", env!("CARGO_PKG_VERSION")),
        blake3_version: "1.8".to_string(),
        resources: IndexMap::new(),
    }
}

/// Load (or start) the lock of every declared stack, in declaration order.
pub fn load_locks(state_dir: &Path, stacks: &StackSet) -> Result<IndexMap<String, StateLock>, String> {
    let mut locks = IndexMap::new();
    for stack in stacks.stacks() {
        let lock = load_lock(state_dir, &stack.name)?.unwrap_or_else(|| new_lock(&stack.name));
        locks.insert(stack.name.clone(), lock);
    }
    Ok(locks)
}

/// Flatten per-stack locks into one node-keyed prior state.
pub fn prior_state(locks: &IndexMap<String, StateLock>) -> PriorState {
    locks
        .values()
        .flat_map(|lock| lock.resources.iter())
        .map(|(id, entry)| (id.clone(), entry.clone()))
        .collect()
}

/// Fold the outcome of a pass into a stack's lock.
///
/// Materialized nodes become converged with their new hash and attributes;
/// failed nodes are marked failed but keep their last attributes (a node that
/// failed before hashing and was never applied gets no entry). Everything
/// else, including entries for nodes no longer declared, is left untouched.
pub fn record_report(lock: &mut StateLock, report: &PlanReport) {
    let applied_at = now_iso8601();
    for entry in report.entries.iter().filter(|e| e.stack == lock.stack) {
        match entry.new_state {
            NodeState::Materialized if entry.action != Some(PlanAction::NoOp) => {
                lock.resources.insert(
                    entry.node_id.clone(),
                    NodeLock {
                        kind: entry.kind,
                        status: ResourceStatus::Converged,
                        applied_at: Some(applied_at.clone()),
                        duration_seconds: Some(entry.duration_seconds),
                        hash: entry.hash.clone().unwrap_or_default(),
                        attributes: entry.attributes.clone(),
                    },
                );
            }
            NodeState::Failed => {
                let prev = lock.resources.get(&entry.node_id);
                // Failed before its desired state was known: nothing to record
                if prev.is_none() && entry.hash.is_none() {
                    continue;
                }
                let hash = entry
                    .hash
                    .clone()
                    .or_else(|| prev.map(|p| p.hash.clone()))
                    .unwrap_or_default();
                let attributes = prev.map(|p| p.attributes.clone()).unwrap_or_default();
                lock.resources.insert(
                    entry.node_id.clone(),
                    NodeLock {
                        kind: entry.kind,
                        status: ResourceStatus::Failed,
                        applied_at: Some(applied_at.clone()),
                        duration_seconds: Some(entry.duration_seconds),
                        hash,
                        attributes,
                    },
                );
            }
            _ => {}
        }
    }
    lock.generated_at = applied_at;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::stack::StackGroup;
    use crate::core::types::{Attributes, ReportEntry, ResourceKind, ResourceNode};

    fn node_lock(kind: ResourceKind, hash: &str, attrs: &[(&str, &str)]) -> NodeLock {
        NodeLock {
            kind,
            status: ResourceStatus::Converged,
            applied_at: Some("2026-02-16T14:00:00Z".to_string()),
            duration_seconds: Some(1.5),
            hash: hash.to_string(),
            attributes: attrs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    fn make_lock() -> StateLock {
        let mut lock = new_lock("static-website");
        lock.resources.insert(
            "site".to_string(),
            node_lock(ResourceKind::Storage, "blake3:abc123", &[("bucket_name", "example.com")]),
        );
        lock
    }

    fn entry(id: &str, new_state: NodeState, action: Option<PlanAction>) -> ReportEntry {
        ReportEntry {
            node_id: id.to_string(),
            stack: "static-website".to_string(),
            kind: ResourceKind::Storage,
            previous_state: NodeState::Pending,
            new_state,
            action,
            error: None,
            blocked_by: None,
            hash: Some(format!("blake3:{}", id)),
            attributes: Attributes::from([("bucket_name".to_string(), format!("{}.new", id))]),
            duration_seconds: 0.25,
        }
    }

    #[test]
    fn test_lock_file_path() {
        let p = lock_file_path(Path::new("/state"), "cloudfront");
        assert_eq!(p, PathBuf::from("/state/cloudfront/state.lock.yaml"));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        save_lock(dir.path(), &make_lock()).unwrap();

        let loaded = load_lock(dir.path(), "static-website").unwrap().unwrap();
        assert_eq!(loaded.stack, "static-website");
        assert_eq!(loaded.resources.len(), 1);
        let site = &loaded.resources["site"];
        assert_eq!(site.status, ResourceStatus::Converged);
        assert_eq!(site.kind, ResourceKind::Storage);
        assert_eq!(site.attributes["bucket_name"], "example.com");
    }

    #[test]
    fn test_load_nonexistent() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_lock(dir.path(), "ghost").unwrap().is_none());
    }

    #[test]
    fn test_load_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = lock_file_path(dir.path(), "broken");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "resources: [not, a, map").unwrap();
        let err = load_lock(dir.path(), "broken").unwrap_err();
        assert!(err.contains("invalid lock file"));
    }

    #[test]
    fn test_atomic_write() {
        let dir = tempfile::tempdir().unwrap();
        save_lock(dir.path(), &make_lock()).unwrap();

        let tmp = dir
            .path()
            .join("static-website")
            .join("state.lock.yaml.tmp");
        assert!(!tmp.exists());
        assert!(lock_file_path(dir.path(), "static-website").exists());
    }

    #[test]
    fn test_new_lock() {
        let lock = new_lock("cloudfront");
        assert_eq!(lock.stack, "cloudfront");
        assert!(lock.generator.starts_with("plinth "));
        assert!(lock.generated_at.contains('T'));
        assert!(lock.resources.is_empty());
    }

    #[test]
    fn test_roundtrip_preserves_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut lock = make_lock();
        lock.resources.insert(
            "aaa-first".to_string(),
            node_lock(ResourceKind::AccessIdentity, "blake3:xxx", &[]),
        );
        save_lock(dir.path(), &lock).unwrap();
        let loaded = load_lock(dir.path(), "static-website").unwrap().unwrap();
        let keys: Vec<_> = loaded.resources.keys().collect();
        assert_eq!(keys, vec!["site", "aaa-first"]);
    }

    #[test]
    fn test_load_locks_and_prior_state() {
        let dir = tempfile::tempdir().unwrap();
        save_lock(dir.path(), &make_lock()).unwrap();

        let mut stacks = StackSet::new();
        stacks.add_stack(StackGroup::new("static-website")).unwrap();
        stacks.add_stack(StackGroup::new("cloudfront")).unwrap();
        stacks
            .add_node("cloudfront", ResourceNode::new("cert", ResourceKind::Certificate))
            .unwrap();

        let locks = load_locks(dir.path(), &stacks).unwrap();
        let names: Vec<_> = locks.keys().collect();
        assert_eq!(names, vec!["static-website", "cloudfront"]);
        assert!(locks["cloudfront"].resources.is_empty());

        let prior = prior_state(&locks);
        assert_eq!(prior.len(), 1);
        assert_eq!(prior["site"].hash, "blake3:abc123");
    }

    #[test]
    fn test_record_report() {
        let mut lock = make_lock();
        lock.resources.insert(
            "retired".to_string(),
            node_lock(ResourceKind::Storage, "blake3:old", &[]),
        );
        lock.resources.insert(
            "oai".to_string(),
            node_lock(ResourceKind::AccessIdentity, "blake3:oai", &[("identity_id", "E1")]),
        );

        lock.resources.insert(
            "site-unhashed".to_string(),
            node_lock(ResourceKind::Storage, "blake3:abc123", &[]),
        );

        let mut other_stack = entry("dist", NodeState::Materialized, Some(PlanAction::Create));
        other_stack.stack = "cloudfront".to_string();
        let mut unhashed = entry("unhashed", NodeState::Failed, Some(PlanAction::Create));
        unhashed.hash = None;
        let mut site_unhashed = entry("site-unhashed", NodeState::Failed, None);
        site_unhashed.hash = None;
        let report = PlanReport {
            entries: vec![
                entry("site", NodeState::Materialized, Some(PlanAction::Update)),
                entry("oai", NodeState::Failed, Some(PlanAction::Update)),
                entry("logs", NodeState::Materialized, Some(PlanAction::NoOp)),
                entry("cert", NodeState::Cancelled, None),
                other_stack,
                unhashed,
                site_unhashed,
            ],
            ..PlanReport::default()
        };
        record_report(&mut lock, &report);

        let site = &lock.resources["site"];
        assert_eq!(site.status, ResourceStatus::Converged);
        assert_eq!(site.hash, "blake3:site");
        assert_eq!(site.attributes["bucket_name"], "site.new");

        let oai = &lock.resources["oai"];
        assert_eq!(oai.status, ResourceStatus::Failed);
        assert_eq!(oai.attributes["identity_id"], "E1");

        assert!(lock.resources.contains_key("retired"));
        assert!(!lock.resources.contains_key("unhashed"));
        assert_eq!(lock.resources["site-unhashed"].status, ResourceStatus::Failed);
        assert_eq!(lock.resources["site-unhashed"].hash, "blake3:abc123");
        assert!(!lock.resources.contains_key("logs"));
        assert!(!lock.resources.contains_key("cert"));
        assert!(!lock.resources.contains_key("dist"));
    }
}
