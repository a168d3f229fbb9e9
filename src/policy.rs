//! Retention policy store with validation and durable persistence

use crate::error::{LifecycleError, Result};
use crate::models::{RetentionAction, RetentionPolicy};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use tempfile::NamedTempFile;
use tracing::{info, warn};

/// Named retention policies, persisted as JSON and reloaded at startup.
///
/// Every mutation validates first; an invalid policy never reaches the map
/// or the disk. Disabling is preferred over deletion so the audit history
/// of a selector survives.
pub struct PolicyStore {
    policies: RwLock<BTreeMap<String, RetentionPolicy>>,
    path: PathBuf,
}

impl PolicyStore {
    /// Open the store, loading any previously persisted policies.
    pub fn open(path: PathBuf) -> Result<Self> {
        let policies = match std::fs::read(&path) {
            Ok(bytes) => {
                let list: Vec<RetentionPolicy> = serde_json::from_slice(&bytes)?;
                info!(count = list.len(), "Loaded persisted retention policies");
                list.into_iter().map(|p| (p.name.clone(), p)).collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            policies: RwLock::new(policies),
            path,
        })
    }

    /// Validation errors for a policy; empty means valid.
    ///
    /// Checks run against the current policy set, so conflicting-action
    /// detection sees every other enabled policy.
    pub fn validate(&self, policy: &RetentionPolicy) -> Vec<String> {
        let mut errors = Vec::new();

        if policy.name.trim().is_empty() {
            errors.push("policy name must be non-empty".to_string());
        }
        if policy.dataset_selector.trim().is_empty() {
            errors.push("dataset selector must be non-empty".to_string());
        }
        if policy.retention_seconds <= 0 {
            errors.push("retention duration must be positive".to_string());
        }
        if policy.action == RetentionAction::Downsample && policy.stat_kind.is_none() {
            errors.push("downsample policies must declare a statistic kind".to_string());
        }

        if policy.enabled {
            let policies = self.policies.read();
            for other in policies.values() {
                if other.name != policy.name
                    && other.enabled
                    && other.dataset_selector == policy.dataset_selector
                    && other.action != policy.action
                {
                    errors.push(format!(
                        "enabled policy '{}' already targets selector '{}' with a conflicting action",
                        other.name, other.dataset_selector
                    ));
                }
            }
        }

        errors
    }

    /// Add a new policy. Fails with `InvalidPolicy` on any validation error
    /// or a duplicate name.
    pub fn add(&self, policy: RetentionPolicy) -> Result<()> {
        let errors = self.validate(&policy);
        if !errors.is_empty() {
            return Err(LifecycleError::InvalidPolicy(errors.join("; ")));
        }
        {
            let mut policies = self.policies.write();
            if policies.contains_key(&policy.name) {
                return Err(LifecycleError::InvalidPolicy(format!(
                    "policy '{}' already exists",
                    policy.name
                )));
            }
            policies.insert(policy.name.clone(), policy);
        }
        self.persist()
    }

    /// Replace an existing policy. Fails with `NotFound` for unknown names.
    pub fn update(&self, policy: RetentionPolicy) -> Result<()> {
        let errors = self.validate(&policy);
        if !errors.is_empty() {
            return Err(LifecycleError::InvalidPolicy(errors.join("; ")));
        }
        {
            let mut policies = self.policies.write();
            if !policies.contains_key(&policy.name) {
                return Err(LifecycleError::NotFound(format!(
                    "policy '{}'",
                    policy.name
                )));
            }
            policies.insert(policy.name.clone(), policy);
        }
        self.persist()
    }

    /// Remove a policy by name.
    pub fn remove(&self, name: &str) -> Result<()> {
        {
            let mut policies = self.policies.write();
            if policies.remove(name).is_none() {
                return Err(LifecycleError::NotFound(format!("policy '{}'", name)));
            }
        }
        warn!(name, "Retention policy removed; prefer disabling for audit history");
        self.persist()
    }

    /// All policies, sorted by name.
    pub fn list(&self) -> Vec<RetentionPolicy> {
        self.policies.read().values().cloned().collect()
    }

    /// Enabled policies only, the set the tier engine evaluates.
    pub fn enabled(&self) -> Vec<RetentionPolicy> {
        self.policies
            .read()
            .values()
            .filter(|p| p.enabled)
            .cloned()
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<RetentionPolicy> {
        self.policies.read().get(name).cloned()
    }

    /// Replace the whole policy set, used by restore. Still persists
    /// atomically; the caller has already validated the snapshot.
    pub fn replace_all(&self, list: Vec<RetentionPolicy>) -> Result<()> {
        {
            let mut policies = self.policies.write();
            *policies = list.into_iter().map(|p| (p.name.clone(), p)).collect();
        }
        self.persist()
    }

    /// Write the policy list to disk via temp-file rename, so a crash
    /// mid-write never leaves a truncated file.
    fn persist(&self) -> Result<()> {
        let list = self.list();
        let json = serde_json::to_vec_pretty(&list)?;

        let parent = self
            .path
            .parent()
            .ok_or_else(|| LifecycleError::Internal("policies path has no parent".to_string()))?;
        std::fs::create_dir_all(parent)?;

        let mut temp = NamedTempFile::new_in(parent)?;
        temp.write_all(&json)?;
        temp.persist(&self.path)
            .map_err(|e| LifecycleError::Internal(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StatKind;
    use tempfile::TempDir;

    fn policy(name: &str, selector: &str, retention_days: i64) -> RetentionPolicy {
        RetentionPolicy {
            name: name.to_string(),
            dataset_selector: selector.to_string(),
            retention_seconds: retention_days * 86_400,
            action: RetentionAction::Downsample,
            stat_kind: Some(StatKind::Mean),
            enabled: true,
        }
    }

    fn store(dir: &TempDir) -> PolicyStore {
        PolicyStore::open(dir.path().join("policies.json")).unwrap()
    }

    #[test]
    fn test_validate_rejects_empty_name() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let errors = store.validate(&policy("", "events", 7));
        assert!(errors.iter().any(|e| e.contains("name")));
    }

    #[test]
    fn test_validate_rejects_nonpositive_retention() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        assert!(!store.validate(&policy("p", "events", 0)).is_empty());
        assert!(!store.validate(&policy("p", "events", -7)).is_empty());
        assert!(store.validate(&policy("p", "events", 7)).is_empty());
    }

    #[test]
    fn test_downsample_requires_stat_kind() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let mut p = policy("p", "events", 7);
        p.stat_kind = None;
        assert!(!store.validate(&p).is_empty());

        p.action = RetentionAction::Delete;
        assert!(store.validate(&p).is_empty());
    }

    #[test]
    fn test_add_rejects_invalid_and_duplicate() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let err = store.add(policy("p", "events", -1)).unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidPolicy(_)));

        store.add(policy("p", "events", 7)).unwrap();
        let err = store.add(policy("p", "events", 14)).unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidPolicy(_)));
    }

    #[test]
    fn test_conflicting_actions_on_same_selector_rejected() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.add(policy("downsample-events", "events", 7)).unwrap();

        let mut conflicting = policy("delete-events", "events", 30);
        conflicting.action = RetentionAction::Delete;
        conflicting.stat_kind = None;
        let err = store.add(conflicting).unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidPolicy(_)));

        // Same action on the same selector is allowed
        store.add(policy("downsample-events-2", "events", 14)).unwrap();
    }

    #[test]
    fn test_disabled_policy_never_conflicts() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.add(policy("downsample-events", "events", 7)).unwrap();

        let mut disabled = policy("delete-events", "events", 30);
        disabled.action = RetentionAction::Delete;
        disabled.stat_kind = None;
        disabled.enabled = false;
        store.add(disabled).unwrap();
    }

    #[test]
    fn test_remove_unknown_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let err = store.remove("ghost").unwrap_err();
        assert!(matches!(err, LifecycleError::NotFound(_)));
    }

    #[test]
    fn test_update_unknown_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let err = store.update(policy("ghost", "events", 7)).unwrap_err();
        assert!(matches!(err, LifecycleError::NotFound(_)));
    }

    #[test]
    fn test_policies_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("policies.json");
        {
            let store = PolicyStore::open(path.clone()).unwrap();
            store.add(policy("raw-7d", "events", 7)).unwrap();
        }
        let reopened = PolicyStore::open(path).unwrap();
        let list = reopened.list();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].name, "raw-7d");
    }
}
