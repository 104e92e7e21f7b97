//! Single-flight deployment locks
//!
//! Process-local only: at most one attempt per project runs inside this
//! daemon. Nothing is persisted, so a crash releases every lock.

use std::collections::HashSet;
use std::sync::Mutex;

type ProjectKey = (String, String);

#[derive(Debug, Default)]
pub struct DeployLocks {
    held: Mutex<HashSet<ProjectKey>>,
}

impl DeployLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock of a project, or `None` when an attempt is in flight
    pub fn try_acquire(&self, owner: &str, project: &str) -> Option<DeployGuard<'_>> {
        let key = (owner.to_string(), project.to_string());
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        if !held.insert(key.clone()) {
            return None;
        }
        Some(DeployGuard { locks: self, key })
    }

    pub fn is_locked(&self, owner: &str, project: &str) -> bool {
        let held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        held.contains(&(owner.to_string(), project.to_string()))
    }
}

/// Releases the project lock on drop, whatever path the attempt took
#[derive(Debug)]
pub struct DeployGuard<'a> {
    locks: &'a DeployLocks,
    key: ProjectKey,
}

impl Drop for DeployGuard<'_> {
    fn drop(&mut self) {
        let mut held = self.locks.held.lock().unwrap_or_else(|e| e.into_inner());
        held.remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_flight_per_project() {
        let locks = DeployLocks::new();
        let guard = locks.try_acquire("alice", "blog").unwrap();
        assert!(locks.try_acquire("alice", "blog").is_none());
        assert!(locks.try_acquire("alice", "shop").is_some());
        assert!(locks.is_locked("alice", "blog"));

        drop(guard);
        assert!(!locks.is_locked("alice", "blog"));
        assert!(locks.try_acquire("alice", "blog").is_some());
    }
}
