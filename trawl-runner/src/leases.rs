//! Process-scoped task leases
//!
//! Records which `(job, url)` tasks are owned by a live scheduler in this
//! process. A `running` task without a lease has no owner here and is fair
//! game for recovery. Created once per controller and shared by clone.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use uuid::Uuid;

type TaskKey = (Uuid, String);

#[derive(Clone, Default)]
pub struct TaskLeases {
    held: Arc<Mutex<HashSet<TaskKey>>>,
}

/// Ownership of one task; released on drop
#[derive(Debug)]
pub struct LeaseGuard {
    held: Arc<Mutex<HashSet<TaskKey>>>,
    key: TaskKey,
}

impl TaskLeases {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the lease, or `None` if another owner holds it
    pub fn acquire(&self, job_id: Uuid, url: &str) -> Option<LeaseGuard> {
        let key = (job_id, url.to_string());
        if !lock(&self.held).insert(key.clone()) {
            return None;
        }
        Some(LeaseGuard {
            held: Arc::clone(&self.held),
            key,
        })
    }

    pub fn is_leased(&self, job_id: Uuid, url: &str) -> bool {
        lock(&self.held).contains(&(job_id, url.to_string()))
    }

    /// Number of leases currently held for `job_id`
    pub fn count_for(&self, job_id: Uuid) -> usize {
        lock(&self.held).iter().filter(|(id, _)| *id == job_id).count()
    }
}

impl LeaseGuard {
    pub fn url(&self) -> &str {
        &self.key.1
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        lock(&self.held).remove(&self.key);
    }
}

fn lock(held: &Mutex<HashSet<TaskKey>>) -> MutexGuard<'_, HashSet<TaskKey>> {
    held.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_is_exclusive_until_dropped() {
        let leases = TaskLeases::new();
        let job = Uuid::new_v4();

        let guard = leases.acquire(job, "https://a.test").unwrap();
        assert_eq!(guard.url(), "https://a.test");
        assert!(leases.acquire(job, "https://a.test").is_none());
        assert!(leases.is_leased(job, "https://a.test"));
        assert!(!leases.is_leased(Uuid::new_v4(), "https://a.test"));

        drop(guard);
        assert!(!leases.is_leased(job, "https://a.test"));
        assert_eq!(leases.count_for(job), 0);
    }

    #[test]
    fn test_clones_share_state() {
        let leases = TaskLeases::new();
        let other = leases.clone();
        let job = Uuid::new_v4();

        let _guard = leases.acquire(job, "u").unwrap();
        assert!(other.is_leased(job, "u"));
        assert_eq!(other.count_for(job), 1);
    }
}
