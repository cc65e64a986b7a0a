//! Named groups of scenarios that must not overlap.

use crate::features::PlannedScenario;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Tag prefix selecting an exclusive group.
pub const EXCLUSIVE_TAG_PREFIX: &str = "exclusive-";
/// Tag placing a scenario in the shared `serial` group.
pub const SERIAL_TAG: &str = "serial";

/// Exclusive group named by a scenario's tags, if any.
///
/// `@exclusive-<name>` wins over `@serial`.
#[must_use]
pub fn group_from_tags(scenario: &PlannedScenario) -> Option<String> {
    scenario
        .tags
        .iter()
        .find_map(|tag| tag.strip_prefix(EXCLUSIVE_TAG_PREFIX))
        .filter(|name| !name.is_empty())
        .map(str::to_owned)
        .or_else(|| scenario.has_tag(SERIAL_TAG).then(|| SERIAL_TAG.to_owned()))
}

/// One async mutex per group name, created on first use.
#[derive(Debug, Default, Clone)]
pub struct ExclusiveGroups {
    locks: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl ExclusiveGroups {
    /// Create an empty set of groups.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other scenario holds `group`, then hold it until the
    /// guard is dropped.
    pub async fn acquire(&self, group: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(group.to_owned()).or_default())
        };
        tracing::debug!(group, "waiting for exclusive group");
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn scenario(tags: &[&str]) -> PlannedScenario {
        PlannedScenario {
            feature: "f".to_owned(),
            name: "s".to_owned(),
            path: PathBuf::from("f.feature"),
            line: 1,
            tags: tags.iter().map(|t| (*t).to_owned()).collect(),
            steps: Vec::new(),
        }
    }

    #[rstest]
    #[case(&[], None)]
    #[case(&["serial"], Some("serial"))]
    #[case(&["exclusive-lessons", "serial"], Some("lessons"))]
    #[case(&["exclusive-"], None)]
    fn groups_come_from_tags(#[case] tags: &[&str], #[case] expected: Option<&str>) {
        assert_eq!(group_from_tags(&scenario(tags)).as_deref(), expected);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn same_group_never_overlaps() {
        let groups = ExclusiveGroups::new();
        let inside = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let groups = groups.clone();
                let inside = Arc::clone(&inside);
                let peak = Arc::clone(&peak);
                tokio::spawn(async move {
                    let _guard = groups.acquire("lessons").await;
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    inside.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        for task in tasks {
            task.await.expect("task");
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn different_groups_do_not_block() {
        let groups = ExclusiveGroups::new();
        let _first = groups.acquire("a").await;
        let second = tokio::time::timeout(Duration::from_millis(50), groups.acquire("b")).await;
        assert!(second.is_ok());
    }
}
