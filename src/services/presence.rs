//! "N people viewing" counters per salon
//!
//! Process-local and rebuilt from scratch on restart. A viewer watches at
//! most one salon at a time.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::RwLock;

use super::broadcast::Gateway;
use crate::models::QueueEvent;

/// The two maps kept in lockstep
#[derive(Debug, Default)]
struct ViewerSets {
    by_salon: HashMap<i32, HashSet<String>>,
    by_viewer: HashMap<String, i32>,
}

impl ViewerSets {
    /// Drop `viewer` from `salon`, pruning the set when it empties.
    fn detach(&mut self, salon_id: i32, viewer: &str) -> usize {
        let Some(viewers) = self.by_salon.get_mut(&salon_id) else {
            return 0;
        };
        viewers.remove(viewer);
        let count = viewers.len();
        if count == 0 {
            self.by_salon.remove(&salon_id);
        }
        count
    }

    /// Returns the new count, and the salon left behind with its count
    fn join(&mut self, salon_id: i32, viewer: &str) -> (usize, Option<(i32, usize)>) {
        let previous = match self.by_viewer.insert(viewer.to_string(), salon_id) {
            Some(old) if old != salon_id => Some((old, self.detach(old, viewer))),
            _ => None,
        };
        let viewers = self.by_salon.entry(salon_id).or_default();
        viewers.insert(viewer.to_string());
        (viewers.len(), previous)
    }

    fn leave(&mut self, salon_id: i32, viewer: &str) -> usize {
        if self.by_viewer.get(viewer) == Some(&salon_id) {
            self.by_viewer.remove(viewer);
        }
        self.detach(salon_id, viewer)
    }

    fn remove(&mut self, viewer: &str) -> Option<(i32, usize)> {
        let salon_id = self.by_viewer.remove(viewer)?;
        Some((salon_id, self.detach(salon_id, viewer)))
    }

    fn count(&self, salon_id: i32) -> usize {
        self.by_salon.get(&salon_id).map(HashSet::len).unwrap_or(0)
    }
}

pub struct PresenceTracker {
    sets: RwLock<ViewerSets>,
    gateway: Arc<Gateway>,
}

impl PresenceTracker {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self {
            sets: RwLock::new(ViewerSets::default()),
            gateway,
        }
    }

    async fn announce(&self, salon_id: i32, count: usize) {
        self.gateway
            .broadcast_to_salon(salon_id, &QueueEvent::ViewerCount { salon_id, count })
            .await;
    }

    /// Start viewing a salon, leaving whatever salon the viewer was on before
    pub async fn join_view(&self, salon_id: i32, viewer: &str) -> usize {
        let (count, previous) = self.sets.write().await.join(salon_id, viewer);
        if let Some((old_salon, old_count)) = previous {
            self.announce(old_salon, old_count).await;
        }
        self.announce(salon_id, count).await;
        count
    }

    pub async fn leave_view(&self, salon_id: i32, viewer: &str) -> usize {
        let count = self.sets.write().await.leave(salon_id, viewer);
        self.announce(salon_id, count).await;
        count
    }

    /// Forget a viewer entirely (connection closed)
    pub async fn remove_viewer(&self, viewer: &str) -> Option<(i32, usize)> {
        let removed = self.sets.write().await.remove(viewer);
        if let Some((salon_id, count)) = removed {
            self.announce(salon_id, count).await;
        }
        removed
    }

    /// Salon the viewer is currently on
    pub async fn viewing(&self, viewer: &str) -> Option<i32> {
        self.sets.read().await.by_viewer.get(viewer).copied()
    }

    pub async fn viewer_count(&self, salon_id: i32) -> usize {
        self.sets.read().await.count(salon_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_salon_at_a_time() {
        let mut sets = ViewerSets::default();
        assert_eq!(sets.join(1, "a"), (1, None));
        assert_eq!(sets.join(1, "b"), (2, None));
        assert_eq!(sets.join(2, "a"), (1, Some((1, 1))));
        assert_eq!(sets.count(1), 1);
        assert_eq!(sets.count(2), 1);
    }

    #[test]
    fn test_empty_sets_are_pruned() {
        let mut sets = ViewerSets::default();
        sets.join(4, "a");
        assert_eq!(sets.remove("a"), Some((4, 0)));
        assert!(sets.by_salon.is_empty());
        assert!(sets.by_viewer.is_empty());
        assert_eq!(sets.remove("a"), None);
    }

    #[test]
    fn test_leave_other_salon_keeps_current() {
        let mut sets = ViewerSets::default();
        sets.join(1, "a");
        assert_eq!(sets.leave(2, "a"), 0);
        assert_eq!(sets.by_viewer.get("a"), Some(&1));
        assert_eq!(sets.leave(1, "a"), 0);
        assert!(sets.by_viewer.is_empty());
    }

    #[tokio::test]
    async fn test_counts_are_broadcast() {
        let gateway = Arc::new(Gateway::new());
        let (conn, mut rx) = gateway.register().await;
        gateway.set_viewing(&conn, Some(3)).await;

        let presence = PresenceTracker::new(gateway.clone());
        assert_eq!(presence.join_view(3, &conn).await, 1);
        assert_eq!(presence.join_view(3, "someone-else").await, 2);

        let mut counts = Vec::new();
        while let Ok(axum::extract::ws::Message::Text(text)) = rx.try_recv() {
            let value: serde_json::Value = serde_json::from_str(&text).unwrap();
            counts.push(value["count"].as_u64().unwrap());
        }
        assert_eq!(counts, vec![1, 2]);
        assert_eq!(presence.viewer_count(3).await, 2);
    }
}
