use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

/// The result of recording a node condition.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ConditionChange {
    /// The condition had not been seen before for the node.
    New,

    /// The condition changed from a previously recorded status.
    Changed {
        /// The status recorded before this update.
        previous: String,
    },

    /// The condition already had the same status.
    Unchanged,
}

impl ConditionChange {
    /// Returns `true` if the update represents a transition worth reporting.
    ///
    /// Conditions seen for the first time are not transitions.
    pub fn is_transition(&self) -> bool {
        matches!(self, Self::Changed { .. })
    }
}

type ConditionMap = HashMap<String, HashMap<String, String>>;

/// Last observed status of each condition of each node.
///
/// The cache is owned by the orchestrator and handed to collectors through their
/// [`CycleContext`](crate::collector::CycleContext). All clones share the same underlying map.
#[derive(Clone, Debug, Default)]
pub struct NodeConditionCache {
    inner: Arc<Mutex<ConditionMap>>,
}

impl NodeConditionCache {
    /// Creates a new, empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ConditionMap> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records the status of a condition for a node, returning how it compares to the previously recorded status.
    pub fn update(&self, node: &str, condition: &str, status: &str) -> ConditionChange {
        let mut nodes = self.lock();
        let conditions = nodes.entry(node.to_string()).or_default();

        match conditions.get_mut(condition) {
            None => {
                conditions.insert(condition.to_string(), status.to_string());
                ConditionChange::New
            }
            Some(current) if current == status => ConditionChange::Unchanged,
            Some(current) => {
                let previous = std::mem::replace(current, status.to_string());
                ConditionChange::Changed { previous }
            }
        }
    }

    /// Returns the last recorded status of a condition for a node.
    pub fn get(&self, node: &str, condition: &str) -> Option<String> {
        self.lock().get(node).and_then(|conditions| conditions.get(condition)).cloned()
    }

    /// Forgets all conditions recorded for a node.
    pub fn remove_node(&self, node: &str) -> bool {
        self.lock().remove(node).is_some()
    }

    /// Forgets every node for which `keep` returns `false`.
    ///
    /// Used after a full node listing to drop nodes that have left the cluster.
    pub fn retain_nodes<F>(&self, mut keep: F)
    where
        F: FnMut(&str) -> bool,
    {
        self.lock().retain(|node, _| keep(node));
    }

    /// Returns the number of nodes with at least one recorded condition.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` if no node has a recorded condition.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_transitions() {
        let cache = NodeConditionCache::new();

        assert_eq!(cache.update("node-a", "Ready", "True"), ConditionChange::New);
        assert_eq!(cache.update("node-a", "Ready", "True"), ConditionChange::Unchanged);

        let change = cache.update("node-a", "Ready", "False");
        assert!(change.is_transition());
        assert_eq!(
            change,
            ConditionChange::Changed {
                previous: "True".to_string()
            }
        );
        assert_eq!(cache.get("node-a", "Ready").as_deref(), Some("False"));
    }

    #[test]
    fn clones_share_state() {
        let cache = NodeConditionCache::new();
        let handle = cache.clone();

        cache.update("node-a", "MemoryPressure", "False");
        assert_eq!(handle.update("node-a", "MemoryPressure", "False"), ConditionChange::Unchanged);
        assert_eq!(handle.len(), 1);
    }

    #[test]
    fn retain_and_remove() {
        let cache = NodeConditionCache::new();
        cache.update("node-a", "Ready", "True");
        cache.update("node-b", "Ready", "True");
        cache.update("node-c", "Ready", "True");

        cache.retain_nodes(|node| node != "node-b");
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("node-b", "Ready"), None);

        assert!(cache.remove_node("node-a"));
        assert!(!cache.remove_node("node-a"));
        assert_eq!(cache.len(), 1);
        assert!(!cache.is_empty());
    }
}
