//! Live connection registry
//!
//! Holds at most one handle per descriptor identity. The registry itself is
//! plain data; callers that share it across tasks wrap it in a lock so that
//! `contains` followed by `insert` is atomic.

use super::{ConnectionSummary, TopologyDescriptor};
use crate::error::RegistryError;
use std::time::SystemTime;

/// A registered descriptor and its live handle
#[derive(Debug)]
pub struct RegistryEntry<H> {
    pub descriptor: TopologyDescriptor,
    pub handle: H,
    pub connected_at: SystemTime,
}

impl<H> RegistryEntry<H> {
    pub fn connection_id(&self) -> String {
        self.descriptor.connection_id()
    }
}

/// Ordered set of live connections keyed by descriptor identity
#[derive(Debug)]
pub struct ConnectionRegistry<H> {
    entries: Vec<RegistryEntry<H>>,
}

impl<H> ConnectionRegistry<H> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// True if a connection with the same identity is registered
    pub fn contains(&self, descriptor: &TopologyDescriptor) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.descriptor.same_identity(descriptor))
    }

    /// Register a live connection. Does not check for duplicates; call
    /// [`contains`](Self::contains) first under the same lock.
    pub fn insert(&mut self, descriptor: TopologyDescriptor, handle: H) {
        self.entries.push(RegistryEntry {
            descriptor,
            handle,
            connected_at: SystemTime::now(),
        });
    }

    /// Remove the connection addressed by `connection_id`
    pub fn remove_by_identity(&mut self, connection_id: &str) -> Result<RegistryEntry<H>, RegistryError> {
        let position = self
            .entries
            .iter()
            .position(|entry| entry.connection_id() == connection_id)
            .ok_or_else(|| RegistryError::NotFound {
                connection_id: connection_id.to_string(),
            })?;
        Ok(self.entries.remove(position))
    }

    pub fn get(&self, connection_id: &str) -> Option<&RegistryEntry<H>> {
        self.entries
            .iter()
            .find(|entry| entry.connection_id() == connection_id)
    }

    /// Password-free summaries in registration order
    pub fn list_for_display(&self) -> Vec<ConnectionSummary> {
        self.entries
            .iter()
            .map(|entry| entry.descriptor.summary())
            .collect()
    }

    /// Take every entry out, e.g. to disconnect them on shutdown
    pub fn drain(&mut self) -> Vec<RegistryEntry<H>> {
        std::mem::take(&mut self.entries)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<H> Default for ConnectionRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tests::standalone;

    #[test]
    fn test_contains_after_insert_and_remove() {
        let mut registry = ConnectionRegistry::new();
        let descriptor = standalone("local", Some("pw"), 0);
        assert!(!registry.contains(&descriptor));

        registry.insert(descriptor.clone(), "handle-1");
        assert!(registry.contains(&descriptor));
        assert!(registry.contains(&standalone("renamed", Some("other"), 0)));
        assert!(!registry.contains(&standalone("local", Some("pw"), 1)));

        let entry = registry.remove_by_identity(&descriptor.connection_id()).unwrap();
        assert_eq!(entry.handle, "handle-1");
        assert!(!registry.contains(&descriptor));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove_unknown_identity() {
        let mut registry: ConnectionRegistry<()> = ConnectionRegistry::new();
        assert_eq!(
            registry.remove_by_identity("deadbeef").unwrap_err(),
            RegistryError::NotFound {
                connection_id: "deadbeef".to_string()
            }
        );
    }

    #[test]
    fn test_remove_only_matching_entry() {
        let mut registry = ConnectionRegistry::new();
        let db0 = standalone("a", None, 0);
        let db1 = standalone("b", None, 1);
        registry.insert(db0.clone(), 0);
        registry.insert(db1.clone(), 1);

        registry.remove_by_identity(&db1.connection_id()).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.get(&db0.connection_id()).is_some());
        assert!(registry.get(&db1.connection_id()).is_none());
    }

    #[test]
    fn test_list_for_display_in_order() {
        let mut registry = ConnectionRegistry::new();
        registry.insert(standalone("first", Some("secret"), 0), ());
        registry.insert(standalone("second", Some("secret"), 4), ());

        let listed = registry.list_for_display();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].label, "first");
        assert_eq!(listed[1].db_index, 4);
        assert!(!serde_json::to_string(&listed).unwrap().contains("secret"));
    }

    #[test]
    fn test_drain_empties_registry() {
        let mut registry = ConnectionRegistry::new();
        registry.insert(standalone("a", None, 0), ());
        assert_eq!(registry.drain().len(), 1);
        assert!(registry.is_empty());
    }
}
