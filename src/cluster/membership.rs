//! Peer Membership Tracking
//!
//! Derives the set of currently joined peers and the shared cluster state
//! from the shared store. Nothing is cached: every call is a fresh read, so
//! staleness is bounded only by the store's own propagation delay.

use std::collections::BTreeSet;
use std::sync::Arc;

use uuid::Uuid;

use crate::error::{Error, Result};
use crate::store::{SharedStore, CLUSTER_ID_KEY, INGRESS_ADDRESS_KEY, INITIAL_UNIT_KEY};

/// View of the peer group as visible through the shared store
pub struct PeerTracker {
    node_id: String,
    store: Arc<dyn SharedStore>,
}

impl PeerTracker {
    pub fn new(node_id: String, store: Arc<dyn SharedStore>) -> Self {
        Self { node_id, store }
    }

    /// Whether this node has a peer-group membership record at all,
    /// regardless of peer count
    pub async fn is_joined(&self) -> Result<bool> {
        self.store.is_joined().await
    }

    /// Advertised ingress addresses of all *other* visible members
    pub async fn peer_addresses(&self) -> Result<BTreeSet<String>> {
        let mut addresses = BTreeSet::new();
        for member in self.store.member_ids().await? {
            if member == self.node_id {
                continue;
            }
            if let Some(address) = self.store.member_get(&member, INGRESS_ADDRESS_KEY).await? {
                addresses.insert(address);
            }
        }
        Ok(addresses)
    }

    /// Whether the visible membership, including self, has exactly one member
    pub async fn is_single_member(&self) -> Result<bool> {
        let ids = self.store.member_ids().await?;
        let count = if ids.iter().any(|id| id == &self.node_id) {
            ids.len()
        } else {
            ids.len() + 1
        };
        Ok(count == 1)
    }

    /// Advertise this node's ingress address to the peer group
    pub async fn advertise(&self, address: &str) -> Result<()> {
        self.store.member_set(INGRESS_ADDRESS_KEY, address).await
    }
}

/// Read/write access to the group-scope cluster state: the durable cluster
/// identifier and the identity of the node that initialized it.
///
/// Written once, read many; absence of the cluster id means "not yet
/// initialized."
pub struct ClusterStateView {
    store: Arc<dyn SharedStore>,
}

impl ClusterStateView {
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self { store }
    }

    /// The published cluster id, if any
    pub async fn cluster_id(&self) -> Result<Option<Uuid>> {
        match self.store.group_get(CLUSTER_ID_KEY).await? {
            Some(text) => Uuid::parse_str(&text)
                .map(Some)
                .map_err(|e| Error::Store(format!("Corrupt published cluster id: {}", e))),
            None => Ok(None),
        }
    }

    /// Identity of the node that initialized the cluster, if published
    pub async fn initial_unit(&self) -> Result<Option<String>> {
        self.store.group_get(INITIAL_UNIT_KEY).await
    }

    /// Determined by the presence of a cluster id
    pub async fn is_cluster_initialized(&self) -> Result<bool> {
        Ok(self.cluster_id().await?.is_some())
    }

    /// Publish the cluster id and initializing node, write-once.
    ///
    /// Re-publishing an identical id is a no-op; a different id is a fatal
    /// mismatch, since the cluster id never changes for the life of the
    /// cluster.
    pub async fn publish(&self, cluster_id: &Uuid, initial_unit: &str) -> Result<()> {
        if let Some(existing) = self.cluster_id().await? {
            if existing != *cluster_id {
                return Err(Error::ClusterIdMismatch {
                    resolved: cluster_id.to_string(),
                    published: existing.to_string(),
                });
            }
            return Ok(());
        }

        self.store
            .group_set(CLUSTER_ID_KEY, &cluster_id.to_string())
            .await?;
        self.store.group_set(INITIAL_UNIT_KEY, initial_unit).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryBus;

    #[tokio::test]
    async fn test_peer_addresses_exclude_self() {
        let bus = MemoryBus::new();

        for (id, addr) in [("db-0", "10.0.0.5"), ("db-1", "10.0.0.6"), ("db-2", "10.0.0.7")] {
            let store = bus.store_for(id);
            store.join().await;
            store.member_set(INGRESS_ADDRESS_KEY, addr).await.unwrap();
        }

        let tracker = PeerTracker::new("db-0".to_string(), Arc::new(bus.store_for("db-0")));
        let addresses = tracker.peer_addresses().await.unwrap();
        assert_eq!(
            addresses.into_iter().collect::<Vec<_>>(),
            vec!["10.0.0.6".to_string(), "10.0.0.7".to_string()]
        );
        assert!(!tracker.is_single_member().await.unwrap());
    }

    #[tokio::test]
    async fn test_single_member_before_and_after_join() {
        let bus = MemoryBus::new();
        let tracker = PeerTracker::new("db-0".to_string(), Arc::new(bus.store_for("db-0")));

        // Nothing joined yet: only self would be visible.
        assert!(!tracker.is_joined().await.unwrap());
        assert!(tracker.is_single_member().await.unwrap());

        bus.store_for("db-0").join().await;
        assert!(tracker.is_joined().await.unwrap());
        assert!(tracker.is_single_member().await.unwrap());

        bus.store_for("db-1").join().await;
        assert!(!tracker.is_single_member().await.unwrap());
    }

    #[tokio::test]
    async fn test_publish_is_write_once() {
        let bus = MemoryBus::new();
        let view = ClusterStateView::new(Arc::new(bus.store_for("db-0")));
        let id = Uuid::new_v4();

        assert!(!view.is_cluster_initialized().await.unwrap());

        view.publish(&id, "db-0").await.unwrap();
        assert_eq!(view.cluster_id().await.unwrap(), Some(id));
        assert_eq!(view.initial_unit().await.unwrap(), Some("db-0".to_string()));

        // Identical republication is a no-op, even from another node.
        let other = ClusterStateView::new(Arc::new(bus.store_for("db-1")));
        other.publish(&id, "db-1").await.unwrap();
        assert_eq!(view.initial_unit().await.unwrap(), Some("db-0".to_string()));

        // A different id never overwrites.
        let err = other.publish(&Uuid::new_v4(), "db-1").await.unwrap_err();
        assert!(matches!(err, Error::ClusterIdMismatch { .. }));
        assert_eq!(view.cluster_id().await.unwrap(), Some(id));
    }
}
