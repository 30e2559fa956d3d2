//! Shared State Store
//!
//! A key/value store with two visibility scopes: group scope (one copy,
//! readable by every node, written only by the originating node) and member
//! scope (one record per node, written only by that node). Propagation to
//! peers is eventual; there are no transactions.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{Error, Result};

/// Group-scope key holding the durable cluster identifier
pub const CLUSTER_ID_KEY: &str = "cluster_id";

/// Group-scope key holding the identity of the initializing node
pub const INITIAL_UNIT_KEY: &str = "initial_unit";

/// Member-scope key holding each node's advertised ingress address
pub const INGRESS_ADDRESS_KEY: &str = "ingress-address";

/// Access to the shared state store, scoped to one node.
///
/// Writes to group scope and to the local member record are permitted;
/// other members' records are read-only.
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Whether this node has a peer-group membership record at all
    async fn is_joined(&self) -> Result<bool>;

    /// Read a group-scope value
    async fn group_get(&self, key: &str) -> Result<Option<String>>;

    /// Write a group-scope value
    async fn group_set(&self, key: &str, value: &str) -> Result<()>;

    /// Write a value into this node's own member record
    async fn member_set(&self, key: &str, value: &str) -> Result<()>;

    /// Read a value from any member's record
    async fn member_get(&self, member_id: &str, key: &str) -> Result<Option<String>>;

    /// Identities of all members currently visible in the store
    async fn member_ids(&self) -> Result<Vec<String>>;
}

/// Shared backing for in-process stores, one per simulated peer group.
#[derive(Default)]
pub struct MemoryBus {
    group: RwLock<HashMap<String, String>>,
    members: RwLock<HashMap<String, HashMap<String, String>>>,
}

impl MemoryBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create a store handle scoped to one node
    pub fn store_for(self: &Arc<Self>, node_id: &str) -> MemoryStore {
        MemoryStore {
            node_id: node_id.to_string(),
            bus: Arc::clone(self),
        }
    }
}

/// In-process shared store, used by tests and single-process runs.
pub struct MemoryStore {
    node_id: String,
    bus: Arc<MemoryBus>,
}

impl MemoryStore {
    /// Register this node's membership record, making the node joined
    pub async fn join(&self) {
        let mut members = self.bus.members.write().await;
        members.entry(self.node_id.clone()).or_default();
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn is_joined(&self) -> Result<bool> {
        Ok(self.bus.members.read().await.contains_key(&self.node_id))
    }

    async fn group_get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.bus.group.read().await.get(key).cloned())
    }

    async fn group_set(&self, key: &str, value: &str) -> Result<()> {
        self.bus
            .group
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn member_set(&self, key: &str, value: &str) -> Result<()> {
        let mut members = self.bus.members.write().await;
        members
            .entry(self.node_id.clone())
            .or_default()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn member_get(&self, member_id: &str, key: &str) -> Result<Option<String>> {
        let members = self.bus.members.read().await;
        Ok(members.get(member_id).and_then(|m| m.get(key)).cloned())
    }

    async fn member_ids(&self) -> Result<Vec<String>> {
        Ok(self.bus.members.read().await.keys().cloned().collect())
    }
}

/// File-backed shared store over a directory reachable by all local
/// processes: `group.json` plus one `members/<id>.json` per node.
///
/// Every call re-reads the backing files, so staleness is bounded only by
/// filesystem propagation.
pub struct FileStore {
    node_id: String,
    dir: PathBuf,
}

impl FileStore {
    /// Open (creating directories as needed) a file store rooted at `dir`
    pub fn open(dir: PathBuf, node_id: String) -> Result<Self> {
        std::fs::create_dir_all(dir.join("members"))?;
        Ok(Self { node_id, dir })
    }

    fn group_path(&self) -> PathBuf {
        self.dir.join("group.json")
    }

    fn member_path(&self, member_id: &str) -> PathBuf {
        self.dir.join("members").join(format!("{}.json", member_id))
    }

    fn read_map(path: &PathBuf) -> Result<HashMap<String, String>> {
        match std::fs::read_to_string(path) {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_map(path: &PathBuf, map: &HashMap<String, String>) -> Result<()> {
        let content = serde_json::to_string_pretty(map)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Register this node's membership record, making the node joined
    pub fn join(&self) -> Result<()> {
        let path = self.member_path(&self.node_id);
        if !path.exists() {
            Self::write_map(&path, &HashMap::new())?;
        }
        Ok(())
    }
}

#[async_trait]
impl SharedStore for FileStore {
    async fn is_joined(&self) -> Result<bool> {
        Ok(self.member_path(&self.node_id).exists())
    }

    async fn group_get(&self, key: &str) -> Result<Option<String>> {
        Ok(Self::read_map(&self.group_path())?.get(key).cloned())
    }

    async fn group_set(&self, key: &str, value: &str) -> Result<()> {
        let path = self.group_path();
        let mut map = Self::read_map(&path)?;
        map.insert(key.to_string(), value.to_string());
        Self::write_map(&path, &map)
    }

    async fn member_set(&self, key: &str, value: &str) -> Result<()> {
        let path = self.member_path(&self.node_id);
        let mut map = Self::read_map(&path)?;
        map.insert(key.to_string(), value.to_string());
        Self::write_map(&path, &map)
    }

    async fn member_get(&self, member_id: &str, key: &str) -> Result<Option<String>> {
        Ok(Self::read_map(&self.member_path(member_id))?
            .get(key)
            .cloned())
    }

    async fn member_ids(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(self.dir.join("members"))? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name
                .to_str()
                .ok_or_else(|| Error::Store("non-UTF-8 member file name".into()))?;
            if let Some(id) = name.strip_suffix(".json") {
                ids.push(id.to_string());
            }
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_memory_store_scopes() {
        let bus = MemoryBus::new();
        let a = bus.store_for("db-0");
        let b = bus.store_for("db-1");

        assert!(!a.is_joined().await.unwrap());
        a.join().await;
        assert!(a.is_joined().await.unwrap());

        a.group_set(CLUSTER_ID_KEY, "abc").await.unwrap();
        assert_eq!(
            b.group_get(CLUSTER_ID_KEY).await.unwrap(),
            Some("abc".to_string())
        );

        a.member_set(INGRESS_ADDRESS_KEY, "10.0.0.5").await.unwrap();
        assert_eq!(
            b.member_get("db-0", INGRESS_ADDRESS_KEY).await.unwrap(),
            Some("10.0.0.5".to_string())
        );
        assert_eq!(b.member_get("db-1", INGRESS_ADDRESS_KEY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_file_store_propagates_between_handles() {
        let dir = tempdir().unwrap();

        let a = FileStore::open(dir.path().to_path_buf(), "db-0".to_string()).unwrap();
        let b = FileStore::open(dir.path().to_path_buf(), "db-1".to_string()).unwrap();

        a.join().unwrap();
        b.join().unwrap();
        a.member_set(INGRESS_ADDRESS_KEY, "10.0.0.5").await.unwrap();
        a.group_set(INITIAL_UNIT_KEY, "db-0").await.unwrap();

        let mut ids = b.member_ids().await.unwrap();
        ids.sort();
        assert_eq!(ids, vec!["db-0".to_string(), "db-1".to_string()]);
        assert_eq!(
            b.member_get("db-0", INGRESS_ADDRESS_KEY).await.unwrap(),
            Some("10.0.0.5".to_string())
        );
        assert_eq!(
            b.group_get(INITIAL_UNIT_KEY).await.unwrap(),
            Some("db-0".to_string())
        );
    }

    #[tokio::test]
    async fn test_file_store_empty_group() {
        let dir = tempdir().unwrap();
        let a = FileStore::open(dir.path().to_path_buf(), "db-0".to_string()).unwrap();

        assert_eq!(a.group_get(CLUSTER_ID_KEY).await.unwrap(), None);
        assert!(a.member_ids().await.unwrap().is_empty());
        assert!(!a.is_joined().await.unwrap());
    }
}
