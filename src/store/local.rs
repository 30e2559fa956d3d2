//! Local Bootstrap Record
//!
//! Persistent per-node bootstrap state, used to avoid redundant side effects
//! across process restarts: re-starting a running daemon, re-initializing,
//! or re-publishing cluster state. Never shared with peers.

use std::path::PathBuf;

use rusqlite::{params, Connection};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Persistent bootstrap record backed by SQLite
pub struct BootstrapState {
    /// Database connection
    conn: RwLock<Connection>,
    /// Node ID
    node_id: String,
}

impl BootstrapState {
    /// Create or open the bootstrap state database
    pub fn new(data_dir: PathBuf, node_id: String) -> Result<Self> {
        std::fs::create_dir_all(&data_dir)?;

        let db_path = data_dir.join("bootstrap.db");
        let conn = Connection::open(&db_path)?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS bootstrap_state (
                key TEXT PRIMARY KEY,
                value_int INTEGER,
                value_text TEXT,
                updated_at TEXT DEFAULT CURRENT_TIMESTAMP
            );
            "#,
        )?;

        Ok(Self {
            conn: RwLock::new(conn),
            node_id,
        })
    }

    async fn get_int(&self, key: &str) -> Result<Option<i64>> {
        let conn = self.conn.read().await;
        let result: std::result::Result<i64, _> = conn.query_row(
            "SELECT value_int FROM bootstrap_state WHERE key = ?1",
            params![key],
            |row| row.get(0),
        );

        match result {
            Ok(v) => Ok(Some(v)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Error::State(format!(
                "Failed to get {} for node {}: {}",
                key, self.node_id, e
            ))),
        }
    }

    async fn set_int(&self, key: &str, value: i64) -> Result<()> {
        let conn = self.conn.write().await;
        conn.execute(
            r#"
            INSERT INTO bootstrap_state (key, value_int) VALUES (?1, ?2)
            ON CONFLICT(key) DO UPDATE SET value_int = ?2, updated_at = CURRENT_TIMESTAMP
            "#,
            params![key, value],
        )?;
        Ok(())
    }

    async fn get_text(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.read().await;
        let result: std::result::Result<String, _> = conn.query_row(
            "SELECT value_text FROM bootstrap_state WHERE key = ?1",
            params![key],
            |row| row.get(0),
        );

        match result {
            Ok(v) => Ok(Some(v)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Error::State(format!(
                "Failed to get {} for node {}: {}",
                key, self.node_id, e
            ))),
        }
    }

    async fn set_text(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.write().await;
        conn.execute(
            r#"
            INSERT INTO bootstrap_state (key, value_text) VALUES (?1, ?2)
            ON CONFLICT(key) DO UPDATE SET value_text = ?2, updated_at = CURRENT_TIMESTAMP
            "#,
            params![key, value],
        )?;
        Ok(())
    }

    /// Whether the daemon has been started by this node
    pub async fn daemon_started(&self) -> Result<bool> {
        Ok(self.get_int("daemon_started").await?.unwrap_or(0) != 0)
    }

    /// Record that the daemon has been started
    pub async fn set_daemon_started(&self, started: bool) -> Result<()> {
        self.set_int("daemon_started", started as i64).await
    }

    /// Whether this node has already initialized the cluster locally
    pub async fn cluster_initialized(&self) -> Result<bool> {
        Ok(self.get_int("cluster_initialized").await?.unwrap_or(0) != 0)
    }

    /// Record that this node initialized the cluster
    pub async fn set_cluster_initialized(&self, initialized: bool) -> Result<()> {
        self.set_int("cluster_initialized", initialized as i64).await
    }

    /// Hash of the most recently rendered unit file, if any
    pub async fn rendered_unit_hash(&self) -> Result<Option<u32>> {
        Ok(self.get_int("rendered_unit_hash").await?.map(|v| v as u32))
    }

    /// Record the hash of the rendered unit file
    pub async fn set_rendered_unit_hash(&self, hash: u32) -> Result<()> {
        self.set_int("rendered_unit_hash", hash as i64).await
    }

    /// Locally-resolved cluster id, held until publication is possible
    pub async fn cluster_id(&self) -> Result<Option<Uuid>> {
        match self.get_text("cluster_id").await? {
            Some(text) => Uuid::parse_str(&text)
                .map(Some)
                .map_err(|e| Error::State(format!("Corrupt stored cluster id: {}", e))),
            None => Ok(None),
        }
    }

    /// Record the locally-resolved cluster id
    pub async fn set_cluster_id(&self, cluster_id: &Uuid) -> Result<()> {
        self.set_text("cluster_id", &cluster_id.to_string()).await
    }
}
