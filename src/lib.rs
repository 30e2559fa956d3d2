//! RoachPilot - CockroachDB Cluster Bootstrap Coordinator
//!
//! Coordinates the one-time bootstrap of a multi-node CockroachDB cluster
//! across a fleet of peer processes that start independently and discover
//! each other asynchronously.
//!
//! # Architecture
//!
//! Each node runs the same coordinator. The deployment mode (single-node
//! vs. multi-node) is derived from the configured replication factors. In
//! multi-node mode exactly one node, the leader according to an external
//! oracle, issues the cluster initialization command, resolves the durable
//! cluster identifier from the daemon's gossip values, and publishes it to
//! a shared state store so every peer converges on the same cluster state.
//!
//! # Features
//!
//! - Deferral-based event processing: preconditions not yet met (peers not
//!   joined, leadership unconfirmed) re-queue the event instead of failing
//! - Write-once publication of the cluster id with a leadership guard
//! - Bounded, deterministic retry of the daemon's "waiting for init" state
//! - Persistent per-node bootstrap record to keep restarts side-effect free
//! - systemd unit rendering with change detection via content hashing

pub mod cluster;
pub mod config;
pub mod daemon;
pub mod error;
pub mod mode;
pub mod store;

pub use config::RoachPilotConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::cluster::{Coordinator, Event, LeadershipOracle, Notification, Phase};
    pub use crate::config::RoachPilotConfig;
    pub use crate::error::{Error, Result};
    pub use crate::mode::DeploymentMode;
    pub use crate::store::{BootstrapState, FileStore, SharedStore};
}
