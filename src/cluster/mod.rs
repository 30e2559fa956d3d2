//! Cluster Bootstrap Module
//!
//! Peer membership tracking, cluster identity resolution, and the
//! bootstrap coordination state machine.

pub mod coordinator;
pub mod identity;
mod membership;

pub use coordinator::{Coordinator, Event, LeadershipOracle, Notification, Outcome, Phase};
pub use identity::IdentityResolver;
pub use membership::{ClusterStateView, PeerTracker};
