//! State Storage Module
//!
//! Local per-node bootstrap state and the shared cluster-wide key/value
//! store through which nodes observe each other.

mod local;
pub mod shared;

pub use local::BootstrapState;
pub use shared::{FileStore, MemoryBus, MemoryStore, SharedStore};
pub use shared::{CLUSTER_ID_KEY, INGRESS_ADDRESS_KEY, INITIAL_UNIT_KEY};
