//! Deployment Mode Resolution
//!
//! Derives single-node vs. multi-node operation from the configured
//! replication factors.

use serde::{Deserialize, Serialize};

/// Deployment mode of the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeploymentMode {
    /// One-node deployment; the daemon self-initializes on first start
    SingleNode,
    /// Regular multi-node deployment; the leader initializes the cluster
    MultiNode,
}

impl DeploymentMode {
    /// Resolve the deployment mode from the two replication factors.
    ///
    /// Both factors set to 1 is a good guess that an operator wants a
    /// 1-node deployment; every other combination is multi-node.
    pub fn resolve(default_zone_replicas: u32, system_data_replicas: u32) -> Self {
        if default_zone_replicas == 1 && system_data_replicas == 1 {
            DeploymentMode::SingleNode
        } else {
            DeploymentMode::MultiNode
        }
    }

    /// Whether this is a single-node deployment
    pub fn is_single_node(&self) -> bool {
        matches!(self, DeploymentMode::SingleNode)
    }
}

impl std::fmt::Display for DeploymentMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeploymentMode::SingleNode => write!(f, "SINGLE_NODE"),
            DeploymentMode::MultiNode => write!(f, "MULTI_NODE"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_node_requires_both_factors() {
        assert_eq!(DeploymentMode::resolve(1, 1), DeploymentMode::SingleNode);

        for default_zone in 0..5 {
            for system_data in 0..5 {
                let expected = if default_zone == 1 && system_data == 1 {
                    DeploymentMode::SingleNode
                } else {
                    DeploymentMode::MultiNode
                };
                assert_eq!(
                    DeploymentMode::resolve(default_zone, system_data),
                    expected,
                    "factors ({}, {})",
                    default_zone,
                    system_data
                );
            }
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(DeploymentMode::SingleNode.to_string(), "SINGLE_NODE");
        assert_eq!(DeploymentMode::MultiNode.to_string(), "MULTI_NODE");
    }
}
