//! Network policy definitions for sandbox containers.

use serde::{Deserialize, Serialize};

/// Network access policy for sandbox containers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NetworkPolicy {
    /// Dedicated bridge network with outbound access (needed for clone and installs)
    #[default]
    Bridge,
    /// Dedicated bridge network with no route outside the host
    Internal,
    /// No network at all
    None,
}

impl NetworkPolicy {
    /// Whether the dedicated sandbox network must exist before creating a container.
    pub fn needs_network(self) -> bool {
        !matches!(self, Self::None)
    }

    /// Whether the dedicated network is created as an internal network.
    pub fn is_internal(self) -> bool {
        matches!(self, Self::Internal)
    }

    /// Docker `network_mode` for a container under this policy.
    pub fn network_mode(self, network: &str) -> String {
        match self {
            Self::Bridge | Self::Internal => network.to_string(),
            Self::None => "none".to_string(),
        }
    }
}

impl std::fmt::Display for NetworkPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bridge => write!(f, "bridge"),
            Self::Internal => write!(f, "internal"),
            Self::None => write!(f, "none"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_policy_display() {
        assert_eq!(format!("{}", NetworkPolicy::Bridge), "bridge");
        assert_eq!(format!("{}", NetworkPolicy::Internal), "internal");
        assert_eq!(format!("{}", NetworkPolicy::None), "none");
    }

    #[test]
    fn test_network_mode() {
        assert_eq!(NetworkPolicy::Bridge.network_mode("cells"), "cells");
        assert_eq!(NetworkPolicy::Internal.network_mode("cells"), "cells");
        assert_eq!(NetworkPolicy::None.network_mode("cells"), "none");
        assert!(!NetworkPolicy::None.needs_network());
        assert!(NetworkPolicy::Internal.is_internal());
    }
}
