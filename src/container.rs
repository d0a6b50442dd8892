//! Container records and container tokens.
//!
//! A container is the allocation unit: a fixed-sized slice of one node's
//! memory granted to an application. When a [`SecretManager`] is injected,
//! containers carry a token binding the grant to the node it was made for.

use serde::{Deserialize, Serialize};

use crate::application::ApplicationId;
use crate::resources::Resource;

/// Token kind stamped on every minted container token.
pub const CONTAINER_TOKEN_KIND: &str = "ContainerToken";

/// Identifier of a container: the owning application plus a per-application
/// sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerId {
    /// The application the container was granted to.
    pub app_id: ApplicationId,
    /// Allocation sequence within that application, starting at 1.
    pub seq: u32,
}

/// An allocation granted to an application on a specific host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Container {
    /// Container identifier.
    pub id: ContainerId,
    /// Host the container runs on.
    pub host_name: String,
    /// Memory granted.
    pub capability: Resource,
    /// Present only when token security is enabled.
    pub container_token: Option<ContainerToken>,
}

impl Container {
    /// Creates a new container record.
    pub fn new(
        id: ContainerId,
        host_name: impl Into<String>,
        capability: Resource,
        container_token: Option<ContainerToken>,
    ) -> Self {
        Self {
            id,
            host_name: host_name.into(),
            capability,
            container_token,
        }
    }
}

/// The signed fields of a container token.
///
/// The identifier is what the secret manager keys its password on; a node
/// can later verify that a presented container matches the grant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerTokenIdentifier {
    /// The granted container.
    pub container_id: ContainerId,
    /// Host the grant is valid on.
    pub host_name: String,
    /// Memory the grant covers.
    pub capability: Resource,
}

impl ContainerTokenIdentifier {
    /// Serializes the identifier to its wire bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("token identifier serializes to JSON")
    }
}

/// Security token attached to a container when token minting is enabled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerToken {
    /// Serialized [`ContainerTokenIdentifier`].
    pub identifier: Vec<u8>,
    /// Token kind, always [`CONTAINER_TOKEN_KIND`].
    pub kind: String,
    /// Password produced by the secret manager over `identifier`.
    pub password: Vec<u8>,
    /// Service address the token is scoped to.
    pub service: String,
}

/// Produces token passwords from identifier bytes.
///
/// Implemented by the deployment's security layer; the queue never
/// inspects passwords, it only attaches them.
pub trait SecretManager: Send + Sync {
    /// Derives the password for the given identifier bytes.
    fn create_password(&self, identifier: &[u8]) -> Vec<u8>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn container_id() -> ContainerId {
        ContainerId {
            app_id: ApplicationId(7),
            seq: 3,
        }
    }

    #[test]
    fn test_identifier_bytes_round_trip() {
        let identifier = ContainerTokenIdentifier {
            container_id: container_id(),
            host_name: "host-1".to_string(),
            capability: Resource::new(2048),
        };
        let bytes = identifier.to_bytes();
        let decoded: ContainerTokenIdentifier = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded, identifier);
    }

    #[test]
    fn test_container_without_token() {
        let container = Container::new(container_id(), "host-1", Resource::new(1024), None);
        assert_eq!(container.host_name, "host-1");
        assert!(container.container_token.is_none());
    }

    #[test]
    fn test_container_serialization() {
        let container = Container::new(container_id(), "host-2", Resource::new(512), None);
        let json = serde_json::to_string(&container).unwrap();
        let decoded: Container = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, container);
    }
}
