//! # Capacity Scheduler
//!
//! This crate provides the leaf-queue allocation core of a hierarchical,
//! capacity-based cluster scheduler. A cluster is a pool of worker
//! machines each advertising schedulable memory; applications belong to
//! users and sit in named leaf queues arranged in a tree; the scheduler
//! awards containers, fixed-sized slices of a node's free memory, as
//! nodes report availability.
//!
//! ## Structure
//!
//! - **resources**: The memory resource record and its arithmetic
//! - **config**: Cluster-wide and per-queue-path scheduler settings
//! - **request**: Priorities, locality levels, and application asks
//! - **container**: Granted containers and their security tokens
//! - **application / node**: The handles the queue schedules between
//! - **queue**: The [`LeafQueue`] itself, where admission control,
//!   per-user limits, locality preference, and bookkeeping meet
//!
//! ## Usage
//!
//! ```rust,ignore
//! use capacity_scheduler::{
//!     Application, ApplicationId, FifoComparator, LeafQueue, Priority,
//!     ResourceRequest, SchedulerConfig, SchedulerNode, ANY,
//! };
//!
//! let config = SchedulerConfig::new().with_capacity("root.default", 0.5);
//! let queue = LeafQueue::new("default", root, &config, Box::new(FifoComparator), None)?;
//!
//! let app = Arc::new(Application::new(ApplicationId(1), "alice"));
//! queue.submit_application(app.clone(), "alice")?;
//! app.update_resource_requests(vec![
//!     ResourceRequest::new(Priority(0), ANY, Resource::new(1024), 4),
//! ]);
//!
//! // One node heartbeat grants at most one container.
//! let granted = queue.assign_containers(cluster, &node);
//! ```
//!
//! ## Concurrency
//!
//! The leaf queue is shared mutable state: submissions, finishes, node
//! heartbeats, and container completions all interleave. A single
//! queue-wide mutex serializes them; per-application locks nest inside
//! it, and parent-queue notifications are issued only after the queue
//! lock is released. Heartbeat calls never block on I/O and return the
//! zero resource promptly when nothing fits.

/// Resource record and arithmetic over schedulable memory.
pub mod resources;

/// Error types and result alias.
pub mod error;

/// Scheduler configuration with per-queue-path overrides.
pub mod config;

/// Priorities, locality levels, and resource requests.
pub mod request;

/// Container records, ids, and security tokens.
pub mod container;

/// Application handles scheduled by the queue.
pub mod application;

/// Node handles the queue places containers on.
pub mod node;

/// The leaf queue: admission, limits, locality, allocation, bookkeeping.
pub mod queue;

// Re-export commonly used types for convenience
pub use application::{Application, ApplicationGuard, ApplicationId};
pub use config::SchedulerConfig;
pub use container::{
    Container, ContainerId, ContainerToken, ContainerTokenIdentifier, SecretManager,
    CONTAINER_TOKEN_KIND,
};
pub use error::{Result, SchedulerError};
pub use node::SchedulerNode;
pub use queue::{ApplicationComparator, FifoComparator, LeafQueue, ParentQueue, User};
pub use request::{NodeType, Priority, ResourceRequest, ANY};
pub use resources::{divide_and_ceil, Resource};

/// Library version information.
///
/// This should match the version in Cargo.toml and follows semver.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_valid() {
        // Ensure version string is non-empty and follows semver pattern
        assert!(!VERSION.is_empty());
        assert!(VERSION.split('.').count() >= 2);
    }
}
