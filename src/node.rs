//! Node handles.
//!
//! A [`SchedulerNode`] is the queue's view of one worker machine: its
//! host and rack identity plus available/used bookkeeping. Heartbeat
//! plumbing and the node registry live outside this crate; the queue only
//! reads availability and records grants.

use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::trace;

use crate::application::ApplicationId;
use crate::container::{Container, ContainerId};
use crate::resources::Resource;

struct NodeState {
    available: Resource,
    used: Resource,
    num_containers: u32,
    /// Running containers by id, with the owning application.
    running: HashMap<ContainerId, ApplicationId>,
}

/// One worker machine advertising schedulable memory.
pub struct SchedulerNode {
    host_name: String,
    rack_name: String,
    total: Resource,
    state: Mutex<NodeState>,
}

impl SchedulerNode {
    /// Creates a node with all of its capability available.
    pub fn new(
        host_name: impl Into<String>,
        rack_name: impl Into<String>,
        capability: Resource,
    ) -> Self {
        Self {
            host_name: host_name.into(),
            rack_name: rack_name.into(),
            total: capability,
            state: Mutex::new(NodeState {
                available: capability,
                used: Resource::none(),
                num_containers: 0,
                running: HashMap::new(),
            }),
        }
    }

    /// The node's host name.
    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    /// The rack the node belongs to.
    pub fn rack_name(&self) -> &str {
        &self.rack_name
    }

    /// Total schedulable capability.
    pub fn total_capability(&self) -> Resource {
        self.total
    }

    /// Memory currently free on this node.
    pub fn available_resource(&self) -> Resource {
        self.state.lock().available
    }

    /// Memory currently granted out of this node.
    pub fn used_resource(&self) -> Resource {
        self.state.lock().used
    }

    /// Containers currently running on this node.
    pub fn num_containers(&self) -> u32 {
        self.state.lock().num_containers
    }

    /// Records a granted container against this node's free memory.
    pub fn allocate_container(&self, app_id: ApplicationId, container: &Container) {
        let mut state = self.state.lock();
        state.available.subtract(&container.capability);
        state.used.add(&container.capability);
        state.num_containers += 1;
        state.running.insert(container.id, app_id);
        trace!(
            host = %self.host_name,
            app_id = app_id.0,
            container_seq = container.id.seq,
            memory = container.capability.memory,
            available = state.available.memory,
            "node allocated container"
        );
    }

    /// Returns a completed container's memory to the free pool.
    ///
    /// Returns false for a container this node is not running.
    pub fn release_container(&self, container: &Container) -> bool {
        let mut state = self.state.lock();
        if state.running.remove(&container.id).is_none() {
            return false;
        }
        state.available.add(&container.capability);
        state.used.subtract(&container.capability);
        state.num_containers = state.num_containers.saturating_sub(1);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn container(seq: u32, memory: u64) -> Container {
        Container::new(
            ContainerId {
                app_id: ApplicationId(1),
                seq,
            },
            "host-1",
            Resource::new(memory),
            None,
        )
    }

    #[test]
    fn test_new_node_is_fully_available() {
        let node = SchedulerNode::new("host-1", "rack-1", Resource::new(16));
        assert_eq!(node.available_resource().memory, 16);
        assert_eq!(node.used_resource().memory, 0);
        assert_eq!(node.num_containers(), 0);
    }

    #[test]
    fn test_allocate_and_release() {
        let node = SchedulerNode::new("host-1", "rack-1", Resource::new(16));
        let c = container(1, 6);

        node.allocate_container(ApplicationId(1), &c);
        assert_eq!(node.available_resource().memory, 10);
        assert_eq!(node.used_resource().memory, 6);
        assert_eq!(node.num_containers(), 1);

        assert!(node.release_container(&c));
        assert_eq!(node.available_resource().memory, 16);
        assert_eq!(node.used_resource().memory, 0);
        assert_eq!(node.num_containers(), 0);
    }

    #[test]
    fn test_release_unknown_container_is_ignored() {
        let node = SchedulerNode::new("host-1", "rack-1", Resource::new(16));
        assert!(!node.release_container(&container(9, 4)));
        assert_eq!(node.available_resource().memory, 16);
    }
}
