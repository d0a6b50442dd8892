//! Priorities, locality levels, and resource requests.
//!
//! Applications describe what they want as a table of [`ResourceRequest`]
//! records keyed by priority and location. A location is a host name, a
//! rack name, or the [`ANY`] wildcard for off-switch placement.

use serde::{Deserialize, Serialize};

use crate::resources::Resource;

/// The off-switch location key: a request that can run anywhere.
pub const ANY: &str = "*";

/// Scheduling priority of a request.
///
/// Lower values schedule first; priority 0 is the most urgent. Within an
/// application, higher priorities are fully considered before lower ones.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Priority(pub u32);

/// Locality level of a container placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeType {
    /// Placed on the exact host the application asked for.
    DataLocal,
    /// Placed on a different host in a requested rack.
    RackLocal,
    /// Placed anywhere in the cluster.
    OffSwitch,
}

/// One row of an application's ask table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequest {
    /// Priority this ask belongs to.
    pub priority: Priority,
    /// Host name, rack name, or [`ANY`].
    pub location: String,
    /// Size of each requested container.
    pub capability: Resource,
    /// Containers still wanted at this location.
    pub num_containers: u32,
}

impl ResourceRequest {
    /// Creates a new resource request.
    ///
    /// # Examples
    ///
    /// ```
    /// use capacity_scheduler::request::{Priority, ResourceRequest, ANY};
    /// use capacity_scheduler::resources::Resource;
    ///
    /// let ask = ResourceRequest::new(Priority(1), ANY, Resource::new(1024), 4);
    /// assert_eq!(ask.num_containers, 4);
    /// ```
    pub fn new(
        priority: Priority,
        location: impl Into<String>,
        capability: Resource,
        num_containers: u32,
    ) -> Self {
        Self {
            priority,
            location: location.into(),
            capability,
            num_containers,
        }
    }
}
