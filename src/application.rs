//! Application handles.
//!
//! An [`Application`] is the queue's view of one submitted job: its user,
//! its ask table of [`ResourceRequest`]s, and the containers currently
//! granted to it. The handle carries its own lock; the queue acquires it
//! after the queue-wide lock, never before.

use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};

use crate::container::{Container, ContainerId};
use crate::node::SchedulerNode;
use crate::request::{NodeType, Priority, ResourceRequest};

/// Application identifier, assigned by the external application manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ApplicationId(pub u64);

/// Mutable application state, guarded by the per-application lock.
struct AppState {
    /// Ask table: priority, then location key (host, rack, or `"*"`).
    requests: HashMap<Priority, HashMap<String, ResourceRequest>>,
    /// Containers granted and not yet completed.
    running: HashMap<ContainerId, Container>,
    /// Sequence for container ids, starting at 1.
    container_seq: u32,
}

/// One submitted application.
pub struct Application {
    id: ApplicationId,
    user: String,
    submission_seq: u64,
    state: Mutex<AppState>,
}

impl Application {
    /// Creates a handle for a newly submitted application.
    ///
    /// The submission sequence is drawn from a process-wide counter, so
    /// handles created later always order after handles created earlier.
    pub fn new(id: ApplicationId, user: impl Into<String>) -> Self {
        static SUBMISSIONS: AtomicU64 = AtomicU64::new(0);
        Self {
            id,
            user: user.into(),
            submission_seq: SUBMISSIONS.fetch_add(1, Ordering::SeqCst),
            state: Mutex::new(AppState {
                requests: HashMap::new(),
                running: HashMap::new(),
                container_seq: 0,
            }),
        }
    }

    /// The application id.
    pub fn id(&self) -> ApplicationId {
        self.id
    }

    /// The submitting user.
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Admission ticket used by FIFO ordering.
    pub fn submission_seq(&self) -> u64 {
        self.submission_seq
    }

    /// Acquires the per-application lock.
    ///
    /// The allocation loop holds this guard across a whole priority walk
    /// so the ask table cannot shift mid-decision.
    pub fn lock(&self) -> ApplicationGuard<'_> {
        ApplicationGuard {
            app: self,
            state: self.state.lock(),
        }
    }

    /// Installs or refreshes ask-table rows.
    pub fn update_resource_requests(&self, requests: Vec<ResourceRequest>) {
        self.lock().update_resource_requests(requests);
    }

    /// Active priorities, most urgent first.
    pub fn priorities(&self) -> Vec<Priority> {
        self.lock().priorities()
    }

    /// Looks up the ask at `(priority, location)`.
    pub fn resource_request(&self, priority: Priority, location: &str) -> Option<ResourceRequest> {
        self.lock().resource_request(priority, location).cloned()
    }

    /// Acknowledges a completed container.
    ///
    /// Returns false for a container this application never held; the
    /// caller leaves its ledgers untouched in that case.
    pub fn completed_container(&self, container: &Container) -> bool {
        self.lock().completed_container(container)
    }

    /// Containers granted and not yet completed.
    pub fn allocated_containers(&self) -> Vec<Container> {
        self.lock().state.running.values().cloned().collect()
    }

    /// Logs the current ask table at debug level.
    pub fn show_requests(&self) {
        self.lock().show_requests();
    }
}

/// Exclusive access to one application's state.
///
/// Created by [`Application::lock`]; the queue-wide lock is always taken
/// first.
pub struct ApplicationGuard<'a> {
    app: &'a Application,
    state: MutexGuard<'a, AppState>,
}

impl ApplicationGuard<'_> {
    /// Active priorities, most urgent first.
    pub fn priorities(&self) -> Vec<Priority> {
        let mut priorities: Vec<Priority> = self.state.requests.keys().copied().collect();
        priorities.sort();
        priorities
    }

    /// Looks up the ask at `(priority, location)`.
    pub fn resource_request(&self, priority: Priority, location: &str) -> Option<&ResourceRequest> {
        self.state
            .requests
            .get(&priority)
            .and_then(|by_location| by_location.get(location))
    }

    /// Installs or refreshes ask-table rows.
    pub fn update_resource_requests(&mut self, requests: Vec<ResourceRequest>) {
        for request in requests {
            self.state
                .requests
                .entry(request.priority)
                .or_default()
                .insert(request.location.clone(), request);
        }
    }

    /// Draws the next container id for this application.
    pub fn new_container_id(&mut self) -> ContainerId {
        self.state.container_seq += 1;
        ContainerId {
            app_id: self.app.id,
            seq: self.state.container_seq,
        }
    }

    /// Records a granted container and consumes the matched ask.
    ///
    /// Exactly the request row the locality selector matched is
    /// decremented; sibling rows at the same priority keep their counts.
    pub fn allocate(
        &mut self,
        node_type: NodeType,
        node: &SchedulerNode,
        priority: Priority,
        request: &ResourceRequest,
        container: Container,
    ) {
        if let Some(row) = self
            .state
            .requests
            .get_mut(&priority)
            .and_then(|by_location| by_location.get_mut(&request.location))
        {
            row.num_containers = row.num_containers.saturating_sub(1);
        }
        trace!(
            app_id = self.app.id.0,
            container_seq = container.id.seq,
            host = node.host_name(),
            ?node_type,
            priority = priority.0,
            memory = container.capability.memory,
            "application allocated container"
        );
        self.state.running.insert(container.id, container);
    }

    /// Acknowledges a completed container; false if it was never held.
    pub fn completed_container(&mut self, container: &Container) -> bool {
        self.state.running.remove(&container.id).is_some()
    }

    /// Logs the current ask table at debug level.
    pub fn show_requests(&self) {
        for by_location in self.state.requests.values() {
            for request in by_location.values() {
                debug!(
                    app_id = self.app.id.0,
                    priority = request.priority.0,
                    location = %request.location,
                    memory = request.capability.memory,
                    num_containers = request.num_containers,
                    "outstanding request"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::ANY;
    use crate::resources::Resource;

    fn app() -> Application {
        Application::new(ApplicationId(1), "alice")
    }

    #[test]
    fn test_submission_seq_is_monotone() {
        let first = Application::new(ApplicationId(1), "a");
        let second = Application::new(ApplicationId(2), "b");
        assert!(first.submission_seq() < second.submission_seq());
    }

    #[test]
    fn test_priorities_most_urgent_first() {
        let app = app();
        app.update_resource_requests(vec![
            ResourceRequest::new(Priority(3), ANY, Resource::new(1), 1),
            ResourceRequest::new(Priority(0), ANY, Resource::new(1), 1),
            ResourceRequest::new(Priority(1), ANY, Resource::new(1), 1),
        ]);
        assert_eq!(app.priorities(), vec![Priority(0), Priority(1), Priority(3)]);
    }

    #[test]
    fn test_update_refreshes_existing_row() {
        let app = app();
        app.update_resource_requests(vec![ResourceRequest::new(
            Priority(0),
            ANY,
            Resource::new(1),
            1,
        )]);
        app.update_resource_requests(vec![ResourceRequest::new(
            Priority(0),
            ANY,
            Resource::new(1),
            5,
        )]);
        let ask = app.resource_request(Priority(0), ANY).unwrap();
        assert_eq!(ask.num_containers, 5);
    }

    #[test]
    fn test_allocate_decrements_only_matched_row() {
        let app = app();
        let node = SchedulerNode::new("host-1", "rack-1", Resource::new(8));
        app.update_resource_requests(vec![
            ResourceRequest::new(Priority(0), "host-1", Resource::new(1), 1),
            ResourceRequest::new(Priority(0), "rack-1", Resource::new(1), 1),
            ResourceRequest::new(Priority(0), ANY, Resource::new(1), 2),
        ]);

        let mut guard = app.lock();
        let request = guard.resource_request(Priority(0), "host-1").cloned().unwrap();
        let id = guard.new_container_id();
        let container = Container::new(id, "host-1", Resource::new(1), None);
        guard.allocate(NodeType::DataLocal, &node, Priority(0), &request, container);
        drop(guard);

        assert_eq!(
            app.resource_request(Priority(0), "host-1").unwrap().num_containers,
            0
        );
        assert_eq!(
            app.resource_request(Priority(0), "rack-1").unwrap().num_containers,
            1
        );
        assert_eq!(app.resource_request(Priority(0), ANY).unwrap().num_containers, 2);
        assert_eq!(app.allocated_containers().len(), 1);
    }

    #[test]
    fn test_container_ids_are_sequential() {
        let app = app();
        let mut guard = app.lock();
        assert_eq!(guard.new_container_id().seq, 1);
        assert_eq!(guard.new_container_id().seq, 2);
    }

    #[test]
    fn test_completed_container_unknown_is_false() {
        let app = app();
        let unknown = Container::new(
            ContainerId {
                app_id: ApplicationId(1),
                seq: 99,
            },
            "host-1",
            Resource::new(1),
            None,
        );
        assert!(!app.completed_container(&unknown));
    }

    #[test]
    fn test_completed_container_removes_from_running() {
        let app = app();
        let node = SchedulerNode::new("host-1", "rack-1", Resource::new(8));
        app.update_resource_requests(vec![ResourceRequest::new(
            Priority(0),
            ANY,
            Resource::new(1),
            1,
        )]);

        let mut guard = app.lock();
        let request = guard.resource_request(Priority(0), ANY).cloned().unwrap();
        let id = guard.new_container_id();
        let container = Container::new(id, "host-1", Resource::new(1), None);
        guard.allocate(NodeType::OffSwitch, &node, Priority(0), &request, container.clone());
        drop(guard);

        assert!(app.completed_container(&container));
        assert!(app.allocated_containers().is_empty());
        // A second completion for the same container is ignored.
        assert!(!app.completed_container(&container));
    }
}
