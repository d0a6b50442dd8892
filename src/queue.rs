//! The leaf queue.
//!
//! A leaf queue is a terminal node of the queue tree: it holds admitted
//! applications directly and is the place where admission control, per-user
//! share limits, locality-preferred placement, and bookkeeping meet.
//!
//! # Locking
//!
//! One queue-wide mutex serializes every mutation and every multi-field
//! read. The allocation loop acquires the queue lock first and each
//! application's lock second, never the other way around. Parent
//! notifications always happen after the queue lock is released so the
//! leaf can never participate in a lock cycle with its ancestors.
//!
//! # Heartbeats
//!
//! [`LeafQueue::assign_containers`] is called once per node heartbeat and
//! grants at most one container. Reaching the queue cap or a user limit
//! ends the heartbeat immediately; a locality miss moves on to the next
//! application.

use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace, warn};

use crate::application::{Application, ApplicationGuard};
use crate::config::SchedulerConfig;
use crate::container::{
    Container, ContainerToken, ContainerTokenIdentifier, SecretManager, CONTAINER_TOKEN_KIND,
};
use crate::error::{Result, SchedulerError};
use crate::node::SchedulerNode;
use crate::request::{NodeType, Priority, ResourceRequest, ANY};
use crate::resources::{divide_and_ceil, Resource};

/// The queue above the leaf.
///
/// The leaf notifies its parent of submissions, finishes, and completions
/// for tree-level bookkeeping; the parent supplies the absolute share the
/// leaf's own fractions are scaled by.
pub trait ParentQueue: Send + Sync {
    /// Dotted path of the parent.
    fn queue_path(&self) -> String;

    /// The parent's share of the whole cluster.
    fn absolute_capacity(&self) -> f64;

    /// An application was admitted to the leaf.
    fn submit_application(&self, app: &Arc<Application>, user: &str);

    /// An application left the leaf.
    fn finish_application(&self, app: &Arc<Application>, user: &str);

    /// A container completed on the leaf.
    fn completed_container(&self, cluster: Resource, container: &Container, app: &Arc<Application>);
}

/// Ordering policy over admitted applications.
///
/// The queue serves applications in this order on every heartbeat.
pub trait ApplicationComparator: Send + Sync {
    /// Compares two applications; `Less` schedules first.
    fn compare(&self, a: &Application, b: &Application) -> Ordering;
}

/// The canonical policy: ascending submission order, ties by id.
pub struct FifoComparator;

impl ApplicationComparator for FifoComparator {
    fn compare(&self, a: &Application, b: &Application) -> Ordering {
        a.submission_seq()
            .cmp(&b.submission_seq())
            .then(a.id().cmp(&b.id()))
    }
}

/// Per-user ledger kept while the user has active applications.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct User {
    consumed: Resource,
    active_applications: u32,
}

impl User {
    /// Memory currently granted to this user's applications.
    pub fn consumed(&self) -> Resource {
        self.consumed
    }

    /// Applications this user currently has in the queue.
    pub fn active_applications(&self) -> u32 {
        self.active_applications
    }
}

/// Mutable queue state, guarded by the queue-wide lock.
struct QueueState {
    used_resources: Resource,
    /// `used / (cluster × capacity)`, recomputed on every change.
    used_capacity: f64,
    /// `used / (cluster × absolute_capacity)`, recomputed on every change.
    utilization: f64,
    num_containers: u32,
    /// Admitted applications in comparator order.
    applications: Vec<Arc<Application>>,
    users: HashMap<String, User>,
}

/// A terminal queue of the capacity scheduler.
pub struct LeafQueue {
    queue_name: String,
    queue_path: String,
    capacity: f64,
    absolute_capacity: f64,
    maximum_capacity: Option<f64>,
    /// `maximum_capacity` scaled to the cluster; uncapped maps to +∞.
    absolute_max_capacity: f64,
    user_limit: u32,
    user_limit_factor: f64,
    max_applications: u32,
    max_applications_per_user: u32,
    minimum_allocation: Resource,
    parent: Arc<dyn ParentQueue>,
    comparator: Box<dyn ApplicationComparator>,
    secret_manager: Option<Arc<dyn SecretManager>>,
    state: Mutex<QueueState>,
}

impl LeafQueue {
    /// Creates a leaf queue under `parent` from the given configuration.
    ///
    /// Settings are resolved against the queue's dotted path once, here;
    /// the queue never re-reads configuration. Containers are minted with
    /// tokens iff `secret_manager` is present.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::InvalidConfig`] when a fraction falls
    /// outside `[0, 1]`, the user limit outside `[1, 100]`, or the user
    /// limit factor is negative.
    pub fn new(
        queue_name: &str,
        parent: Arc<dyn ParentQueue>,
        config: &SchedulerConfig,
        comparator: Box<dyn ApplicationComparator>,
        secret_manager: Option<Arc<dyn SecretManager>>,
    ) -> Result<Self> {
        let queue_path = format!("{}.{}", parent.queue_path(), queue_name);

        let capacity = config.capacity(&queue_path);
        if !(0.0..=1.0).contains(&capacity) {
            return Err(SchedulerError::InvalidConfig {
                queue: queue_path,
                reason: format!("capacity {capacity} outside [0, 1]"),
            });
        }

        let maximum_capacity = config.maximum_capacity(&queue_path);
        if let Some(maximum) = maximum_capacity {
            if !(0.0..=1.0).contains(&maximum) {
                return Err(SchedulerError::InvalidConfig {
                    queue: queue_path,
                    reason: format!("maximum capacity {maximum} outside [0, 1]"),
                });
            }
        }

        let user_limit = config.user_limit(&queue_path);
        if !(1..=100).contains(&user_limit) {
            return Err(SchedulerError::InvalidConfig {
                queue: queue_path,
                reason: format!("user limit {user_limit} outside [1, 100]"),
            });
        }

        let user_limit_factor = config.user_limit_factor(&queue_path);
        if !user_limit_factor.is_finite() || user_limit_factor < 0.0 {
            return Err(SchedulerError::InvalidConfig {
                queue: queue_path,
                reason: format!("user limit factor {user_limit_factor} invalid"),
            });
        }

        let absolute_capacity = parent.absolute_capacity() * capacity;
        let absolute_max_capacity =
            maximum_capacity.map_or(f64::INFINITY, |maximum| parent.absolute_capacity() * maximum);

        let max_applications =
            (config.maximum_system_applications() as f64 * absolute_capacity) as u32;
        let max_applications_per_user = (max_applications as f64 * (user_limit as f64 / 100.0)
            * user_limit_factor) as u32;

        Ok(Self {
            queue_name: queue_name.to_string(),
            queue_path,
            capacity,
            absolute_capacity,
            maximum_capacity,
            absolute_max_capacity,
            user_limit,
            user_limit_factor,
            max_applications,
            max_applications_per_user,
            minimum_allocation: config.minimum_allocation(),
            parent,
            comparator,
            secret_manager,
            state: Mutex::new(QueueState {
                used_resources: Resource::none(),
                used_capacity: 0.0,
                utilization: 0.0,
                num_containers: 0,
                applications: Vec::new(),
                users: HashMap::new(),
            }),
        })
    }

    /// Admits an application for `user`.
    ///
    /// Both caps are checked before any state is touched, so a rejection
    /// leaves the queue exactly as it was; in particular no user ledger is
    /// created for a rejected first submission.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::QueueFull`] when the queue's application cap is
    /// reached, [`SchedulerError::UserQueueFull`] when the user's is.
    pub fn submit_application(&self, app: Arc<Application>, user: &str) -> Result<()> {
        {
            let mut state = self.state.lock();

            if state.applications.len() >= self.max_applications as usize {
                return Err(SchedulerError::QueueFull {
                    queue: self.queue_path.clone(),
                    running: state.applications.len(),
                });
            }

            let active = state
                .users
                .get(user)
                .map(|u| u.active_applications)
                .unwrap_or(0);
            if active >= self.max_applications_per_user {
                return Err(SchedulerError::UserQueueFull {
                    queue: self.queue_path.clone(),
                    user: user.to_string(),
                    running: active,
                });
            }

            state
                .users
                .entry(user.to_string())
                .or_default()
                .active_applications += 1;

            let position = state
                .applications
                .binary_search_by(|probe| self.comparator.compare(probe, &app))
                .unwrap_or_else(|insert_at| insert_at);
            state.applications.insert(position, app.clone());

            debug!(
                queue = %self.queue_path,
                app_id = app.id().0,
                user,
                num_applications = state.applications.len(),
                "accepted application submission"
            );
        }
        self.parent.submit_application(&app, user);
        Ok(())
    }

    /// Removes a finished application.
    ///
    /// The user ledger is dropped when its last application leaves.
    pub fn finish_application(&self, app: &Arc<Application>) {
        let user = app.user().to_string();
        {
            let mut state = self.state.lock();

            if let Some(position) = state
                .applications
                .iter()
                .position(|admitted| admitted.id() == app.id())
            {
                state.applications.remove(position);
            }

            if let Some(ledger) = state.users.get_mut(&user) {
                ledger.active_applications = ledger.active_applications.saturating_sub(1);
                if ledger.active_applications == 0 {
                    state.users.remove(&user);
                }
            }

            debug!(
                queue = %self.queue_path,
                app_id = app.id().0,
                user = %user,
                "application finished"
            );
        }
        self.parent.finish_application(app, &user);
    }

    /// One node heartbeat: grants at most one container.
    ///
    /// Applications are walked in comparator order, each one's priorities
    /// most urgent first. The first cap denial ends the heartbeat for all
    /// remaining candidates; a priority that cannot place on this node
    /// ends its application's walk so lower priorities never cut in.
    ///
    /// Returns the granted capability, or the zero resource when nothing
    /// was placed.
    pub fn assign_containers(&self, cluster: Resource, node: &SchedulerNode) -> Resource {
        let mut state = self.state.lock();
        let applications = state.applications.clone();

        for app in &applications {
            let mut app_guard = app.lock();

            for priority in app_guard.priorities() {
                // The off-switch ask carries the priority's outstanding
                // count; nothing outstanding means nothing to place.
                let (outstanding, required) = match app_guard.resource_request(priority, ANY) {
                    Some(ask) => (ask.num_containers, ask.capability),
                    None => continue,
                };
                if outstanding == 0 {
                    continue;
                }

                if !self.assign_to_queue(&state, cluster, required) {
                    trace!(
                        queue = %self.queue_path,
                        required = required.memory,
                        "queue cap reached, ending heartbeat"
                    );
                    return Resource::none();
                }
                if !self.assign_to_user(&state, app.user(), cluster, required) {
                    trace!(
                        queue = %self.queue_path,
                        user = app.user(),
                        "user limit reached, ending heartbeat"
                    );
                    return Resource::none();
                }

                let assigned = self.assign_containers_on_node(node, app, &mut app_guard, priority);
                if assigned.greater_than(&Resource::none()) {
                    self.allocate_resource(&mut state, cluster, app.user(), &assigned);
                    return assigned;
                }

                // Top unserved priority could not place here; do not let
                // lower priorities of this application cut in.
                break;
            }
        }

        Resource::none()
    }

    /// A container finished; returns its memory to the queue.
    ///
    /// A completion for a container the application never held is ignored
    /// and leaves all ledgers untouched.
    pub fn completed_container(
        &self,
        cluster: Resource,
        container: &Container,
        app: &Arc<Application>,
    ) {
        {
            let mut state = self.state.lock();

            if !app.completed_container(container) {
                warn!(
                    queue = %self.queue_path,
                    app_id = app.id().0,
                    container_seq = container.id.seq,
                    "completion for unknown container ignored"
                );
                return;
            }

            self.release_resource(&mut state, cluster, app.user(), &container.capability);
            debug!(
                queue = %self.queue_path,
                app_id = app.id().0,
                container_seq = container.id.seq,
                memory = container.capability.memory,
                used = state.used_resources.memory,
                "completed container"
            );
        }
        self.parent.completed_container(cluster, container, app);
    }

    /// Would granting `required` keep the queue within its absolute
    /// maximum capacity?
    fn assign_to_queue(&self, state: &QueueState, cluster: Resource, required: Resource) -> bool {
        if self.absolute_max_capacity.is_infinite() {
            return true;
        }
        let denominator = cluster.memory as f64 * self.absolute_capacity;
        if denominator <= 0.0 {
            return false;
        }
        let projected = (state.used_resources.memory + required.memory) as f64 / denominator;
        projected <= self.absolute_max_capacity
    }

    /// Is `user` within its share of the queue?
    ///
    /// The dynamic capacity equals the queue's nominal share while the
    /// queue is under it, and stretches to `consumed + required` once the
    /// queue is already over. The user's limit is the fair share of that
    /// capacity, floored by the configured user-limit percentage and
    /// ceiled by `queue_capacity × user_limit_factor`. The incoming
    /// `required` is deliberately left out of the user's side of the
    /// comparison, leaving headroom for one fixed per-application
    /// allocation.
    fn assign_to_user(
        &self,
        state: &QueueState,
        user: &str,
        cluster: Resource,
        required: Resource,
    ) -> bool {
        let minimum = self.minimum_allocation.memory;
        // Nominal share in memory units, rounded up to the allocation
        // quantum. The max with `required` lets queues with a sub-quantum
        // share still make progress.
        let queue_capacity = std::cmp::max(
            divide_and_ceil(
                (cluster.memory as f64 * self.absolute_capacity) as u64,
                minimum,
            ) * minimum,
            required.memory,
        );

        let consumed = state.used_resources.memory;
        let current_capacity = if consumed < queue_capacity {
            queue_capacity
        } else {
            consumed + required.memory
        };

        let active_users = state.users.len() as u64;
        let limit = std::cmp::min(
            std::cmp::max(
                divide_and_ceil(current_capacity, active_users),
                divide_and_ceil(self.user_limit as u64 * current_capacity, 100),
            ),
            (queue_capacity as f64 * self.user_limit_factor) as u64,
        );

        let consumed_by_user = state
            .users
            .get(user)
            .map(|ledger| ledger.consumed.memory)
            .unwrap_or(0);

        trace!(
            queue = %self.queue_path,
            user,
            consumed_by_user,
            limit,
            queue_capacity,
            current_capacity,
            active_users,
            "user limit check"
        );

        consumed_by_user <= limit
    }

    /// Tries to place one container for `priority`, preferring node-local
    /// over rack-local over off-switch.
    fn assign_containers_on_node(
        &self,
        node: &SchedulerNode,
        app: &Arc<Application>,
        app_guard: &mut ApplicationGuard<'_>,
        priority: Priority,
    ) -> Resource {
        let assigned = self.assign_node_local_containers(node, app, app_guard, priority);
        if assigned.greater_than(&Resource::none()) {
            return assigned;
        }

        let assigned = self.assign_rack_local_containers(node, app, app_guard, priority);
        if assigned.greater_than(&Resource::none()) {
            return assigned;
        }

        self.assign_off_switch_containers(node, app, app_guard, priority)
    }

    fn assign_node_local_containers(
        &self,
        node: &SchedulerNode,
        app: &Arc<Application>,
        app_guard: &mut ApplicationGuard<'_>,
        priority: Priority,
    ) -> Resource {
        let request = match app_guard.resource_request(priority, node.host_name()) {
            Some(request) => request.clone(),
            None => return Resource::none(),
        };
        if !Self::can_assign(app_guard, priority, node, NodeType::DataLocal) {
            return Resource::none();
        }
        self.assign_container(node, app, app_guard, priority, &request, NodeType::DataLocal)
    }

    fn assign_rack_local_containers(
        &self,
        node: &SchedulerNode,
        app: &Arc<Application>,
        app_guard: &mut ApplicationGuard<'_>,
        priority: Priority,
    ) -> Resource {
        let request = match app_guard.resource_request(priority, node.rack_name()) {
            Some(request) => request.clone(),
            None => return Resource::none(),
        };
        if !Self::can_assign(app_guard, priority, node, NodeType::RackLocal) {
            return Resource::none();
        }
        self.assign_container(node, app, app_guard, priority, &request, NodeType::RackLocal)
    }

    fn assign_off_switch_containers(
        &self,
        node: &SchedulerNode,
        app: &Arc<Application>,
        app_guard: &mut ApplicationGuard<'_>,
        priority: Priority,
    ) -> Resource {
        let request = match app_guard.resource_request(priority, ANY) {
            Some(request) => request.clone(),
            None => return Resource::none(),
        };
        if !Self::can_assign(app_guard, priority, node, NodeType::OffSwitch) {
            return Resource::none();
        }
        self.assign_container(node, app, app_guard, priority, &request, NodeType::OffSwitch)
    }

    /// May a container be granted to this application at the given
    /// locality level?
    ///
    /// The off-switch ask must always have capacity; a rack ask, when
    /// present, gates rack placement; a host ask gates host placement.
    fn can_assign(
        app_guard: &ApplicationGuard<'_>,
        priority: Priority,
        node: &SchedulerNode,
        node_type: NodeType,
    ) -> bool {
        let off_switch = match app_guard.resource_request(priority, ANY) {
            Some(request) => request,
            None => return false,
        };
        if off_switch.num_containers == 0 {
            return false;
        }

        match node_type {
            NodeType::OffSwitch => off_switch.num_containers > 0,
            NodeType::RackLocal => match app_guard.resource_request(priority, node.rack_name()) {
                // No ask for this rack: nothing is gained by deferring.
                None => off_switch.num_containers > 0,
                Some(rack) => rack.num_containers > 0,
            },
            NodeType::DataLocal => app_guard
                .resource_request(priority, node.host_name())
                .is_some_and(|host| host.num_containers > 0),
        }
    }

    /// Mints one container for `request` if the node has room for it.
    fn assign_container(
        &self,
        node: &SchedulerNode,
        app: &Arc<Application>,
        app_guard: &mut ApplicationGuard<'_>,
        priority: Priority,
        request: &ResourceRequest,
        node_type: NodeType,
    ) -> Resource {
        let capability = request.capability;
        // A zero-sized ask is a no-op, not a division fault.
        if capability.memory == 0 {
            return Resource::none();
        }

        let available_containers = node.available_resource().memory / capability.memory;
        if available_containers == 0 {
            return Resource::none();
        }

        let container_id = app_guard.new_container_id();
        let container_token = self.secret_manager.as_ref().map(|secrets| {
            let identifier = ContainerTokenIdentifier {
                container_id,
                host_name: node.host_name().to_string(),
                capability,
            };
            let identifier_bytes = identifier.to_bytes();
            ContainerToken {
                password: secrets.create_password(&identifier_bytes),
                identifier: identifier_bytes,
                kind: CONTAINER_TOKEN_KIND.to_string(),
                service: node.host_name().to_string(),
            }
        });

        let container = Container::new(container_id, node.host_name(), capability, container_token);
        debug!(
            queue = %self.queue_path,
            app_id = app.id().0,
            container_seq = container_id.seq,
            host = node.host_name(),
            ?node_type,
            memory = capability.memory,
            "allocated container"
        );

        app_guard.allocate(node_type, node, priority, request, container.clone());
        node.allocate_container(app.id(), &container);

        capability
    }

    /// Books a grant into the queue and user ledgers.
    fn allocate_resource(
        &self,
        state: &mut QueueState,
        cluster: Resource,
        user: &str,
        resource: &Resource,
    ) {
        state.used_resources.add(resource);
        state.num_containers += 1;
        state
            .users
            .entry(user.to_string())
            .or_default()
            .consumed
            .add(resource);
        self.update_metrics(state, cluster);
    }

    /// Books a completion out of the queue and user ledgers.
    fn release_resource(
        &self,
        state: &mut QueueState,
        cluster: Resource,
        user: &str,
        resource: &Resource,
    ) {
        state.used_resources.subtract(resource);
        state.num_containers = state.num_containers.saturating_sub(1);
        if let Some(ledger) = state.users.get_mut(user) {
            ledger.consumed.subtract(resource);
        }
        self.update_metrics(state, cluster);
    }

    /// Recomputes the derived fractions after a ledger change.
    fn update_metrics(&self, state: &mut QueueState, cluster: Resource) {
        state.utilization =
            Self::fraction(state.used_resources.memory, cluster, self.absolute_capacity);
        state.used_capacity = Self::fraction(state.used_resources.memory, cluster, self.capacity);
    }

    /// `used / (cluster × share)`, or 0 when the denominator is empty.
    fn fraction(used: u64, cluster: Resource, share: f64) -> f64 {
        let denominator = cluster.memory as f64 * share;
        if denominator <= 0.0 {
            return 0.0;
        }
        used as f64 / denominator
    }

    /// The queue's leaf name.
    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// The queue's dotted path.
    pub fn queue_path(&self) -> &str {
        &self.queue_path
    }

    /// Configured capacity, as a fraction of the parent's share.
    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Share of the whole cluster assigned to this queue.
    pub fn absolute_capacity(&self) -> f64 {
        self.absolute_capacity
    }

    /// Configured maximum capacity, or `None` when uncapped.
    pub fn maximum_capacity(&self) -> Option<f64> {
        self.maximum_capacity
    }

    /// Application-count cap for the whole queue.
    pub fn max_applications(&self) -> u32 {
        self.max_applications
    }

    /// Application-count cap per user.
    pub fn max_applications_per_user(&self) -> u32 {
        self.max_applications_per_user
    }

    /// Memory currently granted out of this queue.
    pub fn used_resources(&self) -> Resource {
        self.state.lock().used_resources
    }

    /// `used / (cluster × capacity)` as of the last ledger change.
    pub fn used_capacity(&self) -> f64 {
        self.state.lock().used_capacity
    }

    /// `used / (cluster × absolute_capacity)` as of the last ledger
    /// change.
    pub fn utilization(&self) -> f64 {
        self.state.lock().utilization
    }

    /// Applications currently admitted.
    pub fn num_applications(&self) -> usize {
        self.state.lock().applications.len()
    }

    /// Containers currently outstanding.
    pub fn num_containers(&self) -> u32 {
        self.state.lock().num_containers
    }

    /// Snapshot of one user's ledger, if the user is active.
    pub fn user(&self, name: &str) -> Option<User> {
        self.state.lock().users.get(name).cloned()
    }
}
