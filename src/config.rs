//! Scheduler configuration.
//!
//! Cluster-wide knobs plus per-queue-path overrides for capacity and user
//! limit settings. The configuration is read once at queue construction;
//! runtime reconfiguration is not supported.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::resources::Resource;

/// Default cap on applications across the whole scheduler.
pub const DEFAULT_MAXIMUM_SYSTEM_APPLICATIONS: u32 = 10_000;

/// Default per-user share floor, in percent.
pub const DEFAULT_USER_LIMIT: u32 = 100;

/// Default multiplier on queue capacity bounding a single user.
pub const DEFAULT_USER_LIMIT_FACTOR: f64 = 1.0;

/// Default allocation quantum, in memory units.
pub const DEFAULT_MINIMUM_ALLOCATION: u64 = 1024;

/// Configuration for the capacity scheduler.
///
/// Per-queue settings are keyed by the queue's dotted path
/// (e.g. `"root.default"`). Paths without an override fall back to the
/// documented defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Cap on applications across the whole scheduler.
    maximum_system_applications: u32,

    /// The quantum used to normalize capacity arithmetic.
    minimum_allocation: Resource,

    /// Queue capacity as a fraction of the parent's share, per path.
    capacities: HashMap<String, f64>,

    /// Queue maximum capacity, per path. Absent means uncapped.
    maximum_capacities: HashMap<String, f64>,

    /// Per-user share floor in percent, per path.
    user_limits: HashMap<String, u32>,

    /// Per-user elasticity multiplier, per path.
    user_limit_factors: HashMap<String, f64>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            maximum_system_applications: DEFAULT_MAXIMUM_SYSTEM_APPLICATIONS,
            minimum_allocation: Resource::new(DEFAULT_MINIMUM_ALLOCATION),
            capacities: HashMap::new(),
            maximum_capacities: HashMap::new(),
            user_limits: HashMap::new(),
            user_limit_factors: HashMap::new(),
        }
    }
}

impl SchedulerConfig {
    /// Creates a configuration with all defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the scheduler-wide application cap.
    pub fn with_maximum_system_applications(mut self, maximum: u32) -> Self {
        self.maximum_system_applications = maximum;
        self
    }

    /// Sets the allocation quantum.
    pub fn with_minimum_allocation(mut self, minimum: Resource) -> Self {
        self.minimum_allocation = minimum;
        self
    }

    /// Sets a queue's capacity fraction.
    ///
    /// # Examples
    ///
    /// ```
    /// use capacity_scheduler::config::SchedulerConfig;
    ///
    /// let config = SchedulerConfig::new().with_capacity("root.default", 0.5);
    /// assert_eq!(config.capacity("root.default"), 0.5);
    /// ```
    pub fn with_capacity(mut self, path: impl Into<String>, capacity: f64) -> Self {
        self.capacities.insert(path.into(), capacity);
        self
    }

    /// Sets a queue's maximum capacity fraction.
    pub fn with_maximum_capacity(mut self, path: impl Into<String>, maximum: f64) -> Self {
        self.maximum_capacities.insert(path.into(), maximum);
        self
    }

    /// Sets a queue's per-user share floor, in percent.
    pub fn with_user_limit(mut self, path: impl Into<String>, limit: u32) -> Self {
        self.user_limits.insert(path.into(), limit);
        self
    }

    /// Sets a queue's per-user elasticity multiplier.
    pub fn with_user_limit_factor(mut self, path: impl Into<String>, factor: f64) -> Self {
        self.user_limit_factors.insert(path.into(), factor);
        self
    }

    /// The scheduler-wide application cap.
    pub fn maximum_system_applications(&self) -> u32 {
        self.maximum_system_applications
    }

    /// The allocation quantum.
    pub fn minimum_allocation(&self) -> Resource {
        self.minimum_allocation
    }

    /// The configured capacity for `path`, defaulting to the full parent
    /// share.
    pub fn capacity(&self, path: &str) -> f64 {
        self.capacities.get(path).copied().unwrap_or(1.0)
    }

    /// The configured maximum capacity for `path`, or `None` when the
    /// queue is uncapped.
    pub fn maximum_capacity(&self, path: &str) -> Option<f64> {
        self.maximum_capacities.get(path).copied()
    }

    /// The per-user share floor for `path`, in percent.
    pub fn user_limit(&self, path: &str) -> u32 {
        self.user_limits.get(path).copied().unwrap_or(DEFAULT_USER_LIMIT)
    }

    /// The per-user elasticity multiplier for `path`.
    pub fn user_limit_factor(&self, path: &str) -> f64 {
        self.user_limit_factors
            .get(path)
            .copied()
            .unwrap_or(DEFAULT_USER_LIMIT_FACTOR)
    }
}
