//! Resource model: actions, nodes and the simulated clock

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SlotpackError};
use crate::traits::DurationModel;

/// Absolute slack used when comparing floating point CPU quantities
pub const CPU_EPSILON: f64 = 1e-9;

/// Upper bound on proportional shrink passes per node and dimension
const MAX_REPAIR_PASSES: usize = 8;

/// Identifier of an action, assigned in arrival order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionId(pub u64);

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "a{}", self.0)
    }
}

/// Identifier of a node, unique within one strategy's run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Capacity dimension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resource {
    Cpu,
    Memory,
}

impl Resource {
    pub const ALL: [Resource; 2] = [Resource::Cpu, Resource::Memory];
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Cpu => f.write_str("cpu"),
            Resource::Memory => f.write_str("memory"),
        }
    }
}

/// Simulated time, advanced only by the driver
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SimulationClock {
    now: f64,
}

impl SimulationClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clock positioned at an arbitrary instant
    pub fn at(now: f64) -> Self {
        Self { now }
    }

    pub fn now(&self) -> f64 {
        self.now
    }

    pub fn advance(&mut self, delta: f64) {
        self.now += delta;
    }
}

/// Resource demand and duration of one arriving action
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ActionDemand {
    /// CPU cores
    pub cpu: f64,
    /// Memory in MB
    pub memory: u64,
    /// Execution time in seconds
    pub duration: f64,
}

impl ActionDemand {
    pub fn new(cpu: f64, memory: u64, duration: f64) -> Self {
        Self { cpu, memory, duration }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.cpu.is_finite() || self.cpu < 0.0 {
            return Err(SlotpackError::invalid_demand(format!(
                "cpu demand must be finite and non-negative, got {}",
                self.cpu
            )));
        }
        if !self.duration.is_finite() || self.duration < 0.0 {
            return Err(SlotpackError::invalid_demand(format!(
                "duration must be finite and non-negative, got {}",
                self.duration
            )));
        }
        Ok(())
    }
}

/// A unit of work with a fixed resource grant, hosted by at most one node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub id: ActionId,
    cpu: f64,
    memory: u64,
    duration: f64,
    start_time: Option<f64>,
    assigned_node: Option<NodeId>,

    /// Recomputes the duration when capacity repair shrinks the grant
    #[serde(skip)]
    duration_model: Option<Arc<dyn DurationModel>>,
}

impl Action {
    /// Create an action from a demand triple; duration stays fixed
    pub fn new(id: ActionId, demand: ActionDemand) -> Result<Self> {
        demand.validate()?;
        Ok(Action {
            id,
            cpu: demand.cpu,
            memory: demand.memory,
            duration: demand.duration,
            start_time: None,
            assigned_node: None,
            duration_model: None,
        })
    }

    /// Create an action whose duration follows an execution-time model
    pub fn with_duration_model(
        id: ActionId,
        cpu: f64,
        memory: u64,
        model: Arc<dyn DurationModel>,
    ) -> Result<Self> {
        let duration = model.duration(cpu, memory);
        let mut action = Self::new(id, ActionDemand::new(cpu, memory, duration))?;
        action.duration_model = Some(model);
        Ok(action)
    }

    pub fn cpu(&self) -> f64 {
        self.cpu
    }

    pub fn memory(&self) -> u64 {
        self.memory
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn demand(&self, resource: Resource) -> f64 {
        match resource {
            Resource::Cpu => self.cpu,
            Resource::Memory => self.memory as f64,
        }
    }

    pub fn start_time(&self) -> Option<f64> {
        self.start_time
    }

    pub fn assigned_node(&self) -> Option<NodeId> {
        self.assigned_node
    }

    pub fn is_placed(&self) -> bool {
        self.assigned_node.is_some()
    }

    /// Seconds left until completion; the full duration while unplaced
    pub fn remaining_time(&self, clock: SimulationClock) -> f64 {
        match self.start_time {
            Some(start) => start + self.duration - clock.now(),
            None => self.duration,
        }
    }

    pub fn is_complete(&self, clock: SimulationClock) -> bool {
        self.start_time.is_some() && self.remaining_time(clock) <= 0.0
    }

    fn place_on(&mut self, node: NodeId, clock: SimulationClock) {
        self.assigned_node = Some(node);
        self.start_time = Some(clock.now());
    }

    fn detach(&mut self) {
        self.assigned_node = None;
    }

    /// Scale the grant on one dimension by `factor`
    ///
    /// Memory is floored so that a node's integer total never overshoots the
    /// capacity it was scaled towards.
    pub fn rescale(&mut self, factor: f64, resource: Resource) {
        match resource {
            Resource::Cpu => self.cpu *= factor,
            Resource::Memory => self.memory = (self.memory as f64 * factor).floor() as u64,
        }
        if let Some(model) = &self.duration_model {
            self.duration = model.duration(self.cpu, self.memory);
        }
    }
}

/// Capacity of a node; also the default shape for nodes strategies create
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    /// CPU cores
    pub cpu: f64,
    /// Memory in MB
    pub memory: u64,
}

impl NodeSpec {
    pub fn new(cpu: f64, memory: u64) -> Self {
        Self { cpu, memory }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.cpu.is_finite() || self.cpu <= 0.0 {
            return Err(SlotpackError::invalid_capacity(format!(
                "cpu capacity must be finite and positive, got {}",
                self.cpu
            )));
        }
        if self.memory == 0 {
            return Err(SlotpackError::invalid_capacity("memory capacity must be positive"));
        }
        Ok(())
    }

    pub fn capacity(&self, resource: Resource) -> f64 {
        match resource {
            Resource::Cpu => self.cpu,
            Resource::Memory => self.memory as f64,
        }
    }
}

impl Default for NodeSpec {
    fn default() -> Self {
        // 8 cores, 16 GB
        NodeSpec { cpu: 8.0, memory: 16_384 }
    }
}

/// An elastic compute node owning the actions placed on it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    cpu_capacity: f64,
    memory_capacity: u64,
    actions: Vec<Action>,
}

impl Node {
    pub fn new(id: NodeId, spec: NodeSpec) -> Result<Self> {
        spec.validate()?;
        Ok(Node {
            id,
            cpu_capacity: spec.cpu,
            memory_capacity: spec.memory,
            actions: Vec::new(),
        })
    }

    pub fn spec(&self) -> NodeSpec {
        NodeSpec::new(self.cpu_capacity, self.memory_capacity)
    }

    pub fn cpu_capacity(&self) -> f64 {
        self.cpu_capacity
    }

    pub fn memory_capacity(&self) -> u64 {
        self.memory_capacity
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn action_count(&self) -> usize {
        self.actions.len()
    }

    /// A node with no actions is idle and may be reclaimed
    pub fn is_idle(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn used_cpu(&self) -> f64 {
        self.actions.iter().map(|a| a.cpu).sum()
    }

    pub fn used_memory(&self) -> u64 {
        self.actions.iter().map(|a| a.memory).sum()
    }

    pub fn free_cpu(&self) -> f64 {
        self.cpu_capacity - self.used_cpu()
    }

    /// Negative while the node is overcommitted
    pub fn free_memory(&self) -> i64 {
        self.memory_capacity as i64 - self.used_memory() as i64
    }

    pub fn capacity(&self, resource: Resource) -> f64 {
        self.spec().capacity(resource)
    }

    pub fn used(&self, resource: Resource) -> f64 {
        match resource {
            Resource::Cpu => self.used_cpu(),
            Resource::Memory => self.used_memory() as f64,
        }
    }

    pub fn free(&self, resource: Resource) -> f64 {
        self.capacity(resource) - self.used(resource)
    }

    pub fn cpu_utilization(&self) -> f64 {
        (self.used_cpu() / self.cpu_capacity).clamp(0.0, 1.0)
    }

    pub fn memory_utilization(&self) -> f64 {
        (self.used_memory() as f64 / self.memory_capacity as f64).clamp(0.0, 1.0)
    }

    pub fn utilization(&self, resource: Resource) -> f64 {
        match resource {
            Resource::Cpu => self.cpu_utilization(),
            Resource::Memory => self.memory_utilization(),
        }
    }

    pub fn can_fit(&self, action: &Action) -> bool {
        self.free_cpu() + CPU_EPSILON >= action.cpu && self.free_memory() >= action.memory as i64
    }

    /// Attach an action without checking capacity
    pub fn place(&mut self, mut action: Action, clock: SimulationClock) {
        action.place_on(self.id, clock);
        self.actions.push(action);
    }

    /// Remove every action that has run to completion, returning how many left
    pub fn expire_completed(&mut self, clock: SimulationClock) -> usize {
        let before = self.actions.len();
        self.actions.retain_mut(|action| {
            if action.is_complete(clock) {
                action.detach();
                false
            } else {
                true
            }
        });
        before - self.actions.len()
    }

    /// Longest remaining time among hosted actions; zero for an idle node
    pub fn time_to_end(&self, clock: SimulationClock) -> f64 {
        self.actions
            .iter()
            .map(|a| a.remaining_time(clock))
            .fold(0.0, f64::max)
    }

    pub fn is_overcommitted(&self, resource: Resource) -> bool {
        match resource {
            Resource::Cpu => self.used_cpu() > self.cpu_capacity + CPU_EPSILON,
            Resource::Memory => self.used_memory() > self.memory_capacity,
        }
    }

    pub fn is_within_capacity(&self) -> bool {
        Resource::ALL.iter().all(|&r| !self.is_overcommitted(r))
    }

    /// Shrink every hosted action on `resource` until the node fits again
    ///
    /// Returns the number of scaling passes applied (zero if the node already fit).
    pub fn shrink_to_capacity(&mut self, resource: Resource) -> usize {
        let mut passes = 0;
        while self.is_overcommitted(resource) && passes < MAX_REPAIR_PASSES {
            let factor = self.capacity(resource) / self.used(resource);
            for action in &mut self.actions {
                action.rescale(factor, resource);
            }
            passes += 1;
        }
        passes
    }
}
