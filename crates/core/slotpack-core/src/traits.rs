//! Core traits for Slotpack
//!
//! Placement strategies, arrival generators and execution-time models are
//! all plugged into the simulator through these interfaces only.

use std::fmt::Debug;
use std::sync::Arc;

use rand::rngs::StdRng;

use crate::context::PlacementContext;
use crate::error::Result;
use crate::types::{Action, ActionDemand, Node};

/// Execution-time model: duration of an action given its resource grant
pub trait DurationModel: Debug + Send + Sync {
    fn duration(&self, cpu: f64, memory: u64) -> f64;
}

/// Source of arriving actions for one workload class
pub trait ArrivalGenerator: Send {
    /// Workload class name
    fn name(&self) -> &str;

    /// Number of actions arriving during the next slot
    fn inter_arrival_count(&mut self, rng: &mut StdRng) -> usize;

    /// Demand and duration of one arriving action
    fn generate_action(&mut self, rng: &mut StdRng) -> ActionDemand;

    /// Model attached to generated actions so a shrunken grant runs longer
    fn duration_model(&self) -> Option<Arc<dyn DurationModel>> {
        None
    }
}

/// Placement strategy: (pending actions, existing nodes) -> new node arrangement
///
/// Strategies receive owned snapshots and never observe another strategy's
/// nodes. Every pending action must end up on exactly one returned node.
pub trait PlacementStrategy: Send {
    /// Algorithm tag carried into reports
    fn name(&self) -> &str;

    /// Place `pending` onto `nodes`, creating nodes through `ctx` as needed
    fn place(
        &mut self,
        pending: Vec<Action>,
        nodes: Vec<Node>,
        ctx: &mut PlacementContext<'_>,
    ) -> Result<Vec<Node>>;
}
