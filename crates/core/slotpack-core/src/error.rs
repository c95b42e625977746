//! Error types for Slotpack

use thiserror::Error;

use crate::types::ActionId;

/// Slotpack result type
pub type Result<T> = std::result::Result<T, SlotpackError>;

/// Errors that can occur while building the model or running strategies
///
/// Solver infeasibility and post-assignment overflow are not errors; the
/// bin-packing strategy escalates or repairs instead.
#[derive(Error, Debug)]
pub enum SlotpackError {
    /// Action demand rejected at construction
    #[error("Invalid action demand: {0}")]
    InvalidDemand(String),

    /// Node capacity rejected at construction
    #[error("Invalid node capacity: {0}")]
    InvalidCapacity(String),

    /// An action that no node in the pool could ever host
    #[error(
        "Action {action} needs ({cpu} cpu, {memory} MB) but the largest node offers ({node_cpu} cpu, {node_memory} MB)"
    )]
    ActionExceedsNodeCapacity {
        action: ActionId,
        cpu: f64,
        memory: u64,
        node_cpu: f64,
        node_memory: u64,
    },

    /// Bin-packing escalation created more nodes than allowed in one invocation
    #[error("Escalation limit reached: created {created} nodes without a feasible assignment")]
    EscalationLimit { created: usize },

    /// Malformed integer program handed to a solver
    #[error("Solver error: {0}")]
    Solver(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SlotpackError {
    /// Create an invalid demand error
    pub fn invalid_demand(msg: impl Into<String>) -> Self {
        Self::InvalidDemand(msg.into())
    }

    /// Create an invalid capacity error
    pub fn invalid_capacity(msg: impl Into<String>) -> Self {
        Self::InvalidCapacity(msg.into())
    }

    /// Create a solver error
    pub fn solver(msg: impl Into<String>) -> Self {
        Self::Solver(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
