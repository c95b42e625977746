//! Simulation configuration constants consumed by the core

use serde::{Deserialize, Serialize};

use crate::error::{Result, SlotpackError};
use crate::types::NodeSpec;

/// Default number of simulated seconds per slot
pub const DEFAULT_SLOT_DURATION_SECS: f64 = 1.0;

/// Default price of one node for one slot
pub const DEFAULT_NODE_PRICE_PER_SLOT: f64 = 0.0001;

/// Constants supplied by the surrounding system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Capacity of nodes created by strategies
    pub node: NodeSpec,

    /// Price charged per node per slot
    pub node_price_per_slot: f64,

    /// Simulated seconds the clock advances per slot
    pub slot_duration: f64,

    /// Seed for every random source in the run (entropy when absent)
    pub seed: Option<u64>,

    /// Actions drawn per arrival generator for the first slot, instead of an
    /// inter-arrival count
    pub initial_actions_per_class: Option<usize>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            node: NodeSpec::default(),
            node_price_per_slot: DEFAULT_NODE_PRICE_PER_SLOT,
            slot_duration: DEFAULT_SLOT_DURATION_SECS,
            seed: None,
            initial_actions_per_class: None,
        }
    }
}

impl SimulationConfig {
    /// Parse and validate a JSON config; missing fields take defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: SimulationConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.node
            .validate()
            .map_err(|e| SlotpackError::config(format!("node: {}", e)))?;
        if !self.slot_duration.is_finite() || self.slot_duration <= 0.0 {
            return Err(SlotpackError::config(format!(
                "slot_duration must be positive, got {}",
                self.slot_duration
            )));
        }
        if !self.node_price_per_slot.is_finite() || self.node_price_per_slot < 0.0 {
            return Err(SlotpackError::config(format!(
                "node_price_per_slot must be non-negative, got {}",
                self.node_price_per_slot
            )));
        }
        Ok(())
    }

    /// Set the node shape
    pub fn with_node(mut self, node: NodeSpec) -> Self {
        self.node = node;
        self
    }

    /// Set the per-node, per-slot price
    pub fn with_node_price(mut self, price: f64) -> Self {
        self.node_price_per_slot = price;
        self
    }

    /// Set the slot length
    pub fn with_slot_duration(mut self, secs: f64) -> Self {
        self.slot_duration = secs;
        self
    }

    /// Make the run reproducible
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Seed the first slot with a fixed burst per arrival generator
    pub fn with_initial_actions(mut self, per_class: usize) -> Self {
        self.initial_actions_per_class = Some(per_class);
        self
    }
}
