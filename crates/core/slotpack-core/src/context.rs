//! Per-invocation context handed to placement strategies

use rand::rngs::StdRng;

use crate::error::Result;
use crate::types::{Node, NodeId, NodeSpec, SimulationClock};

/// Everything a strategy may consult or draw from during one placement call
pub struct PlacementContext<'a> {
    /// Simulated "now", used as the start time of placed actions
    pub clock: SimulationClock,

    /// Shape of freshly created nodes
    pub node_spec: NodeSpec,

    /// Random source for shuffles; seeded by the caller for reproducibility
    pub rng: &'a mut StdRng,

    next_node_id: &'a mut u64,
}

impl<'a> PlacementContext<'a> {
    pub fn new(
        clock: SimulationClock,
        node_spec: NodeSpec,
        rng: &'a mut StdRng,
        next_node_id: &'a mut u64,
    ) -> Self {
        PlacementContext {
            clock,
            node_spec,
            rng,
            next_node_id,
        }
    }

    /// Create a new, empty node with the default spec and a fresh id
    pub fn new_node(&mut self) -> Result<Node> {
        let node = Node::new(NodeId(*self.next_node_id), self.node_spec)?;
        *self.next_node_id += 1;
        Ok(node)
    }

    /// Id the next created node will receive
    pub fn next_node_id(&self) -> NodeId {
        NodeId(*self.next_node_id)
    }
}
