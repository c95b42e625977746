//! First-fit sequential placement
//!
//! Walks the node list once with a forward-only cursor, placing each action
//! on the current node while it fits and appending a default node whenever
//! the cursor runs off the end.

use rand::seq::SliceRandom;
use tracing::debug;

use slotpack_core::{Action, Node, PlacementContext, PlacementStrategy, Result, SlotpackError};

/// Greedy sequential strategy (`sequential` / `shuffle`)
#[derive(Debug, Clone)]
pub struct SequentialStrategy {
    shuffle_nodes: bool,
    shuffle_actions: bool,
}

impl Default for SequentialStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl SequentialStrategy {
    /// Arrival-order placement over a shuffled node list
    pub fn new() -> Self {
        SequentialStrategy {
            shuffle_nodes: true,
            shuffle_actions: false,
        }
    }

    /// Same as [`SequentialStrategy::new`] but with the actions shuffled too
    pub fn shuffled() -> Self {
        SequentialStrategy {
            shuffle_nodes: true,
            shuffle_actions: true,
        }
    }

    /// Keep the incoming node order (plain first-fit)
    pub fn with_node_shuffle(mut self, enabled: bool) -> Self {
        self.shuffle_nodes = enabled;
        self
    }

    pub fn shuffles_actions(&self) -> bool {
        self.shuffle_actions
    }
}

impl PlacementStrategy for SequentialStrategy {
    fn name(&self) -> &str {
        if self.shuffle_actions { "shuffle" } else { "sequential" }
    }

    fn place(
        &mut self,
        pending: Vec<Action>,
        mut nodes: Vec<Node>,
        ctx: &mut PlacementContext<'_>,
    ) -> Result<Vec<Node>> {
        if self.shuffle_nodes {
            nodes.shuffle(ctx.rng);
        }
        let mut pending = pending;
        if self.shuffle_actions {
            pending.shuffle(ctx.rng);
        }

        let total = pending.len();
        let mut cursor = 0;
        let mut fresh: Option<usize> = None;
        let mut created = 0;

        for action in pending {
            loop {
                if cursor == nodes.len() {
                    nodes.push(ctx.new_node()?);
                    fresh = Some(cursor);
                    created += 1;
                }

                let node = &mut nodes[cursor];
                if node.can_fit(&action) {
                    node.place(action, ctx.clock);
                    break;
                }
                if fresh == Some(cursor) && node.is_idle() {
                    return Err(SlotpackError::ActionExceedsNodeCapacity {
                        action: action.id,
                        cpu: action.cpu(),
                        memory: action.memory(),
                        node_cpu: node.cpu_capacity(),
                        node_memory: node.memory_capacity(),
                    });
                }
                cursor += 1;
            }
        }

        debug!(
            algorithm = self.name(),
            placed = total,
            nodes = nodes.len(),
            created,
            "Sequential placement complete"
        );
        Ok(nodes)
    }
}
