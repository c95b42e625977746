//! Deterministic arrival generators

use std::collections::VecDeque;

use rand::rngs::StdRng;

use slotpack_core::{ActionDemand, ArrivalGenerator};

/// Same demand, same count, every slot
#[derive(Debug, Clone)]
pub struct FixedArrivals {
    name: String,
    demand: ActionDemand,
    per_slot: usize,
}

impl FixedArrivals {
    pub fn new(name: impl Into<String>, demand: ActionDemand, per_slot: usize) -> Self {
        FixedArrivals {
            name: name.into(),
            demand,
            per_slot,
        }
    }
}

impl ArrivalGenerator for FixedArrivals {
    fn name(&self) -> &str {
        &self.name
    }

    fn inter_arrival_count(&mut self, _rng: &mut StdRng) -> usize {
        self.per_slot
    }

    fn generate_action(&mut self, _rng: &mut StdRng) -> ActionDemand {
        self.demand
    }
}

/// Same demand, with a scripted count per slot; silent once the script runs out
#[derive(Debug, Clone)]
pub struct ScheduledArrivals {
    name: String,
    demand: ActionDemand,
    counts: VecDeque<usize>,
}

impl ScheduledArrivals {
    pub fn new(
        name: impl Into<String>,
        demand: ActionDemand,
        counts: impl IntoIterator<Item = usize>,
    ) -> Self {
        ScheduledArrivals {
            name: name.into(),
            demand,
            counts: counts.into_iter().collect(),
        }
    }

    pub fn remaining_slots(&self) -> usize {
        self.counts.len()
    }
}

impl ArrivalGenerator for ScheduledArrivals {
    fn name(&self) -> &str {
        &self.name
    }

    fn inter_arrival_count(&mut self, _rng: &mut StdRng) -> usize {
        self.counts.pop_front().unwrap_or(0)
    }

    fn generate_action(&mut self, _rng: &mut StdRng) -> ActionDemand {
        self.demand
    }
}
