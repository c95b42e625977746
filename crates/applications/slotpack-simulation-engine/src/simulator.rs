//! Slot-driven simulator comparing placement strategies
//!
//! Every registered strategy runs in its own lane: a private node list, a
//! private random source and a private report log. All lanes see the same
//! arrivals each slot, so their reports are directly comparable.

use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use slotpack_core::{
    Action, ActionDemand, ActionId, ArrivalGenerator, Node, PlacementContext, PlacementStrategy,
    Result, SimulationClock, SimulationConfig,
};

use slotpack_greedy_scheduler::SequentialStrategy;
use slotpack_scheduler::{BinPackingConfig, BinPackingMode, BinPackingStrategy};

use crate::report::{Report, ReportLog, StrategySummary};

/// Outcome of a simulation run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationResult {
    pub slots: usize,
    pub logs: Vec<ReportLog>,
}

impl SimulationResult {
    pub fn summaries(&self) -> Vec<StrategySummary> {
        self.logs.iter().map(ReportLog::summary).collect()
    }

    /// Report log of the strategy with the given algorithm tag
    pub fn log(&self, algorithm: &str) -> Option<&ReportLog> {
        self.logs.iter().find(|log| log.algorithm == algorithm)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// One strategy with the state it carries from slot to slot
struct StrategyLane {
    strategy: Box<dyn PlacementStrategy>,
    nodes: Vec<Node>,
    rng: StdRng,
    next_node_id: u64,
    log: ReportLog,
}

impl StrategyLane {
    /// Run one slot against a snapshot of this lane's nodes
    fn run_slot(
        &mut self,
        pending: &[Action],
        clock: SimulationClock,
        config: &SimulationConfig,
    ) -> Result<()> {
        let expired: usize = self
            .nodes
            .iter_mut()
            .map(|node| node.expire_completed(clock))
            .sum();

        let mut ctx =
            PlacementContext::new(clock, config.node, &mut self.rng, &mut self.next_node_id);
        let nodes = self
            .strategy
            .place(pending.to_vec(), self.nodes.clone(), &mut ctx)?;
        self.nodes = nodes;

        let occupied: Vec<Node> = self
            .nodes
            .iter()
            .filter(|n| !n.is_idle())
            .cloned()
            .collect();
        let report = Report::new(
            self.strategy.name(),
            clock.now(),
            occupied,
            config.node_price_per_slot,
        );

        debug!(
            algorithm = self.strategy.name(),
            time = clock.now(),
            expired,
            placed = pending.len(),
            nodes = self.nodes.len(),
            occupied = report.node_count(),
            cpu_utilization = report.cpu_utilization,
            memory_utilization = report.memory_utilization,
            "Slot complete"
        );
        self.log.push(report);
        Ok(())
    }
}

/// Drives the per-slot cycle for every registered strategy
pub struct Simulator {
    config: SimulationConfig,
    clock: SimulationClock,
    lanes: Vec<StrategyLane>,
    arrivals: Vec<Box<dyn ArrivalGenerator>>,
    arrival_rng: StdRng,
    pending: Vec<Action>,
    next_action_id: u64,
    slots_run: usize,
    primed: bool,
}

impl Simulator {
    pub fn new(config: SimulationConfig) -> Result<Self> {
        config.validate()?;
        let arrival_rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Ok(Simulator {
            config,
            clock: SimulationClock::new(),
            lanes: Vec::new(),
            arrivals: Vec::new(),
            arrival_rng,
            pending: Vec::new(),
            next_action_id: 0,
            slots_run: 0,
            primed: false,
        })
    }

    /// Register a strategy lane, starting with no nodes
    pub fn add_strategy(&mut self, strategy: Box<dyn PlacementStrategy>) {
        // Lane k is seeded with seed + k + 1; arrivals use the seed itself
        let rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(self.lanes.len() as u64 + 1)),
            None => StdRng::from_entropy(),
        };
        let log = ReportLog::new(strategy.name());
        self.lanes.push(StrategyLane {
            strategy,
            nodes: Vec::new(),
            rng,
            next_node_id: 0,
            log,
        });
    }

    /// Register the five comparison strategies: memory, CPU and two-dimensional
    /// bin packing, then `sequential` and `shuffle`
    pub fn add_reference_strategies(&mut self, bin_packing: BinPackingConfig) {
        for mode in [BinPackingMode::Memory, BinPackingMode::Cpu, BinPackingMode::Both] {
            let config = bin_packing.clone().with_mode(mode);
            self.add_strategy(Box::new(BinPackingStrategy::with_config(config)));
        }
        self.add_strategy(Box::new(SequentialStrategy::new()));
        self.add_strategy(Box::new(SequentialStrategy::shuffled()));
    }

    pub fn add_arrivals(&mut self, generator: Box<dyn ArrivalGenerator>) {
        self.arrivals.push(generator);
    }

    /// Queue an action for the next slot
    pub fn submit(&mut self, demand: ActionDemand) -> Result<ActionId> {
        let action = Action::new(self.allocate_action_id(), demand)?;
        let id = action.id;
        self.pending.push(action);
        Ok(id)
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn clock(&self) -> SimulationClock {
        self.clock
    }

    pub fn slots_run(&self) -> usize {
        self.slots_run
    }

    pub fn pending(&self) -> &[Action] {
        &self.pending
    }

    pub fn strategy_names(&self) -> Vec<&str> {
        self.lanes.iter().map(|lane| lane.strategy.name()).collect()
    }

    /// Current node list of a strategy lane, idle nodes included
    pub fn nodes(&self, algorithm: &str) -> Option<&[Node]> {
        self.lanes
            .iter()
            .find(|lane| lane.strategy.name() == algorithm)
            .map(|lane| lane.nodes.as_slice())
    }

    /// Run a single slot
    pub fn step(&mut self) -> Result<()> {
        if !self.primed {
            self.prime();
        }

        let pending = std::mem::take(&mut self.pending);
        let clock = self.clock;
        info!(
            slot = self.slots_run,
            time = clock.now(),
            pending = pending.len(),
            strategies = self.lanes.len(),
            "Running slot"
        );

        for lane in &mut self.lanes {
            lane.run_slot(&pending, clock, &self.config)?;
        }

        self.clock.advance(self.config.slot_duration);
        self.slots_run += 1;
        self.draw_arrivals();
        Ok(())
    }

    /// Run `slots` slots and collect every lane's reports
    pub fn run(&mut self, slots: usize) -> Result<SimulationResult> {
        for _ in 0..slots {
            self.step()?;
        }

        let result = self.result();
        for summary in result.summaries() {
            info!(
                algorithm = %summary.algorithm,
                slots = summary.slots,
                mean_nodes = summary.mean_node_count,
                peak_nodes = summary.peak_node_count,
                cpu_utilization = summary.mean_cpu_utilization,
                memory_utilization = summary.mean_memory_utilization,
                total_cost = summary.total_cost,
                "Strategy summary"
            );
        }
        Ok(result)
    }

    /// Snapshot of every lane's reports so far
    pub fn result(&self) -> SimulationResult {
        SimulationResult {
            slots: self.slots_run,
            logs: self.lanes.iter().map(|lane| lane.log.clone()).collect(),
        }
    }

    /// First-slot arrivals: a fixed burst per generator when configured,
    /// otherwise an ordinary inter-arrival draw
    fn prime(&mut self) {
        self.primed = true;
        match self.config.initial_actions_per_class {
            Some(per_class) => {
                for idx in 0..self.arrivals.len() {
                    self.generate_from(idx, per_class);
                }
            }
            None => self.draw_arrivals(),
        }
    }

    fn draw_arrivals(&mut self) {
        for idx in 0..self.arrivals.len() {
            let count = self.arrivals[idx].inter_arrival_count(&mut self.arrival_rng);
            self.generate_from(idx, count);
        }
    }

    fn generate_from(&mut self, idx: usize, count: usize) {
        let model = self.arrivals[idx].duration_model();
        let mut generated = 0;
        for _ in 0..count {
            let demand = self.arrivals[idx].generate_action(&mut self.arrival_rng);
            let id = self.allocate_action_id();
            let action = match &model {
                Some(model) => {
                    Action::with_duration_model(id, demand.cpu, demand.memory, model.clone())
                }
                None => Action::new(id, demand),
            };
            match action {
                Ok(action) => {
                    self.pending.push(action);
                    generated += 1;
                }
                Err(e) => {
                    warn!(
                        generator = self.arrivals[idx].name(),
                        error = %e,
                        "Dropping invalid arrival"
                    );
                }
            }
        }
        debug!(generator = self.arrivals[idx].name(), generated, "Arrivals drawn");
    }

    fn allocate_action_id(&mut self) -> ActionId {
        let id = ActionId(self.next_action_id);
        self.next_action_id += 1;
        id
    }
}
