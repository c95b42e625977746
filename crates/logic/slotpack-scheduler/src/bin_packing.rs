//! ILP-based bin packing with node-pool escalation and capacity repair
//!
//! Each invocation formulates an assignment program over the currently
//! active nodes. When the solver cannot prove an optimal assignment (either
//! infeasible or out of time) the active pool grows by one node, reclaimed
//! from the idle pool when possible, and the program is solved again.

use std::time::Duration;

use pathfinding::matrix::Matrix;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use slotpack_core::{
    Action, CPU_EPSILON, Node, NodeSpec, PlacementContext, PlacementStrategy, Resource, Result,
    SlotpackError,
};

use crate::program::{BinaryProgram, Comparison, LinearExpr, Var};
use crate::solver::{BranchAndBoundSolver, IlpSolver, SolveStatus};

/// Default wall-clock budget per solve
pub const DEFAULT_TIME_LIMIT: Duration = Duration::from_secs(60);

/// Default cap on nodes created by one invocation
pub const DEFAULT_MAX_NEW_NODES: usize = 1024;

/// Resource dimensions constrained by the program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BinPackingMode {
    Cpu,
    Memory,
    #[default]
    Both,
}

impl BinPackingMode {
    pub fn resources(self) -> &'static [Resource] {
        match self {
            BinPackingMode::Cpu => &[Resource::Cpu],
            BinPackingMode::Memory => &[Resource::Memory],
            BinPackingMode::Both => &Resource::ALL,
        }
    }

    /// Algorithm tag used in reports
    pub fn algorithm_name(self) -> &'static str {
        match self {
            BinPackingMode::Cpu => "cpu bin packing",
            BinPackingMode::Memory => "memory bin packing",
            BinPackingMode::Both => "both bin packing",
        }
    }
}

/// Bin-packing strategy configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinPackingConfig {
    pub mode: BinPackingMode,

    /// Solver budget per attempt; running out counts as infeasible
    pub time_limit: Duration,

    /// Escalation guard: nodes one invocation may create
    pub max_new_nodes: usize,
}

impl Default for BinPackingConfig {
    fn default() -> Self {
        Self {
            mode: BinPackingMode::Both,
            time_limit: DEFAULT_TIME_LIMIT,
            max_new_nodes: DEFAULT_MAX_NEW_NODES,
        }
    }
}

impl BinPackingConfig {
    pub fn with_mode(mut self, mode: BinPackingMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_time_limit(mut self, time_limit: Duration) -> Self {
        self.time_limit = time_limit;
        self
    }

    pub fn with_max_new_nodes(mut self, max_new_nodes: usize) -> Self {
        self.max_new_nodes = max_new_nodes;
        self
    }
}

/// ILP bin-packing placement strategy
pub struct BinPackingStrategy<S: IlpSolver = BranchAndBoundSolver> {
    config: BinPackingConfig,
    solver: S,
}

impl BinPackingStrategy<BranchAndBoundSolver> {
    /// Strategy with default config for `mode`
    pub fn new(mode: BinPackingMode) -> Self {
        Self::with_config(BinPackingConfig::default().with_mode(mode))
    }

    pub fn with_config(config: BinPackingConfig) -> Self {
        Self::with_solver(config, BranchAndBoundSolver::new())
    }
}

impl<S: IlpSolver> BinPackingStrategy<S> {
    pub fn with_solver(config: BinPackingConfig, solver: S) -> Self {
        BinPackingStrategy { config, solver }
    }

    pub fn config(&self) -> &BinPackingConfig {
        &self.config
    }

    /// Place every pending action on the active pool, escalating as needed
    ///
    /// Returns the (possibly grown) active nodes followed by the idle nodes
    /// that were not reclaimed.
    pub fn pack(
        &mut self,
        pending: Vec<Action>,
        mut active: Vec<Node>,
        mut idle: Vec<Node>,
        ctx: &mut PlacementContext<'_>,
    ) -> Result<Vec<Node>> {
        if pending.is_empty() {
            active.append(&mut idle);
            return Ok(active);
        }

        let mut pending = pending;
        pending.shuffle(ctx.rng);
        self.reject_oversized(&pending, &active, &idle, ctx.node_spec)?;

        let mut created = 0;
        let mut reclaimed = 0;
        let assignment = loop {
            if let Some(assignment) = self.try_assign(&pending, &active)? {
                break assignment;
            }

            match Self::longest_running(&idle, ctx) {
                Some(idx) => {
                    let node = idle.remove(idx);
                    debug!(
                        node = %node.id,
                        actions = node.action_count(),
                        "Reclaiming node into active pool"
                    );
                    active.push(node);
                    reclaimed += 1;
                }
                None => {
                    if created >= self.config.max_new_nodes {
                        return Err(SlotpackError::EscalationLimit { created });
                    }
                    let node = ctx.new_node()?;
                    debug!(node = %node.id, "Creating node for active pool");
                    active.push(node);
                    created += 1;
                }
            }
        };

        for (action, node_idx) in pending.into_iter().zip(assignment) {
            active[node_idx].place(action, ctx.clock);
        }
        Self::repair(&mut active);

        debug!(
            algorithm = self.config.mode.algorithm_name(),
            active = active.len(),
            idle = idle.len(),
            reclaimed,
            created,
            "Bin packing complete"
        );

        active.append(&mut idle);
        Ok(active)
    }

    /// Idle node whose actions finish last (first among ties)
    fn longest_running(idle: &[Node], ctx: &PlacementContext<'_>) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;
        for (idx, node) in idle.iter().enumerate() {
            let time_to_end = node.time_to_end(ctx.clock);
            if best.is_none_or(|(_, longest)| time_to_end > longest) {
                best = Some((idx, time_to_end));
            }
        }
        best.map(|(idx, _)| idx)
    }

    /// Refuse actions that neither a fresh node nor the free space of an
    /// existing node can hold on a constrained dimension
    ///
    /// Time does not advance within one invocation, so capacity held by
    /// running actions on existing nodes never becomes available.
    fn reject_oversized(
        &self,
        pending: &[Action],
        active: &[Node],
        idle: &[Node],
        spec: NodeSpec,
    ) -> Result<()> {
        let resources = self.config.mode.resources();

        for action in pending {
            let fits_spec = resources
                .iter()
                .all(|&r| action.demand(r) <= spec.capacity(r) + CPU_EPSILON);
            let fits_existing = active.iter().chain(idle).any(|node| {
                resources
                    .iter()
                    .all(|&r| action.demand(r) <= node.free(r) + CPU_EPSILON)
            });
            if !fits_spec && !fits_existing {
                return Err(SlotpackError::ActionExceedsNodeCapacity {
                    action: action.id,
                    cpu: action.cpu(),
                    memory: action.memory(),
                    node_cpu: spec.cpu,
                    node_memory: spec.memory,
                });
            }
        }
        Ok(())
    }

    /// Necessary conditions for feasibility, checked before paying for a solve
    fn trivially_infeasible(&self, pending: &[Action], active: &[Node]) -> bool {
        let resources = self.config.mode.resources();

        for &r in resources {
            let demand: f64 = pending.iter().map(|a| a.demand(r)).sum();
            let free: f64 = active.iter().map(|n| n.free(r).max(0.0)).sum();
            if demand > free + CPU_EPSILON {
                return true;
            }
        }

        pending.iter().any(|action| {
            !active.iter().any(|node| {
                resources
                    .iter()
                    .all(|&r| action.demand(r) <= node.free(r) + CPU_EPSILON)
            })
        })
    }

    /// Solve the assignment program once; `None` when no optimal assignment
    /// was proven. On success yields the chosen node index per action.
    fn try_assign(&mut self, pending: &[Action], active: &[Node]) -> Result<Option<Vec<usize>>> {
        if active.is_empty() || self.trivially_infeasible(pending, active) {
            debug!(
                items = pending.len(),
                bins = active.len(),
                "Active pool cannot hold pending actions, escalating"
            );
            return Ok(None);
        }

        let items = pending.len();
        let bins = active.len();
        let mut program = BinaryProgram::new("2D_Bin_Packing");
        let vars: Vec<Var> = (0..items * bins).map(|_| program.add_var()).collect();
        let x = Matrix::from_vec(items, bins, vars)
            .map_err(|e| SlotpackError::solver(format!("variable layout: {:?}", e)))?;

        // Exactly one node per action
        for i in 0..items {
            let expr: LinearExpr = (0..bins).map(|j| (x[(i, j)], 1.0)).collect();
            program.add_constraint(expr, Comparison::Eq, 1.0);
        }

        // Per-node free capacity on every constrained dimension
        for (j, node) in active.iter().enumerate() {
            for &r in self.config.mode.resources() {
                let expr: LinearExpr = pending
                    .iter()
                    .enumerate()
                    .map(|(i, action)| (x[(i, j)], action.demand(r)))
                    .collect();
                program.add_constraint(expr, Comparison::Le, node.free(r));
            }
        }

        let objective: LinearExpr = (0..items)
            .flat_map(|i| (0..bins).map(move |j| (i, j)))
            .map(|ij| (x[ij], 1.0))
            .collect();
        program.minimize(objective);

        let solution = self.solver.solve(&program, self.config.time_limit)?;
        match solution.status {
            SolveStatus::Optimal => {}
            SolveStatus::TimedOut => {
                warn!(
                    items,
                    bins,
                    time_limit_secs = self.config.time_limit.as_secs_f64(),
                    "Solver timed out, escalating node pool"
                );
                return Ok(None);
            }
            SolveStatus::Infeasible => return Ok(None),
        }

        let mut assignment = Vec::with_capacity(items);
        for i in 0..items {
            let chosen = (0..bins).find(|&j| solution.value(x[(i, j)]) == Some(true));
            match chosen {
                Some(j) => assignment.push(j),
                None => {
                    return Err(SlotpackError::solver(format!(
                        "optimal solution leaves action {} unassigned",
                        pending[i].id
                    )));
                }
            }
        }
        Ok(Some(assignment))
    }

    /// Shrink resident actions on any node pushed over capacity
    fn repair(active: &mut [Node]) {
        for node in active.iter_mut() {
            for r in Resource::ALL {
                let used = node.used(r);
                let passes = node.shrink_to_capacity(r);
                if passes > 0 {
                    warn!(
                        node = %node.id,
                        resource = %r,
                        used,
                        capacity = node.capacity(r),
                        passes,
                        "Node overcommitted, shrinking resident actions"
                    );
                }
            }
        }
    }
}

impl<S: IlpSolver> PlacementStrategy for BinPackingStrategy<S> {
    fn name(&self) -> &str {
        self.config.mode.algorithm_name()
    }

    /// Every existing node starts idle; the active pool is built up by
    /// reclaiming the longest-running nodes first.
    fn place(
        &mut self,
        pending: Vec<Action>,
        nodes: Vec<Node>,
        ctx: &mut PlacementContext<'_>,
    ) -> Result<Vec<Node>> {
        self.pack(pending, Vec::new(), nodes, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::Solution;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use slotpack_core::{ActionDemand, ActionId, NodeId, SimulationClock};
    use std::collections::HashSet;

    fn action(id: u64, cpu: f64, memory: u64, duration: f64) -> Action {
        Action::new(ActionId(id), ActionDemand::new(cpu, memory, duration)).unwrap()
    }

    fn node(id: u64, cpu: f64, memory: u64) -> Node {
        Node::new(NodeId(id), NodeSpec::new(cpu, memory)).unwrap()
    }

    fn run(
        strategy: &mut impl PlacementStrategy,
        pending: Vec<Action>,
        nodes: Vec<Node>,
        spec: NodeSpec,
        clock: SimulationClock,
    ) -> Result<Vec<Node>> {
        let mut rng = StdRng::seed_from_u64(11);
        let mut next_id = 100;
        let mut ctx = PlacementContext::new(clock, spec, &mut rng, &mut next_id);
        strategy.place(pending, nodes, &mut ctx)
    }

    fn placed_ids(nodes: &[Node]) -> Vec<ActionId> {
        let mut ids: Vec<ActionId> = nodes
            .iter()
            .flat_map(|n| n.actions().iter().map(|a| a.id))
            .collect();
        ids.sort();
        ids
    }

    #[test]
    fn test_exact_fit_on_existing_node() {
        let mut strategy = BinPackingStrategy::new(BinPackingMode::Both);
        let spec = NodeSpec::new(4.0, 4096);
        let nodes = run(
            &mut strategy,
            vec![action(1, 4.0, 4096, 10.0)],
            vec![node(1, 4.0, 4096)],
            spec,
            SimulationClock::new(),
        )
        .unwrap();

        assert_eq!(nodes.len(), 1, "Should reuse the existing node");
        assert_eq!(nodes[0].id, NodeId(1));
        assert_eq!(nodes[0].free_cpu(), 0.0);
        assert_eq!(nodes[0].free_memory(), 0);
    }

    #[test]
    fn test_escalates_when_one_node_is_infeasible() {
        let mut strategy = BinPackingStrategy::new(BinPackingMode::Both);
        let spec = NodeSpec::new(2.0, 2048);
        let nodes = run(
            &mut strategy,
            vec![action(1, 1.5, 1024, 5.0), action(2, 1.5, 1024, 5.0)],
            vec![node(1, 2.0, 2048)],
            spec,
            SimulationClock::new(),
        )
        .unwrap();

        assert_eq!(nodes.len(), 2, "Should escalate to a second node");
        assert!(nodes.iter().all(|n| n.action_count() == 1));
        assert!(nodes.iter().all(|n| n.is_within_capacity()));
        assert_eq!(placed_ids(&nodes), vec![ActionId(1), ActionId(2)]);
    }

    #[test]
    fn test_every_action_assigned_exactly_once() {
        let mut strategy = BinPackingStrategy::new(BinPackingMode::Both);
        let pending: Vec<Action> = (0..20)
            .map(|i| action(i, 1.0, 256 + (i % 4) * 256, 3.0))
            .collect();
        let nodes = run(
            &mut strategy,
            pending,
            Vec::new(),
            NodeSpec::new(4.0, 4096),
            SimulationClock::new(),
        )
        .unwrap();

        let ids = placed_ids(&nodes);
        assert_eq!(ids.len(), 20);
        assert_eq!(ids.iter().collect::<HashSet<_>>().len(), 20);
        assert_eq!(nodes.len(), 5, "CPU binds at four actions per node");
        for n in &nodes {
            assert!(n.is_within_capacity(), "Node {} over capacity", n.id);
            for a in n.actions() {
                assert_eq!(a.assigned_node(), Some(n.id));
            }
        }
    }

    #[test]
    fn test_empty_pending_keeps_nodes() {
        let mut strategy = BinPackingStrategy::new(BinPackingMode::Both);
        let mut busy = node(1, 4.0, 4096);
        busy.place(action(1, 1.0, 512, 10.0), SimulationClock::new());
        let nodes = run(
            &mut strategy,
            Vec::new(),
            vec![busy, node(2, 4.0, 4096)],
            NodeSpec::new(4.0, 4096),
            SimulationClock::new(),
        )
        .unwrap();

        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].action_count(), 1);
        assert!(nodes[1].is_idle());
    }

    #[test]
    fn test_cpu_mode_repairs_memory_overflow() {
        let mut strategy = BinPackingStrategy::new(BinPackingMode::Cpu);
        let nodes = run(
            &mut strategy,
            vec![action(1, 1.0, 800, 5.0), action(2, 1.0, 800, 5.0)],
            Vec::new(),
            NodeSpec::new(4.0, 1000),
            SimulationClock::new(),
        )
        .unwrap();

        assert_eq!(nodes.len(), 1, "CPU-only packing ignores memory");
        assert!(nodes[0].used_memory() <= 1000);
        assert!(nodes[0].actions().iter().all(|a| a.memory() == 500));
        assert_eq!(nodes[0].actions()[0].cpu(), 1.0);
        assert_eq!(nodes[0].used_cpu(), 2.0);
    }

    #[test]
    fn test_memory_mode_repairs_cpu_overflow() {
        let mut strategy = BinPackingStrategy::new(BinPackingMode::Memory);
        let nodes = run(
            &mut strategy,
            vec![action(1, 3.0, 1000, 5.0), action(2, 3.0, 1000, 5.0)],
            Vec::new(),
            NodeSpec::new(4.0, 4096),
            SimulationClock::new(),
        )
        .unwrap();

        assert_eq!(nodes.len(), 1);
        assert!(nodes[0].is_within_capacity());
        assert!((nodes[0].used_cpu() - 4.0).abs() < 1e-9);
        assert_eq!(nodes[0].used_memory(), 2000);
    }

    #[test]
    fn test_reclaims_longest_running_idle_node_first() {
        let mut strategy = BinPackingStrategy::new(BinPackingMode::Both);
        let start = SimulationClock::new();
        let mut short = node(1, 4.0, 4096);
        short.place(action(1, 1.0, 512, 5.0), start);
        let mut long = node(2, 4.0, 4096);
        long.place(action(2, 1.0, 512, 50.0), start);

        let nodes = run(
            &mut strategy,
            vec![action(3, 1.0, 512, 5.0)],
            vec![short, long],
            NodeSpec::new(4.0, 4096),
            SimulationClock::at(1.0),
        )
        .unwrap();

        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].id, NodeId(2), "Longest-running node becomes active first");
        assert_eq!(nodes[0].action_count(), 2);
        assert_eq!(nodes[1].id, NodeId(1));
        assert_eq!(nodes[1].action_count(), 1);
    }

    #[test]
    fn test_pack_keeps_active_before_idle() {
        let mut strategy = BinPackingStrategy::new(BinPackingMode::Both);
        let mut rng = StdRng::seed_from_u64(3);
        let mut next_id = 10;
        let mut ctx = PlacementContext::new(
            SimulationClock::new(),
            NodeSpec::new(4.0, 4096),
            &mut rng,
            &mut next_id,
        );

        let nodes = strategy
            .pack(
                vec![action(1, 1.0, 512, 5.0)],
                vec![node(1, 4.0, 4096)],
                vec![node(2, 4.0, 4096), node(3, 4.0, 4096)],
                &mut ctx,
            )
            .unwrap();

        let ids: Vec<NodeId> = nodes.iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![NodeId(1), NodeId(2), NodeId(3)]);
        assert_eq!(nodes[0].action_count(), 1);
    }

    #[test]
    fn test_oversized_action_is_rejected() {
        let mut strategy = BinPackingStrategy::new(BinPackingMode::Both);
        let err = run(
            &mut strategy,
            vec![action(1, 9.0, 512, 5.0)],
            Vec::new(),
            NodeSpec::new(4.0, 4096),
            SimulationClock::new(),
        )
        .unwrap_err();
        assert!(matches!(err, SlotpackError::ActionExceedsNodeCapacity { .. }));

        // Memory is unconstrained in CPU mode, so the same shape is repaired instead
        let mut strategy = BinPackingStrategy::new(BinPackingMode::Cpu);
        let nodes = run(
            &mut strategy,
            vec![action(1, 1.0, 8192, 5.0)],
            Vec::new(),
            NodeSpec::new(4.0, 4096),
            SimulationClock::new(),
        )
        .unwrap();
        assert_eq!(nodes[0].used_memory(), 4096);
    }

    #[test]
    fn test_oversized_checks_free_space_not_capacity() {
        let spec = NodeSpec::new(4.0, 4096);
        let mut big = node(1, 8.0, 8192);
        big.place(action(1, 6.0, 1024, 50.0), SimulationClock::new());

        // The big node's remaining 2 cpu cannot take 5 cpu, and new nodes are too small
        let mut strategy = BinPackingStrategy::new(BinPackingMode::Cpu);
        let err = run(
            &mut strategy,
            vec![action(2, 5.0, 512, 5.0)],
            vec![big],
            spec,
            SimulationClock::new(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            SlotpackError::ActionExceedsNodeCapacity { action: ActionId(2), .. }
        ));

        // An empty big node can, through reclaim
        let nodes = run(
            &mut strategy,
            vec![action(3, 5.0, 512, 5.0)],
            vec![node(2, 8.0, 8192)],
            spec,
            SimulationClock::new(),
        )
        .unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].id, NodeId(2));
        assert_eq!(nodes[0].actions()[0].id, ActionId(3));
    }

    #[test]
    fn test_escalation_limit() {
        let config = BinPackingConfig::default().with_max_new_nodes(1);
        let mut strategy = BinPackingStrategy::with_config(config);
        let err = run(
            &mut strategy,
            vec![action(1, 3.0, 512, 5.0), action(2, 3.0, 512, 5.0)],
            Vec::new(),
            NodeSpec::new(4.0, 4096),
            SimulationClock::new(),
        )
        .unwrap_err();
        assert!(matches!(err, SlotpackError::EscalationLimit { created: 1 }));
    }

    /// Reports a timeout for the first `timeouts` solves, then delegates
    struct FlakySolver {
        timeouts: usize,
        calls: usize,
        inner: BranchAndBoundSolver,
    }

    impl IlpSolver for FlakySolver {
        fn solve(&mut self, program: &BinaryProgram, time_limit: Duration) -> Result<Solution> {
            self.calls += 1;
            if self.calls <= self.timeouts {
                return self.inner.solve(program, Duration::ZERO);
            }
            self.inner.solve(program, time_limit)
        }
    }

    #[test]
    fn test_timeout_escalates_like_infeasible() {
        let solver = FlakySolver {
            timeouts: 1,
            calls: 0,
            inner: BranchAndBoundSolver::new(),
        };
        let mut strategy = BinPackingStrategy::with_solver(BinPackingConfig::default(), solver);
        let nodes = run(
            &mut strategy,
            vec![action(1, 1.0, 512, 5.0), action(2, 1.0, 512, 5.0)],
            Vec::new(),
            NodeSpec::new(4.0, 4096),
            SimulationClock::new(),
        )
        .unwrap();

        // One node would have sufficed; the timed-out attempt forced a second
        assert_eq!(nodes.len(), 2);
        assert_eq!(placed_ids(&nodes).len(), 2);
        assert_eq!(strategy.solver.calls, 2);
    }

    #[test]
    fn test_names() {
        assert_eq!(BinPackingStrategy::new(BinPackingMode::Cpu).name(), "cpu bin packing");
        assert_eq!(BinPackingStrategy::new(BinPackingMode::Memory).name(), "memory bin packing");
        assert_eq!(BinPackingStrategy::new(BinPackingMode::Both).name(), "both bin packing");
    }
}
