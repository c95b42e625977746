//! End-to-end runs of the simulator across every strategy

use std::sync::Arc;

use rand::rngs::StdRng;

use slotpack_core::{ActionDemand, ArrivalGenerator, DurationModel, NodeSpec, SimulationConfig};
use slotpack_greedy_scheduler::SequentialStrategy;
use slotpack_scheduler::{BinPackingConfig, BinPackingMode, BinPackingStrategy};
use slotpack_simulation_engine::{FixedArrivals, ScheduledArrivals, SimulationResult, Simulator};

fn config(seed: u64) -> SimulationConfig {
    SimulationConfig::default()
        .with_node(NodeSpec::new(4.0, 4096))
        .with_node_price(0.25)
        .with_seed(seed)
}

fn steady_simulator(seed: u64) -> Simulator {
    let mut simulator = Simulator::new(config(seed)).unwrap();
    simulator.add_reference_strategies(BinPackingConfig::default());
    simulator.add_arrivals(Box::new(FixedArrivals::new(
        "small",
        ActionDemand::new(1.0, 1024, 2.5),
        3,
    )));
    simulator
}

#[test]
fn test_all_strategies_host_the_same_work() {
    let result = steady_simulator(7).run(8).unwrap();

    assert_eq!(result.slots, 8);
    assert_eq!(result.logs.len(), 5);
    for slot in 0..8 {
        let counts: Vec<usize> = result
            .logs
            .iter()
            .map(|log| log.reports()[slot].action_count())
            .collect();
        assert!(
            counts.windows(2).all(|w| w[0] == w[1]),
            "Slot {} hosts different work per strategy: {:?}",
            slot,
            counts
        );
    }
}

#[test]
fn test_reports_respect_capacity_and_bounds() {
    let result = steady_simulator(11).run(10).unwrap();

    for log in &result.logs {
        assert_eq!(log.len(), 10);
        for report in log.reports() {
            assert!((0.0..=1.0).contains(&report.cpu_utilization));
            assert!((0.0..=1.0).contains(&report.memory_utilization));
            assert!(report.nodes.iter().all(|n| n.is_within_capacity()));
            assert!(
                report.nodes.iter().all(|n| !n.is_idle()),
                "Reports list occupied nodes only"
            );
            assert!((report.price - 0.25 * report.node_count() as f64).abs() < 1e-12);
        }
    }
}

#[test]
fn test_two_actions_escalate_bin_packing() {
    let mut simulator = Simulator::new(
        SimulationConfig::default()
            .with_node(NodeSpec::new(2.0, 2048))
            .with_seed(3),
    )
    .unwrap();
    simulator.add_strategy(Box::new(BinPackingStrategy::new(BinPackingMode::Both)));
    simulator.submit(ActionDemand::new(1.5, 1024, 10.0)).unwrap();
    simulator.submit(ActionDemand::new(1.5, 1024, 10.0)).unwrap();

    let result = simulator.run(1).unwrap();
    let report = &result.logs[0].reports()[0];
    assert_eq!(report.node_count(), 2);
    assert_eq!(report.action_count(), 2);
    assert!(report.nodes.iter().all(|n| n.is_within_capacity()));
}

#[test]
fn test_nodes_are_reused_after_actions_finish() {
    let mut simulator = Simulator::new(config(5)).unwrap();
    simulator.add_strategy(Box::new(BinPackingStrategy::new(BinPackingMode::Both)));
    simulator.add_strategy(Box::new(SequentialStrategy::new()));
    simulator.add_arrivals(Box::new(ScheduledArrivals::new(
        "waves",
        ActionDemand::new(2.0, 2048, 1.5),
        [4, 0, 0, 4],
    )));

    let result = simulator.run(4).unwrap();
    for log in &result.logs {
        assert_eq!(log.node_counts(), vec![2, 2, 0, 2], "{}", log.algorithm);
    }
    // The second wave lands on the original two nodes rather than new ones
    for name in ["both bin packing", "sequential"] {
        assert_eq!(simulator.nodes(name).unwrap().len(), 2, "{}", name);
    }
}

#[test]
fn test_seeded_runs_are_reproducible() {
    let a = steady_simulator(99).run(6).unwrap().to_json().unwrap();
    let b = steady_simulator(99).run(6).unwrap().to_json().unwrap();
    assert_eq!(a, b);
}

#[test]
fn test_result_json_round_trip() {
    let result = steady_simulator(1).run(3).unwrap();
    let json = result.to_json().unwrap();
    let parsed: SimulationResult = serde_json::from_str(&json).unwrap();

    assert_eq!(parsed.slots, 3);
    let names: Vec<String> = parsed.summaries().into_iter().map(|s| s.algorithm).collect();
    assert_eq!(names, result.logs.iter().map(|l| l.algorithm.clone()).collect::<Vec<_>>());
    let log = parsed.log("cpu bin packing").unwrap();
    assert_eq!(log.node_counts(), result.log("cpu bin packing").unwrap().node_counts());
}

/// Fixed-work actions: duration is work divided by the CPU grant
#[derive(Debug)]
struct FixedWork(f64);

impl DurationModel for FixedWork {
    fn duration(&self, cpu: f64, _memory: u64) -> f64 {
        self.0 / cpu
    }
}

/// Emits `count` CPU-heavy actions once, carrying the fixed-work model
struct CpuHeavyArrivals {
    count: usize,
    model: Arc<FixedWork>,
}

impl ArrivalGenerator for CpuHeavyArrivals {
    fn name(&self) -> &str {
        "cpu-heavy"
    }

    fn inter_arrival_count(&mut self, _rng: &mut StdRng) -> usize {
        std::mem::take(&mut self.count)
    }

    fn generate_action(&mut self, _rng: &mut StdRng) -> ActionDemand {
        ActionDemand::new(3.0, 1000, self.model.duration(3.0, 1000))
    }

    fn duration_model(&self) -> Option<Arc<dyn DurationModel>> {
        Some(self.model.clone())
    }
}

#[test]
fn test_repair_stretches_modelled_durations() {
    let mut simulator = Simulator::new(config(8)).unwrap();
    simulator.add_strategy(Box::new(BinPackingStrategy::new(BinPackingMode::Memory)));
    simulator.add_arrivals(Box::new(CpuHeavyArrivals {
        count: 2,
        model: Arc::new(FixedWork(6.0)),
    }));

    let result = simulator.run(1).unwrap();
    let report = &result.logs[0].reports()[0];

    // Memory-only packing stacks both on one node; CPU is then shrunk 6 -> 4
    assert_eq!(report.node_count(), 1);
    let node = &report.nodes[0];
    assert!(node.is_within_capacity());
    for action in node.actions() {
        assert!((action.cpu() - 2.0).abs() < 1e-9);
        assert!((action.duration() - 3.0).abs() < 1e-9, "Duration follows the shrunken grant");
    }
}
