//! Compare the five placement strategies on a synthetic workload
//!
//! Usage: cargo run -p slotpack-simulation-engine --example compare_strategies [SLOTS] [OUTPUT.json]

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Gamma, Uniform};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use slotpack_core::{ActionDemand, ArrivalGenerator, DurationModel, SimulationConfig};
use slotpack_scheduler::BinPackingConfig;
use slotpack_simulation_engine::Simulator;

/// `base + work / cpu`, stretched when memory is short of `comfortable_memory`
#[derive(Debug)]
struct ExecTime {
    base: f64,
    work: f64,
    comfortable_memory: u64,
}

impl DurationModel for ExecTime {
    fn duration(&self, cpu: f64, memory: u64) -> f64 {
        let memory_penalty = (self.comfortable_memory as f64 / memory.max(1) as f64).max(1.0);
        (self.base + self.work / cpu.max(0.01)) * memory_penalty
    }
}

/// Gamma-distributed arrival counts with uniformly drawn grants
struct SyntheticClass {
    name: String,
    inter_arrival: Gamma<f64>,
    cpu: Uniform<f64>,
    memory: Uniform<u64>,
    model: Arc<ExecTime>,
}

impl SyntheticClass {
    fn new(
        name: &str,
        mean_arrivals: f64,
        cpu: (f64, f64),
        memory: (u64, u64),
        model: ExecTime,
    ) -> anyhow::Result<Self> {
        Ok(SyntheticClass {
            name: name.to_string(),
            inter_arrival: Gamma::new(mean_arrivals * mean_arrivals, 1.0 / mean_arrivals)?,
            cpu: Uniform::new_inclusive(cpu.0, cpu.1),
            memory: Uniform::new_inclusive(memory.0, memory.1),
            model: Arc::new(model),
        })
    }
}

impl ArrivalGenerator for SyntheticClass {
    fn name(&self) -> &str {
        &self.name
    }

    fn inter_arrival_count(&mut self, rng: &mut StdRng) -> usize {
        self.inter_arrival.sample(rng).round() as usize
    }

    fn generate_action(&mut self, rng: &mut StdRng) -> ActionDemand {
        let cpu = (self.cpu.sample(rng) * 100.0).round() / 100.0;
        let memory = self.memory.sample(rng);
        ActionDemand::new(cpu, memory, self.model.duration(cpu, memory))
    }

    fn duration_model(&self) -> Option<Arc<dyn DurationModel>> {
        Some(self.model.clone())
    }
}

fn workload() -> anyhow::Result<Vec<SyntheticClass>> {
    Ok(vec![
        SyntheticClass::new(
            "cpu-bound",
            2.0,
            (1.0, 3.0),
            (256, 1024),
            ExecTime { base: 1.0, work: 12.0, comfortable_memory: 256 },
        )?,
        SyntheticClass::new(
            "memory-bound",
            3.0,
            (0.25, 1.0),
            (2048, 6144),
            ExecTime { base: 2.0, work: 1.0, comfortable_memory: 4096 },
        )?,
        SyntheticClass::new(
            "mixed",
            2.0,
            (0.5, 2.0),
            (512, 4096),
            ExecTime { base: 1.5, work: 4.0, comfortable_memory: 1024 },
        )?,
    ])
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "slotpack=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut args = std::env::args().skip(1);
    let slots: usize = match args.next() {
        Some(raw) => raw.parse().with_context(|| format!("invalid slot count: {}", raw))?,
        None => 120,
    };
    let output = args.next();

    let config = SimulationConfig::default()
        .with_seed(42)
        .with_initial_actions(10);
    let bin_packing = BinPackingConfig::default().with_time_limit(Duration::from_secs(2));

    let mut simulator = Simulator::new(config)?;
    simulator.add_reference_strategies(bin_packing);
    for class in workload()? {
        info!(class = class.name(), "Registering workload class");
        simulator.add_arrivals(Box::new(class));
    }

    let result = simulator.run(slots)?;

    println!(
        "{:<20} {:>10} {:>10} {:>10} {:>10} {:>12}",
        "algorithm", "mean nodes", "peak nodes", "cpu util", "mem util", "total cost"
    );
    for summary in result.summaries() {
        println!(
            "{:<20} {:>10.2} {:>10} {:>9.1}% {:>9.1}% {:>12.6}",
            summary.algorithm,
            summary.mean_node_count,
            summary.peak_node_count,
            summary.mean_cpu_utilization * 100.0,
            summary.mean_memory_utilization * 100.0,
            summary.total_cost,
        );
    }

    if let Some(path) = output {
        fs::write(&path, result.to_json()?).with_context(|| format!("writing {}", path))?;
        info!(path = %path, "Wrote simulation result");
    }

    Ok(())
}
