//! Per-slot reports and their per-strategy aggregation

use serde::{Deserialize, Serialize};

use slotpack_core::Node;

/// Snapshot of one strategy's occupied nodes at the end of a slot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub time: f64,
    pub algorithm: String,
    pub nodes: Vec<Node>,

    /// Mean CPU utilization over `nodes`, in [0, 1]
    pub cpu_utilization: f64,

    /// Mean memory utilization over `nodes`, in [0, 1]
    pub memory_utilization: f64,

    /// Cost of running `nodes` for one slot
    pub price: f64,
    pub cpu_waste_price: f64,
    pub memory_waste_price: f64,
}

impl Report {
    /// Build a report from the occupied nodes of one slot
    ///
    /// An empty node set yields zero utilization and zero price.
    pub fn new(
        algorithm: impl Into<String>,
        time: f64,
        nodes: Vec<Node>,
        node_price_per_slot: f64,
    ) -> Self {
        let (cpu_utilization, memory_utilization) = if nodes.is_empty() {
            (0.0, 0.0)
        } else {
            let count = nodes.len() as f64;
            (
                nodes.iter().map(Node::cpu_utilization).sum::<f64>() / count,
                nodes.iter().map(Node::memory_utilization).sum::<f64>() / count,
            )
        };

        let price = node_price_per_slot * nodes.len() as f64;

        Report {
            time,
            algorithm: algorithm.into(),
            nodes,
            cpu_utilization,
            memory_utilization,
            price,
            cpu_waste_price: (1.0 - cpu_utilization) * price,
            memory_waste_price: (1.0 - memory_utilization) * price,
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn action_count(&self) -> usize {
        self.nodes.iter().map(Node::action_count).sum()
    }
}

/// Ordered reports of a single strategy
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportLog {
    pub algorithm: String,
    reports: Vec<Report>,
}

impl ReportLog {
    pub fn new(algorithm: impl Into<String>) -> Self {
        ReportLog {
            algorithm: algorithm.into(),
            reports: Vec::new(),
        }
    }

    pub fn push(&mut self, report: Report) {
        self.reports.push(report);
    }

    pub fn reports(&self) -> &[Report] {
        &self.reports
    }

    pub fn len(&self) -> usize {
        self.reports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }

    pub fn last(&self) -> Option<&Report> {
        self.reports.last()
    }

    pub fn times(&self) -> Vec<f64> {
        self.reports.iter().map(|r| r.time).collect()
    }

    pub fn node_counts(&self) -> Vec<usize> {
        self.reports.iter().map(Report::node_count).collect()
    }

    pub fn cpu_utilization_series(&self) -> Vec<f64> {
        self.reports.iter().map(|r| r.cpu_utilization).collect()
    }

    pub fn memory_utilization_series(&self) -> Vec<f64> {
        self.reports.iter().map(|r| r.memory_utilization).collect()
    }

    /// Running total of per-slot price
    pub fn cumulative_cost(&self) -> Vec<f64> {
        self.reports
            .iter()
            .scan(0.0, |total, r| {
                *total += r.price;
                Some(*total)
            })
            .collect()
    }

    pub fn summary(&self) -> StrategySummary {
        let slots = self.reports.len();
        let mean = |f: fn(&Report) -> f64| -> f64 {
            if slots == 0 {
                0.0
            } else {
                self.reports.iter().map(f).sum::<f64>() / slots as f64
            }
        };
        let total = |f: fn(&Report) -> f64| -> f64 { self.reports.iter().map(f).sum() };

        StrategySummary {
            algorithm: self.algorithm.clone(),
            slots,
            mean_node_count: mean(|r| r.node_count() as f64),
            peak_node_count: self.node_counts().into_iter().max().unwrap_or(0),
            mean_cpu_utilization: mean(|r| r.cpu_utilization),
            mean_memory_utilization: mean(|r| r.memory_utilization),
            total_cost: total(|r| r.price),
            total_cpu_waste: total(|r| r.cpu_waste_price),
            total_memory_waste: total(|r| r.memory_waste_price),
        }
    }
}

/// Aggregate figures for one strategy over a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategySummary {
    pub algorithm: String,
    pub slots: usize,
    pub mean_node_count: f64,
    pub peak_node_count: usize,
    pub mean_cpu_utilization: f64,
    pub mean_memory_utilization: f64,
    pub total_cost: f64,
    pub total_cpu_waste: f64,
    pub total_memory_waste: f64,
}
