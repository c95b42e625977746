//! Slotpack Simulation Engine
//!
//! Slot-driven simulator that feeds the same arrivals to several placement
//! strategies and records a per-slot report for each.

pub mod arrivals;
pub mod report;
pub mod simulator;

pub use arrivals::{FixedArrivals, ScheduledArrivals};
pub use report::{Report, ReportLog, StrategySummary};
pub use simulator::{SimulationResult, Simulator};
