//! Slotpack Core - Shared types and traits
//!
//! This crate defines the resource model used across:
//! - slotpack-scheduler (ILP bin packing)
//! - slotpack-greedy-scheduler (sequential packing)
//! - slotpack-simulation-engine (slot driver and reports)
//!
//! Key types:
//! - Action / Node resource model and the SimulationClock
//! - PlacementStrategy, ArrivalGenerator and DurationModel traits
//! - SimulationConfig and the error type

pub mod config;
pub mod context;
pub mod error;
pub mod traits;
pub mod types;

pub use config::*;
pub use context::*;
pub use error::*;
pub use traits::*;
pub use types::*;
