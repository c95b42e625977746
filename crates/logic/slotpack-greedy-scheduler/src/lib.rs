//! Slotpack Greedy Scheduler
//!
//! Sequential first-fit placement. Provides the `sequential` strategy and the
//! `shuffle` variant that also randomizes arrival order.

pub mod sequential;

pub use sequential::SequentialStrategy;
