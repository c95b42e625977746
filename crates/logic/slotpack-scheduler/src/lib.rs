//! Slotpack Scheduler - ILP bin packing
//!
//! Places pending actions by solving a 0/1 assignment program over an active
//! node pool, growing the pool one node at a time until the program becomes
//! solvable. Nodes that end up overcommitted on an unconstrained dimension
//! are repaired by proportionally shrinking their actions.
//!
//! Modules:
//! - program: solver-agnostic binary program model
//! - solver: `IlpSolver` trait and the branch-and-bound implementation
//! - bin_packing: the placement strategy (CPU, memory or both)

pub mod bin_packing;
pub mod program;
pub mod solver;

pub use bin_packing::{
    BinPackingConfig, BinPackingMode, BinPackingStrategy, DEFAULT_MAX_NEW_NODES,
    DEFAULT_TIME_LIMIT,
};
pub use program::{BinaryProgram, Comparison, Constraint, LinearExpr, Var};
pub use solver::{BranchAndBoundSolver, IlpSolver, SolveStatus, Solution};
