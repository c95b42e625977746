//! ILP solve capability
//!
//! The bin-packing strategy talks to solvers through [`IlpSolver`] only. The
//! bundled [`BranchAndBoundSolver`] is an exact depth-first search over the
//! binary variables with bound propagation and a wall-clock deadline.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::debug;

use slotpack_core::Result;

use crate::program::{BinaryProgram, Comparison, Var};

/// Slack allowed when checking constraint activities
pub const FEASIBILITY_TOLERANCE: f64 = 1e-6;

/// Default number of search nodes between deadline checks
const DEFAULT_CHECK_INTERVAL: u64 = 256;

const UNFIXED: i8 = -1;

/// Outcome of a solve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolveStatus {
    /// Proven optimal; variable values are available
    Optimal,
    /// Proven to have no feasible assignment
    Infeasible,
    /// Time limit hit before optimality or infeasibility was proven
    TimedOut,
}

impl SolveStatus {
    pub fn is_optimal(self) -> bool {
        matches!(self, SolveStatus::Optimal)
    }
}

/// Solver result; values are only present for [`SolveStatus::Optimal`]
#[derive(Debug, Clone)]
pub struct Solution {
    pub status: SolveStatus,
    pub objective: Option<f64>,
    pub nodes_explored: u64,
    values: Option<Vec<bool>>,
}

impl Solution {
    pub fn value(&self, var: Var) -> Option<bool> {
        self.values.as_ref().map(|values| values[var.0])
    }

    pub fn values(&self) -> Option<&[bool]> {
        self.values.as_deref()
    }
}

/// Anything that can solve a [`BinaryProgram`] within a time budget
pub trait IlpSolver: Send {
    /// Blocking solve; timeouts are reported through the status, not as errors
    fn solve(&mut self, program: &BinaryProgram, time_limit: Duration) -> Result<Solution>;
}

/// Exact depth-first branch-and-bound for binary programs
#[derive(Debug, Clone)]
pub struct BranchAndBoundSolver {
    check_interval: u64,
}

impl Default for BranchAndBoundSolver {
    fn default() -> Self {
        Self {
            check_interval: DEFAULT_CHECK_INTERVAL,
        }
    }
}

impl BranchAndBoundSolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check the deadline every `interval` search nodes
    pub fn with_check_interval(mut self, interval: u64) -> Self {
        self.check_interval = interval.max(1);
        self
    }
}

impl IlpSolver for BranchAndBoundSolver {
    fn solve(&mut self, program: &BinaryProgram, time_limit: Duration) -> Result<Solution> {
        program.validate()?;

        let started = Instant::now();
        let deadline = started.checked_add(time_limit);
        let mut search = Search::new(program);
        let status = search.run(deadline, self.check_interval);

        debug!(
            program = program.name(),
            vars = program.num_vars(),
            constraints = program.constraints().len(),
            ?status,
            nodes = search.explored,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Binary program solved"
        );

        let (objective, values) = match (status, search.incumbent) {
            (SolveStatus::Optimal, Some((objective, values))) => (Some(objective), Some(values)),
            _ => (None, None),
        };
        Ok(Solution {
            status,
            objective,
            nodes_explored: search.explored,
            values,
        })
    }
}

/// Constraint normalized to `lo <= Σ a·x <= hi` with running activity bounds
#[derive(Debug)]
struct Row {
    lo: f64,
    hi: f64,
    is_eq: bool,
    terms: Vec<(usize, f64)>,
    max_pos: f64,
    max_neg: f64,
    min_act: f64,
    max_act: f64,
    queued: bool,
}

impl Row {
    fn violated(&self) -> bool {
        self.min_act > self.hi + FEASIBILITY_TOLERANCE
            || self.max_act < self.lo - FEASIBILITY_TOLERANCE
    }

    /// Whether fixing any single free variable could be forced either way
    fn may_force(&self) -> bool {
        let tol = FEASIBILITY_TOLERANCE;
        self.min_act + self.max_pos > self.hi + tol
            || self.min_act + self.max_neg > self.hi + tol
            || self.max_act - self.max_neg < self.lo - tol
            || self.max_act - self.max_pos < self.lo - tol
    }

    /// (value 1 allowed, value 0 allowed) for a free variable with coefficient `a`
    fn allowed(&self, a: f64) -> (bool, bool) {
        let tol = FEASIBILITY_TOLERANCE;
        let base_min = self.min_act - a.min(0.0);
        let base_max = self.max_act - a.max(0.0);
        let one = base_min + a <= self.hi + tol && base_max + a >= self.lo - tol;
        let zero = base_min <= self.hi + tol && base_max >= self.lo - tol;
        (one, zero)
    }
}

#[derive(Debug)]
struct Frame {
    mark: usize,
    var: usize,
    alternative: bool,
}

struct Search {
    rows: Vec<Row>,
    var_rows: Vec<Vec<(usize, f64)>>,
    cost: Vec<f64>,
    value: Vec<i8>,
    trail: Vec<usize>,
    queue: Vec<usize>,
    fixed_cost: f64,
    free_negative_cost: f64,
    incumbent: Option<(f64, Vec<bool>)>,
    explored: u64,
}

impl Search {
    fn new(program: &BinaryProgram) -> Self {
        let n = program.num_vars();
        let mut var_rows = vec![Vec::new(); n];
        let mut rows = Vec::with_capacity(program.constraints().len());

        for constraint in program.constraints() {
            let mut terms: Vec<(usize, f64)> = constraint
                .expr
                .terms()
                .iter()
                .map(|(var, coef)| (var.0, *coef))
                .collect();
            terms.sort_by_key(|(var, _)| *var);
            terms.dedup_by(|next, kept| {
                if next.0 == kept.0 {
                    kept.1 += next.1;
                    true
                } else {
                    false
                }
            });
            terms.retain(|(_, coef)| *coef != 0.0);

            let (lo, hi) = match constraint.cmp {
                Comparison::Eq => (constraint.rhs, constraint.rhs),
                Comparison::Le => (f64::NEG_INFINITY, constraint.rhs),
                Comparison::Ge => (constraint.rhs, f64::INFINITY),
            };

            let row_idx = rows.len();
            for &(var, coef) in &terms {
                var_rows[var].push((row_idx, coef));
            }
            rows.push(Row {
                lo,
                hi,
                is_eq: constraint.cmp == Comparison::Eq,
                max_pos: terms.iter().map(|(_, a)| a.max(0.0)).fold(0.0, f64::max),
                max_neg: terms.iter().map(|(_, a)| (-a).max(0.0)).fold(0.0, f64::max),
                min_act: terms.iter().map(|(_, a)| a.min(0.0)).sum(),
                max_act: terms.iter().map(|(_, a)| a.max(0.0)).sum(),
                terms,
                queued: false,
            });
        }

        let mut cost = vec![0.0; n];
        for (var, coef) in program.objective().terms() {
            cost[var.0] += coef;
        }
        let free_negative_cost = cost.iter().map(|c| c.min(0.0)).sum();

        Search {
            rows,
            var_rows,
            cost,
            value: vec![UNFIXED; n],
            trail: Vec::new(),
            queue: Vec::new(),
            fixed_cost: 0.0,
            free_negative_cost,
            incumbent: None,
            explored: 0,
        }
    }

    fn run(&mut self, deadline: Option<Instant>, check_interval: u64) -> SolveStatus {
        for row in 0..self.rows.len() {
            self.enqueue(row);
        }
        if !self.propagate() {
            return SolveStatus::Infeasible;
        }
        let root_bound = self.partition_bound();
        let n = self.value.len();
        let mut stack: Vec<Frame> = Vec::new();

        'search: loop {
            if self.explored % check_interval == 0
                && deadline.is_some_and(|deadline| Instant::now() >= deadline)
            {
                return SolveStatus::TimedOut;
            }
            self.explored += 1;

            let bound = self.fixed_cost + self.free_negative_cost;
            let pruned = matches!(
                &self.incumbent,
                Some((best, _)) if bound >= best - FEASIBILITY_TOLERANCE
            );

            if !pruned {
                let start = stack.last().map_or(0, |frame| frame.var);
                match (start..n).find(|&var| self.value[var] == UNFIXED) {
                    None => {
                        let objective = self.fixed_cost;
                        let values = self.value.iter().map(|&v| v == 1).collect();
                        self.incumbent = Some((objective, values));
                        if objective <= root_bound + FEASIBILITY_TOLERANCE {
                            return SolveStatus::Optimal;
                        }
                    }
                    Some(var) => {
                        stack.push(Frame {
                            mark: self.trail.len(),
                            var,
                            alternative: true,
                        });
                        self.assign(var, true);
                        if self.propagate() {
                            continue 'search;
                        }
                    }
                }
            }

            // Backtrack to the deepest frame with an untried branch
            loop {
                let Some(frame) = stack.last_mut() else {
                    return if self.incumbent.is_some() {
                        SolveStatus::Optimal
                    } else {
                        SolveStatus::Infeasible
                    };
                };
                let (mark, var) = (frame.mark, frame.var);
                let retry = frame.alternative;
                frame.alternative = false;
                self.undo_to(mark);

                if retry {
                    self.assign(var, false);
                    if self.propagate() {
                        continue 'search;
                    }
                } else {
                    stack.pop();
                }
            }
        }
    }

    fn enqueue(&mut self, row: usize) {
        if !self.rows[row].queued {
            self.rows[row].queued = true;
            self.queue.push(row);
        }
    }

    fn clear_queue(&mut self) {
        for row in self.queue.drain(..) {
            self.rows[row].queued = false;
        }
    }

    fn assign(&mut self, var: usize, one: bool) {
        let x = if one { 1.0 } else { 0.0 };
        self.value[var] = one as i8;
        self.trail.push(var);

        let c = self.cost[var];
        self.fixed_cost += c * x;
        self.free_negative_cost -= c.min(0.0);

        for &(row_idx, a) in &self.var_rows[var] {
            let row = &mut self.rows[row_idx];
            let dmin = a * x - a.min(0.0);
            let dmax = a * x - a.max(0.0);
            row.min_act += dmin;
            row.max_act += dmax;
            let relevant =
                (dmin != 0.0 && row.hi.is_finite()) || (dmax != 0.0 && row.lo.is_finite());
            if relevant && !row.queued {
                row.queued = true;
                self.queue.push(row_idx);
            }
        }
    }

    fn undo_to(&mut self, mark: usize) {
        self.clear_queue();
        while self.trail.len() > mark {
            let Some(var) = self.trail.pop() else { break };
            let x = if self.value[var] == 1 { 1.0 } else { 0.0 };

            let c = self.cost[var];
            self.fixed_cost -= c * x;
            self.free_negative_cost += c.min(0.0);

            for &(row_idx, a) in &self.var_rows[var] {
                let row = &mut self.rows[row_idx];
                row.min_act -= a * x - a.min(0.0);
                row.max_act -= a * x - a.max(0.0);
            }
            self.value[var] = UNFIXED;
        }
    }

    /// Drain the queue, fixing forced variables; false on conflict
    fn propagate(&mut self) -> bool {
        while let Some(row_idx) = self.queue.pop() {
            self.rows[row_idx].queued = false;
            if self.rows[row_idx].violated() {
                self.clear_queue();
                return false;
            }
            if !self.rows[row_idx].may_force() {
                continue;
            }

            for k in 0..self.rows[row_idx].terms.len() {
                let (var, a) = self.rows[row_idx].terms[k];
                if self.value[var] != UNFIXED {
                    continue;
                }
                match self.rows[row_idx].allowed(a) {
                    (true, true) => {}
                    (true, false) => self.assign(var, true),
                    (false, true) => self.assign(var, false),
                    (false, false) => {
                        self.clear_queue();
                        return false;
                    }
                }
            }
        }
        true
    }

    /// Lower bound on the objective at the current node
    ///
    /// Equality rows with positive coefficients and non-negative costs over
    /// disjoint free variables each force at least `ratio * remaining_rhs`.
    fn partition_bound(&self) -> f64 {
        let mut bound = self.fixed_cost + self.free_negative_cost;
        let mut covered = vec![false; self.value.len()];

        for row in self.rows.iter().filter(|row| row.is_eq) {
            let mut fixed_part = 0.0;
            let mut ratio = f64::INFINITY;
            let mut usable = true;
            let mut free_vars = 0;

            for &(var, a) in &row.terms {
                match self.value[var] {
                    UNFIXED => {
                        if covered[var] || a <= 0.0 || self.cost[var] < 0.0 {
                            usable = false;
                            break;
                        }
                        ratio = ratio.min(self.cost[var] / a);
                        free_vars += 1;
                    }
                    fixed => fixed_part += a * fixed as f64,
                }
            }

            let remaining = row.lo - fixed_part;
            if !usable || free_vars == 0 || remaining <= 0.0 {
                continue;
            }
            bound += ratio * remaining;
            for &(var, _) in &row.terms {
                if self.value[var] == UNFIXED {
                    covered[var] = true;
                }
            }
        }
        bound
    }
}
