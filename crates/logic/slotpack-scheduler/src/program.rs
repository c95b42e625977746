//! Binary integer program model
//!
//! A solver-agnostic description of a 0/1 program: binary variables, sparse
//! linear constraints and a linear objective to minimize.

use slotpack_core::{Result, SlotpackError};

/// Handle to a binary decision variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Var(pub usize);

/// Constraint sense
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    /// `expr == rhs`
    Eq,
    /// `expr <= rhs`
    Le,
    /// `expr >= rhs`
    Ge,
}

/// Sparse linear expression `Σ coef · var`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinearExpr {
    terms: Vec<(Var, f64)>,
}

impl LinearExpr {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_term(mut self, var: Var, coef: f64) -> Self {
        self.terms.push((var, coef));
        self
    }

    pub fn terms(&self) -> &[(Var, f64)] {
        &self.terms
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Value of the expression under a full assignment
    pub fn evaluate(&self, values: &[bool]) -> f64 {
        self.terms
            .iter()
            .filter(|(var, _)| values[var.0])
            .map(|(_, coef)| coef)
            .sum()
    }
}

impl FromIterator<(Var, f64)> for LinearExpr {
    fn from_iter<I: IntoIterator<Item = (Var, f64)>>(iter: I) -> Self {
        LinearExpr {
            terms: iter.into_iter().collect(),
        }
    }
}

/// `expr <cmp> rhs`
#[derive(Debug, Clone, PartialEq)]
pub struct Constraint {
    pub expr: LinearExpr,
    pub cmp: Comparison,
    pub rhs: f64,
}

impl Constraint {
    pub fn is_satisfied(&self, values: &[bool], tolerance: f64) -> bool {
        let lhs = self.expr.evaluate(values);
        match self.cmp {
            Comparison::Eq => (lhs - self.rhs).abs() <= tolerance,
            Comparison::Le => lhs <= self.rhs + tolerance,
            Comparison::Ge => lhs >= self.rhs - tolerance,
        }
    }
}

/// A minimization program over binary variables
#[derive(Debug, Clone, Default)]
pub struct BinaryProgram {
    name: String,
    num_vars: usize,
    constraints: Vec<Constraint>,
    objective: LinearExpr,
}

impl BinaryProgram {
    pub fn new(name: impl Into<String>) -> Self {
        BinaryProgram {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_var(&mut self) -> Var {
        let var = Var(self.num_vars);
        self.num_vars += 1;
        var
    }

    pub fn num_vars(&self) -> usize {
        self.num_vars
    }

    pub fn add_constraint(&mut self, expr: LinearExpr, cmp: Comparison, rhs: f64) {
        self.constraints.push(Constraint { expr, cmp, rhs });
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    /// Replace the objective (always minimized)
    pub fn minimize(&mut self, objective: LinearExpr) {
        self.objective = objective;
    }

    pub fn objective(&self) -> &LinearExpr {
        &self.objective
    }

    /// Reject out-of-range variables and non-finite numbers
    pub fn validate(&self) -> Result<()> {
        let check_expr = |expr: &LinearExpr, what: &str| -> Result<()> {
            for (var, coef) in expr.terms() {
                if var.0 >= self.num_vars {
                    return Err(SlotpackError::solver(format!(
                        "{}: variable x{} out of range ({} variables)",
                        what, var.0, self.num_vars
                    )));
                }
                if !coef.is_finite() {
                    return Err(SlotpackError::solver(format!(
                        "{}: non-finite coefficient {} on x{}",
                        what, coef, var.0
                    )));
                }
            }
            Ok(())
        };

        check_expr(&self.objective, "objective")?;
        for (idx, constraint) in self.constraints.iter().enumerate() {
            check_expr(&constraint.expr, &format!("constraint {}", idx))?;
            if !constraint.rhs.is_finite() {
                return Err(SlotpackError::solver(format!(
                    "constraint {}: non-finite right-hand side {}",
                    idx, constraint.rhs
                )));
            }
        }
        Ok(())
    }

    /// Whether a full assignment satisfies every constraint
    pub fn is_feasible(&self, values: &[bool], tolerance: f64) -> bool {
        values.len() == self.num_vars
            && self
                .constraints
                .iter()
                .all(|c| c.is_satisfied(values, tolerance))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_and_evaluate() {
        let mut program = BinaryProgram::new("knapsack");
        let x = program.add_var();
        let y = program.add_var();
        program.add_constraint(
            LinearExpr::new().with_term(x, 3.0).with_term(y, 2.0),
            Comparison::Le,
            4.0,
        );
        program.minimize([(x, -1.0), (y, -1.0)].into_iter().collect());

        assert_eq!(program.num_vars(), 2);
        assert!(program.validate().is_ok());
        assert!(program.is_feasible(&[true, false], 1e-9));
        assert!(!program.is_feasible(&[true, true], 1e-9));
        assert_eq!(program.objective().evaluate(&[true, true]), -2.0);
    }

    #[test]
    fn test_validate_rejects_unknown_var() {
        let mut program = BinaryProgram::new("bad");
        program.add_var();
        program.add_constraint(LinearExpr::new().with_term(Var(3), 1.0), Comparison::Eq, 1.0);
        assert!(matches!(program.validate(), Err(SlotpackError::Solver(_))));
    }

    #[test]
    fn test_validate_rejects_nan() {
        let mut program = BinaryProgram::new("bad");
        let x = program.add_var();
        program.add_constraint(LinearExpr::new().with_term(x, f64::NAN), Comparison::Le, 1.0);
        assert!(program.validate().is_err());

        let mut program = BinaryProgram::new("bad-rhs");
        let x = program.add_var();
        program.add_constraint(LinearExpr::new().with_term(x, 1.0), Comparison::Ge, f64::INFINITY);
        assert!(program.validate().is_err());
    }
}
