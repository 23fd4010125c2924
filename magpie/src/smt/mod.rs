pub mod builder;
pub mod interpolate;
pub mod ssa;

use crate::error::AnalysisError;
use tracing::trace;
use z3::ast::Bool;
use z3::{Model, SatResult, Solver};

/// Width of every program variable in formulas.
pub const WORD_BITS: u32 = 64;

/// The single SMT environment of an analysis run.
///
/// One solver instance serves every implication and feasibility check of
/// a run; the driver shares it via `Rc` since the analysis is
/// single-threaded. Each query is scoped with push/pop so no assertions
/// leak between checks.
#[derive(Debug)]
pub struct SmtEnv {
    solver: Solver,
}

impl Default for SmtEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl SmtEnv {
    pub fn new() -> Self {
        Self {
            solver: Solver::new(),
        }
    }

    /// Satisfiability of `formula`. Solver `unknown` is surfaced as an
    /// error so callers decide how to degrade, never silently.
    pub fn is_sat(&self, formula: &Bool) -> Result<bool, AnalysisError> {
        self.solver.push();
        self.solver.assert(formula);
        let result = self.solver.check();
        self.solver.pop(1);
        trace!(?result, "sat check");
        match result {
            SatResult::Sat => Ok(true),
            SatResult::Unsat => Ok(false),
            SatResult::Unknown => Err(AnalysisError::SolverUnknown),
        }
    }

    /// Does `antecedent` entail `consequent`? Checked as UNSAT of
    /// `antecedent ∧ ¬consequent`.
    pub fn implies(&self, antecedent: &Bool, consequent: &Bool) -> Result<bool, AnalysisError> {
        let query = Bool::and(&[antecedent.clone(), consequent.not()]);
        Ok(!self.is_sat(&query)?)
    }

    /// A model of `formula`, if satisfiable.
    pub fn model(&self, formula: &Bool) -> Option<Model> {
        self.solver.push();
        self.solver.assert(formula);
        let model = match self.solver.check() {
            SatResult::Sat => self.solver.get_model(),
            _ => None,
        };
        self.solver.pop(1);
        model
    }
}

/// Conjunction helper: `true` for the empty set.
pub fn conjoin(terms: &[Bool]) -> Bool {
    match terms.len() {
        0 => Bool::from_bool(true),
        1 => terms[0].clone(),
        _ => Bool::and(terms),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use z3::ast::{Ast as _, BV};

    #[test]
    fn sat_and_implication_checks() {
        let env = SmtEnv::new();
        let x = BV::new_const("x", WORD_BITS);
        let five = BV::from_i64(5, WORD_BITS);
        let gt = x.bvsgt(&five);
        let ge = x.bvsge(&five);
        assert!(env.is_sat(&gt).unwrap());
        assert!(env.implies(&gt, &ge).unwrap());
        assert!(!env.implies(&ge, &gt).unwrap());
    }

    #[test]
    fn queries_do_not_leak_assertions() {
        let env = SmtEnv::new();
        let x = BV::new_const("x", WORD_BITS);
        let zero = BV::from_i64(0, WORD_BITS);
        assert!(env.is_sat(&x._eq(&zero)).unwrap());
        // A contradicting query afterwards must still see a clean solver.
        assert!(env.is_sat(&x._eq(&zero).not()).unwrap());
    }

    #[test]
    fn empty_conjunction_is_true() {
        assert_eq!(conjoin(&[]).as_bool(), Some(true));
    }
}
