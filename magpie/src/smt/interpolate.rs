//! Sequence interpolation for refinement.
//!
//! The refiner needs, for an UNSAT conjunction `A₀ ∧ … ∧ Aₙ₋₁`, a list
//! `I₁..Iₙ₋₁` with `A₀..Aᵢ₋₁ ⇒ Iᵢ` and `Iᵢ ∧ Aᵢ..Aₙ₋₁` UNSAT, over the
//! symbols shared between prefix and suffix.

use crate::error::AnalysisError;
use crate::smt::ssa::collect_symbols;
use crate::smt::{SmtEnv, WORD_BITS, conjoin};
use std::collections::BTreeSet;
use std::rc::Rc;
use tracing::debug;
use z3::ast::{Ast, BV, Bool, exists_const};
use z3::{AstKind, Goal, Tactic};

/// The two solver capabilities the refinement loop depends on.
/// `seq_interp` may return `None` when interpolation is unsupported or
/// the underlying tactic gives up; the driver then degrades to UNKNOWN.
pub trait InterpolationProvider {
    fn sat(&self, formula: &Bool) -> Result<bool, AnalysisError>;

    fn seq_interp(&self, conjuncts: &[Bool]) -> Result<Option<Vec<Bool>>, AnalysisError>;
}

/// Interpolation by projection: the i-th interpolant is the strongest
/// postcondition of the prefix, restricted to the symbols shared with
/// the suffix. Prefix-local symbols are existentially quantified away
/// and eliminated with z3's `qe` tactic.
///
/// Both interpolant obligations hold by construction: the prefix
/// entails its own projection, and a model of projection-plus-suffix
/// would extend to a model of the whole (UNSAT) sequence because the
/// eliminated symbols do not occur in the suffix.
pub struct QeInterpolator {
    env: Rc<SmtEnv>,
}

impl QeInterpolator {
    pub fn new(env: Rc<SmtEnv>) -> Self {
        Self { env }
    }
}

impl InterpolationProvider for QeInterpolator {
    fn sat(&self, formula: &Bool) -> Result<bool, AnalysisError> {
        self.env.is_sat(formula)
    }

    fn seq_interp(&self, conjuncts: &[Bool]) -> Result<Option<Vec<Bool>>, AnalysisError> {
        if conjuncts.len() < 2 {
            return Ok(Some(Vec::new()));
        }
        let symbol_sets: Vec<BTreeSet<String>> = conjuncts.iter().map(collect_symbols).collect();

        let mut interpolants = Vec::with_capacity(conjuncts.len() - 1);
        for cut in 1..conjuncts.len() {
            let prefix_symbols: BTreeSet<String> =
                symbol_sets[..cut].iter().flatten().cloned().collect();
            let suffix_symbols: BTreeSet<String> =
                symbol_sets[cut..].iter().flatten().cloned().collect();
            let local: Vec<BV> = prefix_symbols
                .difference(&suffix_symbols)
                .map(|name| BV::new_const(name.as_str(), WORD_BITS))
                .collect();

            let prefix = conjoin(&conjuncts[..cut]);
            let projected = if local.is_empty() {
                prefix.simplify()
            } else {
                match project(&prefix, &local) {
                    Some(f) => f,
                    None => {
                        debug!(cut, "quantifier elimination gave up");
                        return Ok(None);
                    }
                }
            };
            interpolants.push(projected);
        }
        Ok(Some(interpolants))
    }
}

/// Eliminate the given constants from `body` by existential projection.
/// `qe` handles the common defining-equation shapes; `qe2` covers the
/// remaining bitvector cases. Returns `None` when a quantifier survives
/// both.
fn project(body: &Bool, bound: &[BV]) -> Option<Bool> {
    let bounds: Vec<&dyn Ast> = bound.iter().map(|b| b as &dyn Ast).collect();
    let quantified = exists_const(&bounds, &[], body);

    for tactic_name in ["qe", "qe2"] {
        if let Some(eliminated) = apply_elimination(tactic_name, &quantified) {
            if !has_quantifier(&eliminated) {
                return Some(eliminated);
            }
        }
    }
    None
}

fn apply_elimination(tactic_name: &str, quantified: &Bool) -> Option<Bool> {
    let goal = Goal::new(false, false, false);
    goal.assert(quantified);
    let tactic = Tactic::new(tactic_name).and_then(&Tactic::new("simplify"));
    let result = tactic.apply(&goal, None).ok()?;

    let mut formulas: Vec<Bool> = Vec::new();
    for subgoal in result.list_subgoals() {
        formulas.extend(subgoal.get_formulas::<Bool>());
    }
    Some(conjoin(&formulas).simplify())
}

fn has_quantifier(formula: &Bool) -> bool {
    let mut worklist: Vec<z3::ast::Dynamic> = vec![z3::ast::Dynamic::from_ast(formula)];
    while let Some(term) = worklist.pop() {
        match term.kind() {
            AstKind::Quantifier => return true,
            AstKind::App => worklist.extend(term.children()),
            _ => {}
        }
    }
    false
}
