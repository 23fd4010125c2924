pub mod abe;

use crate::analysis::cpa::ConfigurableProgramAnalysis;
use crate::analysis::state::AbstractState;
use crate::error::AnalysisError;
use crate::smt::builder::{instruction_formula, seed_predicate};
use crate::smt::ssa::{SsaMap, atoms, instantiate};
use crate::smt::{SmtEnv, conjoin};
use magpie_cfa::{Cfa, EdgeId, Instruction, NodeId};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::rc::Rc;
use std::sync::Arc;
use tracing::debug;
use z3::ast::Bool;

/// An unindexed boolean predicate over program variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate(Bool);

impl Predicate {
    pub fn new(formula: Bool) -> Self {
        Self(formula)
    }

    pub fn formula(&self) -> &Bool {
        &self.0
    }
}

impl Display for Predicate {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A small set of predicates with value semantics. Sizes stay in the
/// tens, so membership is a linear scan; insertion order is kept for
/// deterministic rendering.
#[derive(Debug, Clone, Default)]
pub struct PredicateSet(Vec<Predicate>);

impl PredicateSet {
    pub fn insert(&mut self, predicate: Predicate) -> bool {
        if self.0.contains(&predicate) {
            false
        } else {
            self.0.push(predicate);
            true
        }
    }

    pub fn contains(&self, predicate: &Predicate) -> bool {
        self.0.contains(predicate)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Predicate> + '_ {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_subset(&self, other: &PredicateSet) -> bool {
        self.0.iter().all(|p| other.contains(p))
    }

    pub fn extend_from(&mut self, other: &PredicateSet) {
        for p in other.iter() {
            self.insert(p.clone());
        }
    }
}

impl PartialEq for PredicateSet {
    fn eq(&self, other: &Self) -> bool {
        self.is_subset(other) && other.is_subset(self)
    }
}

impl Display for PredicateSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{")?;
        for (i, p) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{p}")?;
        }
        write!(f, "}}")
    }
}

/// The refinable precision: a global seed set plus per-location
/// predicates. Refinement only ever adds.
#[derive(Debug, Clone, Default)]
pub struct PredicatePrecision {
    global: PredicateSet,
    local: BTreeMap<NodeId, PredicateSet>,
}

impl PredicatePrecision {
    /// Seed precision from the automaton: `true`, `false`, and the
    /// atoms of every edge's own constraint or assignment.
    pub fn from_cfa(cfa: &Cfa) -> Self {
        let mut global = PredicateSet::default();
        global.insert(Predicate::new(Bool::from_bool(true)));
        global.insert(Predicate::new(Bool::from_bool(false)));
        for edge in cfa.edge_ids() {
            if let Some(seed) = seed_predicate(cfa.edge(edge).instruction) {
                for atom in atoms(&seed) {
                    global.insert(Predicate::new(atom));
                }
            }
        }
        Self {
            global,
            local: BTreeMap::new(),
        }
    }

    /// Predicates available at `node`: the global seeds plus anything
    /// refinement attached to the location.
    pub fn at(&self, node: NodeId) -> PredicateSet {
        let mut set = self.global.clone();
        if let Some(local) = self.local.get(&node) {
            set.extend_from(local);
        }
        set
    }

    /// Attach a predicate to a location; returns whether it was new.
    pub fn add_local(&mut self, node: NodeId, predicate: Predicate) -> bool {
        if self.global.contains(&predicate) {
            return false;
        }
        self.local.entry(node).or_default().insert(predicate)
    }

    pub fn local_count(&self) -> usize {
        self.local.values().map(PredicateSet::len).sum()
    }

    /// Text rendering for the per-iteration precision artifact.
    pub fn render(&self) -> String {
        let mut out = format!("global: {}\n", self.global);
        for (node, set) in &self.local {
            out.push_str(&format!("@{}: {}\n", node.index(), set));
        }
        out
    }
}

/// Cartesian predicate abstraction: the successor keeps exactly the
/// precision predicates implied by the strongest postcondition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PredicateState {
    pub predicates: PredicateSet,
    pub ssa: SsaMap,
}

impl Display for PredicateState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.predicates)
    }
}

pub struct PredicateCpa {
    cfa: Arc<Cfa>,
    smt: Rc<SmtEnv>,
    precision: PredicatePrecision,
}

impl PredicateCpa {
    pub fn new(cfa: Arc<Cfa>, smt: Rc<SmtEnv>, precision: PredicatePrecision) -> Self {
        Self {
            cfa,
            smt,
            precision,
        }
    }

    fn unwrap_state(state: &AbstractState) -> &PredicateState {
        match state {
            AbstractState::Predicate(s) => s,
            other => unreachable!("predicate analysis given {other:?}"),
        }
    }

    /// `{ p ∈ candidates | antecedent ⇒ p@ssa }`. A solver `unknown`
    /// keeps the predicate out; dropping information is always sound
    /// here.
    fn implied_predicates(
        &self,
        antecedent: &Bool,
        candidates: &PredicateSet,
        ssa: &SsaMap,
    ) -> Result<PredicateSet, AnalysisError> {
        let mut implied = PredicateSet::default();
        for p in candidates.iter() {
            let candidate = instantiate(p.formula(), ssa);
            match self.smt.implies(antecedent, &candidate) {
                Ok(true) => {
                    implied.insert(p.clone());
                }
                Ok(false) => {}
                Err(AnalysisError::SolverUnknown) => {
                    debug!(predicate = %p, "solver unknown, predicate dropped");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(implied)
    }
}

impl ConfigurableProgramAnalysis for PredicateCpa {
    fn initial_state(&self) -> AbstractState {
        AbstractState::Predicate(PredicateState::default())
    }

    fn successors_for_edge(
        &self,
        state: &AbstractState,
        edge: EdgeId,
    ) -> Result<Vec<AbstractState>, AnalysisError> {
        let s = Self::unwrap_state(state);
        let view = self.cfa.edge(edge);

        // Predicates are unindexed, so each edge gets a fresh index
        // base: predecessor predicates are injected at index 0 and the
        // transition advances from there. Cumulative indices would make
        // loop states incomparable and the fixpoint unreachable.
        let mut ssa = SsaMap::new();
        let base = SsaMap::new();
        let trans = instruction_formula(view.instruction, &mut ssa);

        let mut terms: Vec<Bool> = s
            .predicates
            .iter()
            .map(|p| instantiate(p.formula(), &base))
            .collect();
        terms.push(trans);
        let phi = conjoin(&terms);

        if matches!(view.instruction, Instruction::Assumption { .. }) {
            match self.smt.is_sat(&phi) {
                Ok(false) => return Ok(vec![]),
                Ok(true) => {}
                // unknown: keep the successor, over-approximating
                Err(AnalysisError::SolverUnknown) => {}
                Err(e) => return Err(e),
            }
        }

        let candidates = self.precision.at(view.target);
        let predicates = self.implied_predicates(&phi, &candidates, &ssa)?;
        Ok(vec![AbstractState::Predicate(PredicateState {
            predicates,
            ssa,
        })])
    }

    fn merge(
        &self,
        _state: &AbstractState,
        reached: &AbstractState,
    ) -> Result<AbstractState, AnalysisError> {
        Ok(reached.clone())
    }

    fn stop(
        &self,
        state: &AbstractState,
        reached: &[AbstractState],
    ) -> Result<bool, AnalysisError> {
        let s = Self::unwrap_state(state);
        Ok(reached.iter().any(|r| {
            let r = Self::unwrap_state(r);
            r.predicates.is_subset(&s.predicates) && r.ssa == s.ssa
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use magpie_cfa::{BinOp, CfaBuilder, Expr};
    use z3::ast::Ast as _;

    fn setup() -> (Arc<Cfa>, Rc<SmtEnv>, EdgeId, EdgeId, NodeId) {
        // n0 --[x = 0]--> n1 --[x > 0]--> n2
        let mut b = CfaBuilder::new();
        let n0 = b.node();
        let n1 = b.node();
        let n2 = b.node();
        b.set_entry(n0);
        let assign = b.statement(n0, n1, "x", Expr::Const(0));
        let guard = b.assume(n1, n2, Expr::binary(BinOp::Gt, Expr::var("x"), Expr::Const(0)));
        (Arc::new(b.build().unwrap()), Rc::new(SmtEnv::new()), assign, guard, n1)
    }

    #[test]
    fn implied_seed_predicates_survive_the_transfer() {
        let (cfa, smt, assign, _, _) = setup();
        let precision = PredicatePrecision::from_cfa(&cfa);
        let cpa = PredicateCpa::new(cfa, smt, precision);
        let succ = cpa
            .successors_for_edge(&cpa.initial_state(), assign)
            .unwrap();
        let s = PredicateCpa::unwrap_state(&succ[0]);
        // x = 0 implies the seeded atom (x = 0) and not (x > 0)
        let texts: Vec<String> = s.predicates.iter().map(|p| p.to_string()).collect();
        assert!(texts.iter().any(|t| t.contains("x")), "{texts:?}");
        assert_eq!(s.ssa.index_of(magpie_cfa::VarName::new("x")), 1);
    }

    #[test]
    fn contradicted_assumptions_die() {
        let (cfa, smt, assign, guard, _) = setup();
        let precision = PredicatePrecision::from_cfa(&cfa);
        let cpa = PredicateCpa::new(cfa, smt, precision);
        let after_assign = cpa
            .successors_for_edge(&cpa.initial_state(), assign)
            .unwrap()
            .remove(0);
        // x = 0 contradicts the guard x > 0
        let dead = cpa.successors_for_edge(&after_assign, guard).unwrap();
        assert!(dead.is_empty());
    }

    #[test]
    fn stop_is_reverse_inclusion_with_matching_indices() {
        let (cfa, smt, _, _, _) = setup();
        let precision = PredicatePrecision::from_cfa(&cfa);
        let cpa = PredicateCpa::new(cfa.clone(), smt, precision);

        let weak = AbstractState::Predicate(PredicateState::default());
        let mut strong_set = PredicateSet::default();
        strong_set.insert(Predicate::new(Bool::from_bool(true)));
        let strong = AbstractState::Predicate(PredicateState {
            predicates: strong_set,
            ssa: SsaMap::new(),
        });

        // fewer predicates = weaker; the strong state is covered by weak
        assert!(cpa.stop(&strong, &[weak.clone()]).unwrap());
        assert!(!cpa.stop(&weak, &[strong]).unwrap());
        // reflexive
        assert!(cpa.stop(&weak, &[weak.clone()]).unwrap());
    }

    #[test]
    fn refinement_only_adds_predicates() {
        let (cfa, _, _, _, n1) = setup();
        let mut precision = PredicatePrecision::from_cfa(&cfa);
        let before = precision.at(n1).len();
        let p = Predicate::new(
            crate::smt::ssa::unindexed(magpie_cfa::VarName::new("y"))
                ._eq(&z3::ast::BV::from_i64(1, crate::smt::WORD_BITS)),
        );
        assert!(precision.add_local(n1, p.clone()));
        assert!(!precision.add_local(n1, p));
        assert_eq!(precision.at(n1).len(), before + 1);
    }
}
