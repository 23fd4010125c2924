//! Adjustable block encoding: the predicate CPA variant that carries an
//! exact path formula between designated block heads and abstracts only
//! when crossing one.

use crate::analysis::cpa::ConfigurableProgramAnalysis;
use crate::analysis::predicate::{PredicatePrecision, PredicateSet};
use crate::analysis::state::AbstractState;
use crate::error::AnalysisError;
use crate::smt::builder::instruction_formula;
use crate::smt::ssa::{SsaMap, instantiate, pad};
use crate::smt::{SmtEnv, conjoin};
use magpie_cfa::{Cfa, EdgeId, Instruction, InstructionKind, NodeId};
use std::cell::Cell;
use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};
use std::rc::Rc;
use std::sync::Arc;
use tracing::debug;
use z3::ast::{Ast, Bool};

/// Which CFA nodes are abstraction points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockStrategy {
    /// No abstraction at all: pure path-formula analysis.
    Never,
    /// Nodes with a leaving call edge.
    CallsOnly,
    /// Nodes with a leaving assumption or call edge.
    BranchesAndCalls,
    /// Loop heads plus nodes with a leaving call edge.
    LoopHeadsAndCalls,
}

impl BlockStrategy {
    pub fn block_heads(&self, cfa: &Cfa) -> BTreeSet<NodeId> {
        let calls = |cfa: &Cfa| {
            cfa.node_ids()
                .filter(|n| cfa.leaves_with_kind(*n, &[InstructionKind::Call]))
                .collect::<BTreeSet<_>>()
        };
        match self {
            BlockStrategy::Never => BTreeSet::new(),
            BlockStrategy::CallsOnly => calls(cfa),
            BlockStrategy::BranchesAndCalls => cfa
                .node_ids()
                .filter(|n| {
                    cfa.leaves_with_kind(
                        *n,
                        &[InstructionKind::Assumption, InstructionKind::Call],
                    )
                })
                .collect(),
            BlockStrategy::LoopHeadsAndCalls => {
                let mut heads = cfa.loop_heads();
                heads.extend(calls(cfa));
                heads
            }
        }
    }
}

/// Predicate state with a delayed-abstraction path formula.
///
/// `predicates` holds the abstraction computed at `abstraction_location`
/// (unindexed; they speak about SSA index 0 of the current block), and
/// `path_formula` the exact transition formula accumulated since, with
/// `ssa` tracking its indices.
#[derive(Debug, Clone, PartialEq)]
pub struct AbeState {
    pub predicates: PredicateSet,
    pub abstraction_location: Option<NodeId>,
    pub path_formula: Bool,
    pub ssa: SsaMap,
}

impl AbeState {
    fn initial() -> Self {
        Self {
            predicates: PredicateSet::default(),
            abstraction_location: None,
            path_formula: Bool::from_bool(true),
            ssa: SsaMap::new(),
        }
    }

    /// The full meaning of this state: abstraction predicates pinned to
    /// the block-entry indices, conjoined with the path formula.
    pub fn instantiated(&self) -> Bool {
        let base = SsaMap::new();
        let mut terms: Vec<Bool> = self
            .predicates
            .iter()
            .map(|p| instantiate(p.formula(), &base))
            .collect();
        terms.push(self.path_formula.clone());
        conjoin(&terms)
    }
}

impl Display for AbeState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} | {}", self.predicates, self.path_formula)
    }
}

pub struct AbePredicateCpa {
    cfa: Arc<Cfa>,
    smt: Rc<SmtEnv>,
    precision: PredicatePrecision,
    block_heads: BTreeSet<NodeId>,
    pruned_assumptions: Cell<u64>,
}

impl AbePredicateCpa {
    pub fn new(
        cfa: Arc<Cfa>,
        smt: Rc<SmtEnv>,
        precision: PredicatePrecision,
        strategy: BlockStrategy,
    ) -> Self {
        let block_heads = strategy.block_heads(&cfa);
        debug!(?block_heads, "abstraction block heads");
        Self {
            cfa,
            smt,
            precision,
            block_heads,
            pruned_assumptions: Cell::new(0),
        }
    }

    /// How many assumption successors this run discarded as UNSAT.
    pub fn pruned_assumptions(&self) -> u64 {
        self.pruned_assumptions.get()
    }

    fn unwrap_state(state: &AbstractState) -> &AbeState {
        match state {
            AbstractState::PredicateAbe(s) => s,
            other => unreachable!("ABE predicate analysis given {other:?}"),
        }
    }

    /// `self ⇒ other` on padded instantiations; `unknown` counts as
    /// not-covered.
    fn entails(&self, covered: &AbeState, covering: &AbeState) -> Result<bool, AnalysisError> {
        let lhs = pad(&covered.instantiated(), &covered.ssa, &covering.ssa);
        let rhs = pad(&covering.instantiated(), &covering.ssa, &covered.ssa);
        match self.smt.implies(&lhs, &rhs) {
            Ok(holds) => Ok(holds),
            Err(AnalysisError::SolverUnknown) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

impl ConfigurableProgramAnalysis for AbePredicateCpa {
    fn initial_state(&self) -> AbstractState {
        AbstractState::PredicateAbe(AbeState::initial())
    }

    fn successors_for_edge(
        &self,
        state: &AbstractState,
        edge: EdgeId,
    ) -> Result<Vec<AbstractState>, AnalysisError> {
        let s = Self::unwrap_state(state);
        let view = self.cfa.edge(edge);

        let mut ssa = s.ssa.clone();
        let trans = instruction_formula(view.instruction, &mut ssa);

        if matches!(view.instruction, Instruction::Assumption { .. }) {
            let extended = conjoin(&[s.instantiated(), trans.clone()]);
            match self.smt.is_sat(&extended) {
                Ok(false) => {
                    self.pruned_assumptions.set(self.pruned_assumptions.get() + 1);
                    debug!(
                        pruned = self.pruned_assumptions.get(),
                        edge = %view.instruction,
                        "assumption successor pruned as unsatisfiable"
                    );
                    return Ok(vec![]);
                }
                Ok(true) => {}
                Err(AnalysisError::SolverUnknown) => {}
                Err(e) => return Err(e),
            }
        }

        let successor = if self.block_heads.contains(&view.source) {
            // Abstraction point: fold the block's path formula into
            // fresh predicates and restart the block.
            let antecedent = conjoin(&[s.instantiated(), trans]);
            let mut implied = PredicateSet::default();
            for p in self.precision.at(view.target).iter() {
                let candidate = instantiate(p.formula(), &ssa);
                match self.smt.implies(&antecedent, &candidate) {
                    Ok(true) => {
                        // precision predicates are stored unindexed, so
                        // the implied predicate is storable as-is
                        implied.insert(p.clone());
                    }
                    Ok(false) => {}
                    Err(AnalysisError::SolverUnknown) => {}
                    Err(e) => return Err(e),
                }
            }
            AbeState {
                predicates: implied,
                abstraction_location: Some(view.source),
                path_formula: Bool::from_bool(true),
                ssa: SsaMap::new(),
            }
        } else {
            AbeState {
                predicates: s.predicates.clone(),
                abstraction_location: s.abstraction_location,
                // simplify keeps the accumulated formula small and
                // makes no-op edges literal no-ops
                path_formula: Bool::and(&[s.path_formula.clone(), trans]).simplify(),
                ssa,
            }
        };
        Ok(vec![AbstractState::PredicateAbe(successor)])
    }

    fn merge(
        &self,
        state: &AbstractState,
        reached: &AbstractState,
    ) -> Result<AbstractState, AnalysisError> {
        let s = Self::unwrap_state(state);
        let r = Self::unwrap_state(reached);
        // Join only at a common abstraction with identical predicates;
        // everything else keeps states separate.
        if s.abstraction_location != r.abstraction_location || s.predicates != r.predicates {
            return Ok(reached.clone());
        }
        if s.path_formula == r.path_formula && s.ssa == r.ssa {
            return Ok(reached.clone());
        }
        let s_path = pad(&s.path_formula, &s.ssa, &r.ssa);
        let r_path = pad(&r.path_formula, &r.ssa, &s.ssa);
        Ok(AbstractState::PredicateAbe(AbeState {
            predicates: r.predicates.clone(),
            abstraction_location: r.abstraction_location,
            path_formula: Bool::or(&[s_path, r_path]),
            ssa: s.ssa.join_max(&r.ssa),
        }))
    }

    fn stop(
        &self,
        state: &AbstractState,
        reached: &[AbstractState],
    ) -> Result<bool, AnalysisError> {
        let s = Self::unwrap_state(state);
        for r in reached {
            if self.entails(s, Self::unwrap_state(r))? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
