use crate::analysis::cpa::ConfigurableProgramAnalysis;
use crate::analysis::state::AbstractState;
use crate::error::AnalysisError;
use itertools::Itertools;
use magpie_cfa::{Cfa, EdgeId};
use std::slice;
use std::sync::Arc;

/// Cartesian product of component analyses with edge-synchronized
/// transfer, component-wise stop, and merge-agree.
pub struct CompositeCpa {
    cfa: Arc<Cfa>,
    components: Vec<Box<dyn ConfigurableProgramAnalysis>>,
}

impl CompositeCpa {
    pub fn new(cfa: Arc<Cfa>, components: Vec<Box<dyn ConfigurableProgramAnalysis>>) -> Self {
        assert!(!components.is_empty(), "composite of zero analyses");
        Self { cfa, components }
    }

    fn unwrap_state<'a>(state: &'a AbstractState) -> &'a [AbstractState] {
        match state {
            AbstractState::Composite(components) => components,
            other => unreachable!("composite analysis given {other:?}"),
        }
    }
}

impl ConfigurableProgramAnalysis for CompositeCpa {
    fn initial_state(&self) -> AbstractState {
        AbstractState::Composite(self.components.iter().map(|c| c.initial_state()).collect())
    }

    fn successors_for_edge(
        &self,
        state: &AbstractState,
        edge: EdgeId,
    ) -> Result<Vec<AbstractState>, AnalysisError> {
        let components = Self::unwrap_state(state);
        let mut per_component: Vec<Vec<AbstractState>> = Vec::with_capacity(self.components.len());
        for (cpa, s) in self.components.iter().zip(components) {
            let successors = cpa.successors_for_edge(s, edge)?;
            // one dead component kills the whole product
            if successors.is_empty() {
                return Ok(vec![]);
            }
            per_component.push(successors);
        }
        Ok(per_component
            .into_iter()
            .multi_cartesian_product()
            .map(AbstractState::Composite)
            .collect())
    }

    fn successors(&self, state: &AbstractState) -> Result<Vec<AbstractState>, AnalysisError> {
        let node = state.location().ok_or(AnalysisError::MissingLocation)?;
        let mut result = Vec::new();
        for edge in self.cfa.leaving(node) {
            result.extend(self.successors_for_edge(state, edge)?);
        }
        Ok(result)
    }

    /// Merge-agree: merge each component pair; if any merged component
    /// fails to cover its unprocessed input, the whole merge is
    /// abandoned and `reached` kept unchanged.
    fn merge(
        &self,
        state: &AbstractState,
        reached: &AbstractState,
    ) -> Result<AbstractState, AnalysisError> {
        let new_components = Self::unwrap_state(state);
        let old_components = Self::unwrap_state(reached);
        let mut merged_components = Vec::with_capacity(self.components.len());
        for (cpa, (s, r)) in self
            .components
            .iter()
            .zip(new_components.iter().zip(old_components))
        {
            let merged = cpa.merge(s, r)?;
            if !cpa.stop(s, slice::from_ref(&merged))? {
                return Ok(reached.clone());
            }
            merged_components.push(merged);
        }
        if merged_components
            .iter()
            .zip(old_components)
            .all(|(m, r)| m == r)
        {
            return Ok(reached.clone());
        }
        Ok(AbstractState::Composite(merged_components))
    }

    fn stop(
        &self,
        state: &AbstractState,
        reached: &[AbstractState],
    ) -> Result<bool, AnalysisError> {
        let components = Self::unwrap_state(state);
        for candidate in reached {
            let reached_components = Self::unwrap_state(candidate);
            let mut covered = true;
            for (cpa, (s, r)) in self
                .components
                .iter()
                .zip(components.iter().zip(reached_components))
            {
                if !cpa.stop(s, slice::from_ref(r))? {
                    covered = false;
                    break;
                }
            }
            if covered {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn is_target(&self, state: &AbstractState) -> bool {
        let components = Self::unwrap_state(state);
        self.components
            .iter()
            .zip(components)
            .any(|(cpa, s)| cpa.is_target(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::location::LocationCpa;
    use crate::analysis::property::PropertyCpa;
    use crate::analysis::value::ValueCpa;
    use magpie_cfa::{BinOp, CfaBuilder, Expr};

    fn branchy() -> Arc<Cfa> {
        // n0 --[x=0]--> n1 --[x==0]--> err(reach_error)
        //                  --[not x==0]--> n2
        let mut b = CfaBuilder::new();
        let n0 = b.node();
        let n1 = b.node();
        let n2 = b.node();
        let n3 = b.node();
        let err = b.error_node();
        b.set_entry(n0);
        b.statement(n0, n1, "x", Expr::Const(0));
        let cond = Expr::binary(BinOp::Eq, Expr::var("x"), Expr::Const(0));
        b.assume(n1, n2, cond.clone());
        b.assume_not(n1, n3, cond);
        b.reach_error(n2, err);
        Arc::new(b.build().unwrap())
    }

    fn composite(cfa: &Arc<Cfa>) -> CompositeCpa {
        CompositeCpa::new(
            cfa.clone(),
            vec![
                Box::new(LocationCpa::new(cfa.clone())),
                Box::new(ValueCpa::new(cfa.clone())),
                Box::new(PropertyCpa::new(cfa.clone())),
            ],
        )
    }

    #[test]
    fn dead_components_kill_the_product() {
        let cfa = branchy();
        let cpa = composite(&cfa);
        let init = cpa.initial_state();
        // after x = 0 the else branch is infeasible for the value CPA
        let after_assign = cpa.successors(&init).unwrap();
        assert_eq!(after_assign.len(), 1);
        let at_branch = &after_assign[0];
        // only the then-branch survives
        let branched = cpa.successors(at_branch).unwrap();
        assert_eq!(branched.len(), 1);
    }

    #[test]
    fn composite_stop_is_componentwise() {
        let cfa = branchy();
        let cpa = composite(&cfa);
        let init = cpa.initial_state();
        assert!(cpa.stop(&init, slice::from_ref(&init)).unwrap());
        let successor = cpa.successors(&init).unwrap().remove(0);
        assert!(!cpa.stop(&successor, slice::from_ref(&init)).unwrap());
    }

    #[test]
    fn targets_surface_through_the_product() {
        let cfa = branchy();
        let cpa = composite(&cfa);
        let mut state = cpa.initial_state();
        for _ in 0..3 {
            assert!(!cpa.is_target(&state));
            state = cpa.successors(&state).unwrap().remove(0);
        }
        // now at the error location with the property flipped
        assert!(cpa.is_target(&state));
    }
}
