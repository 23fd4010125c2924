use crate::analysis::cpa::ConfigurableProgramAnalysis;
use crate::analysis::state::AbstractState;
use crate::error::AnalysisError;
use magpie_cfa::{Cfa, EdgeId, Instruction};
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Tracks whether a `reach_error` edge has been taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyState {
    pub safe: bool,
}

impl Display for PropertyState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.safe {
            write!(f, "safe")
        } else {
            write!(f, "unsafe")
        }
    }
}

pub struct PropertyCpa {
    cfa: Arc<Cfa>,
}

impl PropertyCpa {
    pub fn new(cfa: Arc<Cfa>) -> Self {
        Self { cfa }
    }

    fn unwrap_state(state: &AbstractState) -> &PropertyState {
        match state {
            AbstractState::Property(s) => s,
            other => unreachable!("property analysis given {other:?}"),
        }
    }
}

impl ConfigurableProgramAnalysis for PropertyCpa {
    fn initial_state(&self) -> AbstractState {
        AbstractState::Property(PropertyState { safe: true })
    }

    fn successors_for_edge(
        &self,
        state: &AbstractState,
        edge: EdgeId,
    ) -> Result<Vec<AbstractState>, AnalysisError> {
        let s = Self::unwrap_state(state);
        let successor = match self.cfa.edge(edge).instruction {
            Instruction::ReachError => PropertyState { safe: false },
            _ => *s,
        };
        Ok(vec![AbstractState::Property(successor)])
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
        Ok(reached.iter().any(|r| Self::unwrap_state(r) == s))
    }

    fn is_target(&self, state: &AbstractState) -> bool {
        !Self::unwrap_state(state).safe
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use magpie_cfa::CfaBuilder;

    #[test]
    fn reach_error_flips_to_unsafe() {
        let mut b = CfaBuilder::new();
        let n0 = b.node();
        let err = b.error_node();
        let n1 = b.node();
        b.set_entry(n0);
        let bad = b.reach_error(n0, err);
        let fine = b.nop(n0, n1);
        let cfa = Arc::new(b.build().unwrap());

        let cpa = PropertyCpa::new(cfa);
        let init = cpa.initial_state();
        assert!(!cpa.is_target(&init));

        let hit = &cpa.successors_for_edge(&init, bad).unwrap()[0];
        assert!(cpa.is_target(hit));
        assert!(hit.property_violated());

        let missed = &cpa.successors_for_edge(&init, fine).unwrap()[0];
        assert!(!cpa.is_target(missed));
    }
}
