use crate::analysis::cpa::ConfigurableProgramAnalysis;
use crate::analysis::state::AbstractState;
use crate::error::AnalysisError;
use magpie_cfa::{Cfa, EdgeId, Instruction, NodeId};
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Tracks the current CFA location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocationState {
    pub node: NodeId,
}

impl Display for LocationState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "@{}", self.node.index())
    }
}

pub struct LocationCpa {
    cfa: Arc<Cfa>,
}

impl LocationCpa {
    pub fn new(cfa: Arc<Cfa>) -> Self {
        Self { cfa }
    }

    fn unwrap_state(state: &AbstractState) -> &LocationState {
        match state {
            AbstractState::Location(s) => s,
            other => unreachable!("location analysis given {other:?}"),
        }
    }
}

impl ConfigurableProgramAnalysis for LocationCpa {
    fn initial_state(&self) -> AbstractState {
        AbstractState::Location(LocationState {
            node: self.cfa.entry(),
        })
    }

    fn successors_for_edge(
        &self,
        state: &AbstractState,
        edge: EdgeId,
    ) -> Result<Vec<AbstractState>, AnalysisError> {
        let _ = Self::unwrap_state(state);
        let view = self.cfa.edge(edge);
        // Calls jump straight to the callee entry; control reaches the
        // post-call node only when the stack analysis processes the
        // matching return.
        let node = match view.instruction {
            Instruction::Call { entry, .. } => *entry,
            _ => view.target,
        };
        Ok(vec![AbstractState::Location(LocationState { node })])
    }

    fn successors(&self, state: &AbstractState) -> Result<Vec<AbstractState>, AnalysisError> {
        let node = Self::unwrap_state(state).node;
        let mut result = Vec::new();
        for edge in self.cfa.leaving(node) {
            result.extend(self.successors_for_edge(state, edge)?);
        }
        Ok(result)
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
        self.cfa.is_error(Self::unwrap_state(state).node)
    }
}
