use crate::analysis::state::AbstractState;
use crate::error::AnalysisError;
use magpie_cfa::EdgeId;

/**
A configurable program analysis: an abstract domain together with its
transfer relation, merge operator and stop operator, following the CPA
formulation in Chapter 16 of the Handbook of Model Checking.

The four operations live on one object because most of our analyses
close over shared context (the automaton, a precision, the solver).
Composition erases concrete analyses behind `Box<dyn ...>`; the state
space is the closed sum type [AbstractState].
*/
pub trait ConfigurableProgramAnalysis {
    fn initial_state(&self) -> AbstractState;

    /// Successors of `state` under one CFA edge. An empty result means
    /// the edge is infeasible from this state.
    fn successors_for_edge(
        &self,
        state: &AbstractState,
        edge: EdgeId,
    ) -> Result<Vec<AbstractState>, AnalysisError>;

    /// Successors of `state` under every relevant edge: the union over
    /// the leaving edges of the state's location. Only analyses that
    /// track a location (directly or wrapped) support this.
    fn successors(&self, state: &AbstractState) -> Result<Vec<AbstractState>, AnalysisError> {
        let _ = state;
        Err(AnalysisError::EdgeFreeTransfer)
    }

    /// Combine an unprocessed `state` with a `reached` state, returning
    /// the replacement for `reached`. Returning `reached` unchanged is
    /// merge-sep; a widened replacement is merge-join.
    fn merge(
        &self,
        state: &AbstractState,
        reached: &AbstractState,
    ) -> Result<AbstractState, AnalysisError>;

    /// Whether some state in `reached` covers `state`.
    fn stop(
        &self,
        state: &AbstractState,
        reached: &[AbstractState],
    ) -> Result<bool, AnalysisError>;

    /// Whether `state` violates the property under check.
    fn is_target(&self, state: &AbstractState) -> bool {
        let _ = state;
        false
    }
}
