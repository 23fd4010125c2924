use crate::analysis::cpa::ConfigurableProgramAnalysis;
use crate::analysis::state::AbstractState;
use crate::error::AnalysisError;
use magpie_cfa::{Cfa, EdgeId, Instruction};
use std::fmt::{Display, Formatter};
use std::slice;
use std::sync::Arc;

/// Call-stack wrapper state: the wrapped frames plus the call edges
/// taken to get here. The active frame is the last one.
#[derive(Debug, Clone, PartialEq)]
pub struct StackState {
    pub frames: Vec<AbstractState>,
    pub call_edges: Vec<EdgeId>,
}

impl StackState {
    pub fn top(&self) -> &AbstractState {
        self.frames.last().expect("stack state with no frame")
    }

    fn replace_top(&self, frame: AbstractState) -> StackState {
        let mut frames = self.frames.clone();
        *frames.last_mut().expect("stack state with no frame") = frame;
        StackState {
            frames,
            call_edges: self.call_edges.clone(),
        }
    }
}

impl Display for StackState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.top())
    }
}

/// Models inter-procedural control: a call runs the wrapped transfer
/// (sending the location to the callee entry) and records the call
/// edge; the matching return redirects the location to the recorded
/// edge's successor. A return with an empty call stack is program exit.
pub struct StackCpa {
    cfa: Arc<Cfa>,
    inner: Box<dyn ConfigurableProgramAnalysis>,
}

impl StackCpa {
    pub fn new(cfa: Arc<Cfa>, inner: Box<dyn ConfigurableProgramAnalysis>) -> Self {
        Self { cfa, inner }
    }

    fn unwrap_state(state: &AbstractState) -> &StackState {
        match state {
            AbstractState::Stack(s) => s,
            other => unreachable!("stack analysis given {other:?}"),
        }
    }
}

impl ConfigurableProgramAnalysis for StackCpa {
    fn initial_state(&self) -> AbstractState {
        AbstractState::Stack(StackState {
            frames: vec![self.inner.initial_state()],
            call_edges: vec![],
        })
    }

    fn successors_for_edge(
        &self,
        state: &AbstractState,
        edge: EdgeId,
    ) -> Result<Vec<AbstractState>, AnalysisError> {
        let s = Self::unwrap_state(state);
        let instruction = self.cfa.edge(edge).instruction;
        let wrapped = self.inner.successors_for_edge(s.top(), edge)?;

        let successors = match instruction {
            Instruction::Call { .. } => wrapped
                .into_iter()
                .map(|frame| {
                    let mut next = s.replace_top(frame);
                    next.call_edges.push(edge);
                    AbstractState::Stack(next)
                })
                .collect(),
            Instruction::Return { .. } => {
                let Some(call_edge) = s.call_edges.last() else {
                    // no caller to return to: the program exits
                    return Ok(vec![]);
                };
                let resume_node = self.cfa.edge(*call_edge).target;
                wrapped
                    .into_iter()
                    .map(|frame| {
                        let mut next = s.replace_top(frame.with_location(resume_node));
                        next.call_edges.pop();
                        AbstractState::Stack(next)
                    })
                    .collect()
            }
            _ => wrapped
                .into_iter()
                .map(|frame| AbstractState::Stack(s.replace_top(frame)))
                .collect(),
        };
        Ok(successors)
    }

    fn successors(&self, state: &AbstractState) -> Result<Vec<AbstractState>, AnalysisError> {
        let node = state.location().ok_or(AnalysisError::MissingLocation)?;
        let mut result = Vec::new();
        for edge in self.cfa.leaving(node) {
            result.extend(self.successors_for_edge(state, edge)?);
        }
        Ok(result)
    }

    fn merge(
        &self,
        state: &AbstractState,
        reached: &AbstractState,
    ) -> Result<AbstractState, AnalysisError> {
        let s = Self::unwrap_state(state);
        let r = Self::unwrap_state(reached);
        // merge only within the same calling context
        if s.call_edges != r.call_edges
            || s.frames.len() != r.frames.len()
            || s.frames[..s.frames.len() - 1] != r.frames[..r.frames.len() - 1]
        {
            return Ok(reached.clone());
        }
        let merged_top = self.inner.merge(s.top(), r.top())?;
        if &merged_top == r.top() {
            return Ok(reached.clone());
        }
        Ok(AbstractState::Stack(r.replace_top(merged_top)))
    }

    fn stop(
        &self,
        state: &AbstractState,
        reached: &[AbstractState],
    ) -> Result<bool, AnalysisError> {
        let s = Self::unwrap_state(state);
        for candidate in reached {
            let r = Self::unwrap_state(candidate);
            if s.call_edges != r.call_edges || s.frames.len() != r.frames.len() {
                continue;
            }
            let mut covered = true;
            for (sf, rf) in s.frames.iter().zip(&r.frames) {
                if !self.inner.stop(sf, slice::from_ref(rf))? {
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
        self.inner.is_target(Self::unwrap_state(state).top())
    }
}
