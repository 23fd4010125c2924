use crate::analysis::cpa::ConfigurableProgramAnalysis;
use crate::analysis::state::AbstractState;
use crate::error::AnalysisError;
use crate::verdict::Status;
use std::collections::VecDeque;
use tracing::{debug, trace};

/// Result of one work-list run.
#[derive(Debug)]
pub struct RunOutcome {
    pub status: Status,
    /// The target state that ended the run, for counterexample
    /// extraction.
    pub error_state: Option<AbstractState>,
    pub iterations: usize,
    pub reached_count: usize,
}

/// The CPA work-list algorithm: explore successors until the waitlist
/// drains (fixpoint), a target state surfaces, or the iteration budget
/// runs out.
pub struct CpaAlgorithm<'a> {
    cpa: &'a dyn ConfigurableProgramAnalysis,
    max_iterations: Option<usize>,
}

impl<'a> CpaAlgorithm<'a> {
    pub fn new(cpa: &'a dyn ConfigurableProgramAnalysis, max_iterations: Option<usize>) -> Self {
        Self {
            cpa,
            max_iterations,
        }
    }

    pub fn run(&self) -> Result<RunOutcome, AnalysisError> {
        let initial = self.cpa.initial_state();
        let mut reached: Vec<AbstractState> = vec![initial.clone()];
        let mut waitlist: VecDeque<AbstractState> = VecDeque::from([initial]);
        let mut iterations = 0usize;

        while let Some(state) = waitlist.pop_front() {
            if self.cpa.is_target(&state) {
                debug!(iterations, "target state popped");
                return Ok(RunOutcome {
                    status: Status::Error,
                    error_state: Some(state),
                    iterations,
                    reached_count: reached.len(),
                });
            }

            iterations += 1;
            if let Some(budget) = self.max_iterations {
                if iterations >= budget {
                    debug!(budget, "iteration budget exhausted");
                    return Ok(RunOutcome {
                        status: Status::Timeout,
                        error_state: None,
                        iterations,
                        reached_count: reached.len(),
                    });
                }
            }

            let mut new_states = 0usize;
            let mut merged_states = 0usize;
            let mut stopped_states = 0usize;

            for successor in self.cpa.successors(&state)? {
                trace!(%successor, "transfer produced successor");
                if self.cpa.is_target(&successor) {
                    debug!(iterations, "target state reached");
                    return Ok(RunOutcome {
                        status: Status::Error,
                        error_state: Some(successor),
                        iterations,
                        reached_count: reached.len(),
                    });
                }

                // Merge the candidate into every reached state it can
                // strengthen; replaced states re-enter the waitlist.
                for idx in 0..reached.len() {
                    let merged = self.cpa.merge(&successor, &reached[idx])?;
                    if merged != reached[idx] {
                        let replaced = std::mem::replace(&mut reached[idx], merged.clone());
                        waitlist.retain(|w| *w != replaced);
                        waitlist.push_back(merged);
                        merged_states += 1;
                    }
                }

                if self.cpa.stop(&successor, &reached)? {
                    stopped_states += 1;
                } else {
                    reached.push(successor.clone());
                    waitlist.push_back(successor);
                    new_states += 1;
                }
            }

            if new_states > 0 || merged_states > 0 || stopped_states > 0 {
                debug!(
                    iteration = iterations,
                    new = new_states,
                    merged = merged_states,
                    stopped = stopped_states,
                    waitlist = waitlist.len(),
                    reached = reached.len(),
                    "iteration summary"
                );
            }
        }

        debug!(iterations, reached = reached.len(), "fixpoint reached");
        Ok(RunOutcome {
            status: Status::Ok,
            error_state: None,
            iterations,
            reached_count: reached.len(),
        })
    }
}
