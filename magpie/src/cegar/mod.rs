//! Counterexample-guided abstraction refinement around the predicate
//! CPAs: run the fixpoint, check the abstract error path concretely,
//! and mine interpolants for new precision predicates when the path is
//! spurious.

use crate::analysis::predicate::Predicate;
use crate::analysis::predicate::abe::BlockStrategy;
use crate::analysis::{
    AbePredicateCpa, ArgCpa, ArgGraph, CompositeCpa, ConfigurableProgramAnalysis, CpaAlgorithm,
    LocationCpa, PredicateCpa, PredicatePrecision, PropertyCpa, StackCpa,
};
use crate::error::AnalysisError;
use crate::report::Reporter;
use crate::smt::builder::instruction_formula;
use crate::smt::interpolate::{InterpolationProvider, QeInterpolator};
use crate::smt::ssa::{SsaMap, atoms, collect_symbols, strip_indices};
use crate::smt::{SmtEnv, WORD_BITS, conjoin};
use crate::task::Task;
use crate::verdict::{AnalysisResult, Status, Verdict, Witness};
use magpie_cfa::{Cfa, EdgeId};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use tracing::{debug, info};
use z3::ast::{Ast, BV, Bool};

enum CexOutcome {
    Feasible(Witness),
    Refined,
    Stuck(AnalysisResult),
}

/// The refinement loop driver. Owns the precision, which only ever
/// grows across iterations, and rebuilds the CPA stack fresh for every
/// fixpoint run.
pub struct CegarDriver {
    cfa: Arc<Cfa>,
    smt: Rc<SmtEnv>,
    task: Task,
    strategy: Option<BlockStrategy>,
    precision: PredicatePrecision,
    reporter: Reporter,
}

impl CegarDriver {
    pub fn new(cfa: Arc<Cfa>, task: Task, strategy: Option<BlockStrategy>) -> Self {
        let precision = PredicatePrecision::from_cfa(&cfa);
        Self {
            cfa,
            smt: Rc::new(SmtEnv::new()),
            task,
            strategy,
            precision,
            reporter: Reporter::disabled(),
        }
    }

    pub fn with_reporter(mut self, reporter: Reporter) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn precision(&self) -> &PredicatePrecision {
        &self.precision
    }

    fn build_stack(&self, arg: Rc<RefCell<ArgGraph>>) -> ArgCpa {
        let predicate: Box<dyn ConfigurableProgramAnalysis> = match self.strategy {
            Some(strategy) => Box::new(AbePredicateCpa::new(
                self.cfa.clone(),
                self.smt.clone(),
                self.precision.clone(),
                strategy,
            )),
            None => Box::new(PredicateCpa::new(
                self.cfa.clone(),
                self.smt.clone(),
                self.precision.clone(),
            )),
        };
        let composite = CompositeCpa::new(
            self.cfa.clone(),
            vec![
                Box::new(LocationCpa::new(self.cfa.clone())),
                predicate,
                Box::new(PropertyCpa::new(self.cfa.clone())),
            ],
        );
        let stack = StackCpa::new(self.cfa.clone(), Box::new(composite));
        ArgCpa::new(self.cfa.clone(), Box::new(stack), arg)
    }

    pub fn run(&mut self) -> Result<AnalysisResult, AnalysisError> {
        for iteration in 0..self.task.max_refinements {
            info!(
                iteration,
                max = self.task.max_refinements,
                local_predicates = self.precision.local_count(),
                "CEGAR iteration"
            );
            let arg = Rc::new(RefCell::new(ArgGraph::new()));
            let cpa = self.build_stack(arg.clone());
            let outcome = CpaAlgorithm::new(&cpa, self.task.max_iterations).run()?;

            self.reporter.write_precision(iteration, &self.precision)?;
            self.reporter.write_arg(iteration, &arg, &self.cfa)?;

            match outcome.status {
                Status::Ok => return Ok(AnalysisResult::new(Verdict::True, Status::Ok)),
                Status::Timeout => {
                    return Ok(AnalysisResult::new(Verdict::Unknown, Status::Timeout));
                }
                _ => {}
            }

            let error_state = outcome
                .error_state
                .expect("error status always carries the target state");
            let crate::analysis::AbstractState::Arg(error_id) = error_state else {
                unreachable!("the driver's outermost analysis is the ARG");
            };
            let Some(path) = arg.borrow().path_to_root(error_id) else {
                return Ok(AnalysisResult::new(Verdict::Unknown, Status::Error)
                    .with_note("counterexample extraction failed"));
            };
            debug!(edges = path.len(), "abstract counterexample");

            match self.check_counterexample(iteration, &path)? {
                CexOutcome::Feasible(witness) => {
                    return Ok(AnalysisResult::new(Verdict::False, Status::Ok)
                        .with_witness(witness));
                }
                CexOutcome::Refined => continue,
                CexOutcome::Stuck(result) => return Ok(result),
            }
        }
        Ok(AnalysisResult::new(Verdict::Unknown, Status::Timeout)
            .with_note("refinement budget exhausted"))
    }

    /// Feasibility check and, for spurious paths, precision refinement
    /// from sequence interpolants.
    fn check_counterexample(
        &mut self,
        iteration: usize,
        path: &[EdgeId],
    ) -> Result<CexOutcome, AnalysisError> {
        let mut ssa = SsaMap::new();
        let conjuncts: Vec<Bool> = path
            .iter()
            .map(|e| instruction_formula(self.cfa.edge(*e).instruction, &mut ssa))
            .collect();
        self.reporter.write_cex(iteration, &conjuncts)?;

        if conjuncts.is_empty() {
            // the empty path is trivially feasible
            return Ok(CexOutcome::Feasible(Witness::default()));
        }

        let interpolator = QeInterpolator::new(self.smt.clone());
        let phi = conjoin(&conjuncts);
        match interpolator.sat(&phi) {
            Ok(true) => {
                let witness = self.extract_witness(path, &phi);
                debug!("counterexample is feasible");
                Ok(CexOutcome::Feasible(witness))
            }
            Ok(false) => {
                debug!("counterexample is spurious, refining");
                self.refine(path, &conjuncts, &interpolator)
            }
            Err(AnalysisError::SolverUnknown) => Ok(CexOutcome::Stuck(
                AnalysisResult::new(Verdict::Unknown, Status::Error)
                    .with_note("solver undecided on path feasibility"),
            )),
            Err(e) => Err(e),
        }
    }

    fn refine(
        &mut self,
        path: &[EdgeId],
        conjuncts: &[Bool],
        interpolator: &QeInterpolator,
    ) -> Result<CexOutcome, AnalysisError> {
        let interpolants = match interpolator.seq_interp(conjuncts)? {
            Some(interpolants) => interpolants,
            None => {
                return Ok(CexOutcome::Stuck(
                    AnalysisResult::new(Verdict::Unknown, Status::Error)
                        .with_note("interpolation unsupported, precision kept"),
                ));
            }
        };

        // τ₀ = true and τₙ = false carry no predicates; the inner
        // interpolant τᵢ refines the location between Aᵢ₋₁ and Aᵢ,
        // which is the successor node of edge i-1.
        let mut added = 0usize;
        for (i, interpolant) in interpolants.iter().enumerate() {
            let simplified = interpolant.simplify();
            if simplified.as_bool().is_some() {
                continue;
            }
            let node = self.cfa.edge(path[i]).target;
            for atom in atoms(&simplified) {
                let predicate = Predicate::new(strip_indices(&atom));
                if self.precision.add_local(node, predicate.clone()) {
                    debug!(node = node.index(), %predicate, "new predicate");
                    added += 1;
                }
            }
        }

        if added == 0 {
            return Ok(CexOutcome::Stuck(
                AnalysisResult::new(Verdict::Unknown, Status::Ok)
                    .with_note("refinement fixpoint"),
            ));
        }
        info!(added, "precision refined");
        Ok(CexOutcome::Refined)
    }

    fn extract_witness(&self, path: &[EdgeId], phi: &Bool) -> Witness {
        let mut witness = Witness {
            path: path
                .iter()
                .map(|e| self.cfa.edge(*e).instruction.label())
                .collect(),
            assignments: Default::default(),
        };
        if let Some(model) = self.smt.model(phi) {
            for symbol in collect_symbols(phi) {
                let term = BV::new_const(symbol.as_str(), WORD_BITS);
                if let Some(value) = model.eval(&term, true).and_then(|v| v.as_i64()) {
                    witness.assignments.insert(symbol, value);
                }
            }
        }
        witness
    }
}
