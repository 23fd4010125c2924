//! The analysis configurations selectable by name, each building its
//! own CPA stack the same way: ARG ⟨ Stack ⟨ Composite(Location, …,
//! Property) ⟩ ⟩.

use crate::analysis::predicate::abe::BlockStrategy;
use crate::analysis::{
    AbePredicateCpa, ArgCpa, ArgGraph, CompositeCpa, ConfigurableProgramAnalysis, CpaAlgorithm,
    LocationCpa, PredicateCpa, PredicatePrecision, PropertyCpa, StackCpa, ValueCpa,
};
use crate::cegar::CegarDriver;
use crate::error::AnalysisError;
use crate::report::Reporter;
use crate::smt::SmtEnv;
use crate::task::Task;
use crate::verdict::{AnalysisResult, Status, Verdict};
use magpie_cfa::Cfa;
use std::cell::RefCell;
use std::fmt::{Display, Formatter};
use std::rc::Rc;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisConfig {
    Reachability,
    Value,
    ValueMergeJoin,
    Predicate,
    PredicateCegar,
    PredicateAbeF,
    PredicateAbeLf,
    PredicateAbeBf,
    PredicateCegarAbeLf,
    Formula,
}

impl AnalysisConfig {
    pub const ALL: &'static [AnalysisConfig] = &[
        AnalysisConfig::Reachability,
        AnalysisConfig::Value,
        AnalysisConfig::ValueMergeJoin,
        AnalysisConfig::Predicate,
        AnalysisConfig::PredicateCegar,
        AnalysisConfig::PredicateAbeF,
        AnalysisConfig::PredicateAbeLf,
        AnalysisConfig::PredicateAbeBf,
        AnalysisConfig::PredicateCegarAbeLf,
        AnalysisConfig::Formula,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            AnalysisConfig::Reachability => "ReachabilityAnalysis",
            AnalysisConfig::Value => "ValueAnalysis",
            AnalysisConfig::ValueMergeJoin => "ValueAnalysisMergeJoin",
            AnalysisConfig::Predicate => "PredicateAnalysis",
            AnalysisConfig::PredicateCegar => "PredicateAnalysisCEGAR",
            AnalysisConfig::PredicateAbeF => "PredicateAnalysisABEf",
            AnalysisConfig::PredicateAbeLf => "PredicateAnalysisABElf",
            AnalysisConfig::PredicateAbeBf => "PredicateAnalysisABEbf",
            AnalysisConfig::PredicateCegarAbeLf => "PredicateAnalysisCEGARABElf",
            AnalysisConfig::Formula => "FormulaAnalysis",
        }
    }

    /// Run this configuration on a program. Artifacts land under the
    /// task's output directory.
    pub fn run(&self, cfa: Arc<Cfa>, task: &Task) -> Result<AnalysisResult, AnalysisError> {
        let reporter = Reporter::new(task)?;
        reporter.write_cfa(&cfa)?;
        info!(config = self.name(), program = %task.program, "starting analysis");

        let result = match self {
            AnalysisConfig::PredicateCegar => {
                CegarDriver::new(cfa, task.clone(), None)
                    .with_reporter(reporter)
                    .run()?
            }
            AnalysisConfig::PredicateCegarAbeLf => {
                CegarDriver::new(cfa, task.clone(), Some(BlockStrategy::LoopHeadsAndCalls))
                    .with_reporter(reporter)
                    .run()?
            }
            _ => {
                let result = self.run_once(&cfa, task, &reporter)?;
                reporter.write_summary(&task.program, &result)?;
                result
            }
        };
        Ok(result)
    }

    /// One fixpoint run without refinement.
    fn run_once(
        &self,
        cfa: &Arc<Cfa>,
        task: &Task,
        reporter: &Reporter,
    ) -> Result<AnalysisResult, AnalysisError> {
        let arg = Rc::new(RefCell::new(ArgGraph::new()));
        let cpa = self.build_stack(cfa, arg.clone());
        let outcome = CpaAlgorithm::new(&cpa, task.max_iterations).run()?;
        reporter.write_arg(0, &arg, cfa)?;
        let result = match outcome.status {
            Status::Ok => AnalysisResult::new(Verdict::True, Status::Ok),
            Status::Timeout => AnalysisResult::new(Verdict::Unknown, Status::Timeout),
            _ => AnalysisResult::new(Verdict::False, Status::Ok),
        };
        Ok(result)
    }

    fn build_stack(&self, cfa: &Arc<Cfa>, arg: Rc<RefCell<ArgGraph>>) -> ArgCpa {
        let mut components: Vec<Box<dyn ConfigurableProgramAnalysis>> =
            vec![Box::new(LocationCpa::new(cfa.clone()))];
        match self {
            AnalysisConfig::Reachability => {}
            AnalysisConfig::Value => {
                components.push(Box::new(ValueCpa::new(cfa.clone())));
            }
            AnalysisConfig::ValueMergeJoin => {
                components.push(Box::new(ValueCpa::with_merge_join(cfa.clone())));
            }
            AnalysisConfig::Predicate => {
                let smt = Rc::new(SmtEnv::new());
                let precision = PredicatePrecision::from_cfa(cfa);
                components.push(Box::new(PredicateCpa::new(cfa.clone(), smt, precision)));
            }
            AnalysisConfig::PredicateAbeF
            | AnalysisConfig::PredicateAbeLf
            | AnalysisConfig::PredicateAbeBf
            | AnalysisConfig::Formula => {
                let strategy = match self {
                    AnalysisConfig::PredicateAbeF => BlockStrategy::CallsOnly,
                    AnalysisConfig::PredicateAbeLf => BlockStrategy::LoopHeadsAndCalls,
                    AnalysisConfig::PredicateAbeBf => BlockStrategy::BranchesAndCalls,
                    _ => BlockStrategy::Never,
                };
                let smt = Rc::new(SmtEnv::new());
                let precision = PredicatePrecision::from_cfa(cfa);
                components.push(Box::new(AbePredicateCpa::new(
                    cfa.clone(),
                    smt,
                    precision,
                    strategy,
                )));
            }
            AnalysisConfig::PredicateCegar | AnalysisConfig::PredicateCegarAbeLf => {
                unreachable!("CEGAR configurations run through the driver")
            }
        }
        components.push(Box::new(PropertyCpa::new(cfa.clone())));

        let composite = CompositeCpa::new(cfa.clone(), components);
        let stack = StackCpa::new(cfa.clone(), Box::new(composite));
        ArgCpa::new(cfa.clone(), Box::new(stack), arg)
    }
}

impl FromStr for AnalysisConfig {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.name() == s)
            .ok_or_else(|| format!("unknown analysis configuration '{s}'"))
    }
}

impl Display for AnalysisConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_roundtrip() {
        for config in AnalysisConfig::ALL {
            assert_eq!(
                config.name().parse::<AnalysisConfig>().unwrap(),
                *config
            );
        }
        assert!("NoSuchAnalysis".parse::<AnalysisConfig>().is_err());
    }
}
