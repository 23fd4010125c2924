use crate::analysis::{ArgGraph, PredicatePrecision, render_arg};
use crate::error::AnalysisError;
use crate::task::Task;
use crate::verdict::AnalysisResult;
use magpie_cfa::Cfa;
use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;
use tracing::debug;
use z3::ast::Bool;

/// Writes the per-program analysis artifacts: the input copy, the CFA,
/// and per-refinement precision/ARG/counterexample dumps. A reporter
/// without an output directory swallows everything.
#[derive(Debug)]
pub struct Reporter {
    dir: Option<PathBuf>,
}

impl Reporter {
    pub fn new(task: &Task) -> Result<Self, AnalysisError> {
        let dir = match &task.output_directory {
            Some(base) => {
                let dir = base.join(&task.program);
                std::fs::create_dir_all(&dir)?;
                Some(dir)
            }
            None => None,
        };
        Ok(Self { dir })
    }

    pub fn disabled() -> Self {
        Self { dir: None }
    }

    fn write(&self, name: &str, contents: &str) -> Result<(), AnalysisError> {
        if let Some(dir) = &self.dir {
            let path = dir.join(name);
            debug!(path = %path.display(), "writing artifact");
            std::fs::write(path, contents)?;
        }
        Ok(())
    }

    /// Copy of the input program document.
    pub fn write_program(&self, source: &str) -> Result<(), AnalysisError> {
        self.write("program.txt", source)
    }

    pub fn write_cfa(&self, cfa: &Cfa) -> Result<(), AnalysisError> {
        self.write("cfa.dot", &cfa.to_dot())
    }

    pub fn write_precision(
        &self,
        iteration: usize,
        precision: &PredicatePrecision,
    ) -> Result<(), AnalysisError> {
        self.write(&format!("precision_{iteration}"), &precision.render())
    }

    pub fn write_arg(
        &self,
        iteration: usize,
        arg: &Rc<RefCell<ArgGraph>>,
        cfa: &Arc<Cfa>,
    ) -> Result<(), AnalysisError> {
        self.write(&format!("arg_{iteration}.dot"), &render_arg(arg, cfa))
    }

    /// The SMT conjuncts of a spurious (or real) error path.
    pub fn write_cex(&self, iteration: usize, conjuncts: &[Bool]) -> Result<(), AnalysisError> {
        let text: String = conjuncts
            .iter()
            .map(|c| format!("{c}\n"))
            .collect();
        self.write(&format!("cex_{iteration}"), &text)
    }

    pub fn write_summary(
        &self,
        program: &str,
        result: &AnalysisResult,
    ) -> Result<(), AnalysisError> {
        self.write("summary.txt", &format!("{}\n", result.summary_line(program)))
    }
}
