use std::path::{Path, PathBuf};

/// One verification task: a program plus the resource budgets and output
/// location the driver honors.
#[derive(Debug, Clone)]
pub struct Task {
    /// Base name of the program, used in summaries and artifact paths.
    pub program: String,
    /// Work-list iteration budget per fixpoint run; `None` is unbounded.
    pub max_iterations: Option<usize>,
    /// Refinement budget of the CEGAR loop.
    pub max_refinements: usize,
    /// Where artifacts land; `None` disables artifact output.
    pub output_directory: Option<PathBuf>,
}

impl Task {
    pub const DEFAULT_MAX_REFINEMENTS: usize = 12;

    pub fn new<S: Into<String>>(program: S) -> Self {
        Self {
            program: program.into(),
            max_iterations: None,
            max_refinements: Self::DEFAULT_MAX_REFINEMENTS,
            output_directory: None,
        }
    }

    /// Derive the program name from its file path, as the CLI does.
    pub fn for_path(path: &Path) -> Self {
        let program = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self::new(program)
    }

    pub fn with_max_iterations(mut self, budget: usize) -> Self {
        self.max_iterations = Some(budget);
        self
    }

    pub fn with_max_refinements(mut self, budget: usize) -> Self {
        self.max_refinements = budget;
        self
    }

    pub fn with_output_directory<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.output_directory = Some(dir.into());
        self
    }
}
