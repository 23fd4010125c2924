use anyhow::Context;
use clap::Parser;
use magpie::cfa::ProgramFile;
use magpie::report::Reporter;
use magpie::{AnalysisConfig, Task};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(version, about = "Model checker for normalized imperative programs", long_about = None)]
struct MagpieParams {
    /// Program files (normalized JSON documents) to verify.
    #[arg(required = true)]
    program: Vec<PathBuf>,

    /// Analysis configuration(s) to run, by name.
    #[arg(short = 'c', long = "config", default_value = "PredicateAnalysisCEGAR")]
    config: Vec<AnalysisConfigArg>,

    /// Property name(s) to check.
    #[arg(short = 'p', long = "property", default_value = "unreach-call")]
    property: Vec<String>,

    /// Directory for analysis artifacts.
    #[arg(short = 'o', long = "output-directory")]
    output_directory: Option<PathBuf>,

    /// Work-list iteration budget per fixpoint run.
    #[arg(long)]
    max_iterations: Option<usize>,

    /// CEGAR refinement budget.
    #[arg(long, default_value_t = Task::DEFAULT_MAX_REFINEMENTS)]
    max_refinements: usize,

    /// Only print the summary lines.
    #[arg(long)]
    compact: bool,

    /// Verbose progress output.
    #[arg(long)]
    verbose: bool,

    /// Numeric log level (0 = warnings, 1 = info, 2 = debug, 3+ = trace).
    #[arg(long, default_value_t = 0)]
    log_level: u8,
}

#[derive(Debug, Clone)]
struct AnalysisConfigArg(AnalysisConfig);

impl std::str::FromStr for AnalysisConfigArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(AnalysisConfigArg)
    }
}

fn init_tracing(params: &MagpieParams) {
    let level = match (params.verbose, params.log_level) {
        (_, 3..) => "trace",
        (true, _) | (_, 2) => "debug",
        (_, 1) => "info",
        _ => "warn",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("magpie={level},magpie_cfa={level}")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() -> anyhow::Result<()> {
    let params = MagpieParams::parse();
    init_tracing(&params);

    for property in &params.property {
        if property != "unreach-call" {
            eprintln!("warning: unsupported property '{property}', checking unreach-call");
        }
    }

    for program in &params.program {
        let source = std::fs::read_to_string(program)
            .with_context(|| format!("reading {}", program.display()))?;
        let file = ProgramFile::from_json(&source)
            .with_context(|| format!("parsing {}", program.display()))?;
        let cfa = Arc::new(
            file.to_cfa()
                .with_context(|| format!("resolving {}", program.display()))?,
        );

        for config in &params.config {
            let mut task = Task::for_path(program).with_max_refinements(params.max_refinements);
            if let Some(budget) = params.max_iterations {
                task = task.with_max_iterations(budget);
            }
            if let Some(dir) = &params.output_directory {
                task = task.with_output_directory(dir.clone());
            }

            let reporter = Reporter::new(&task)?;
            reporter.write_program(&source)?;

            let result = config
                .0
                .run(cfa.clone(), &task)
                .with_context(|| format!("running {} on {}", config.0, task.program))?;
            reporter.write_summary(&task.program, &result)?;

            if !params.compact {
                if let Some(witness) = &result.witness {
                    for step in &witness.path {
                        println!("  {step}");
                    }
                }
            }
            println!("{}", result.summary_line(&task.program));
        }
    }

    // exit 0 whenever every task emitted a verdict; errors above bail
    Ok(())
}
