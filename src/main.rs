use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing::{debug, info};

use agentflow::config::OrchestratorConfig;
use agentflow::core::WorkflowGraph;
use agentflow::orchestration::Orchestrator;
use agentflow::workflow::{EdgeInference, TaskList};
use agentflow::Result;

/// agentflow - inspect multi-agent task workflows
#[derive(Parser, Debug)]
#[command(name = "agentflow")]
#[command(version, about, long_about = None)]
#[command(
    after_help = "ENVIRONMENT:\n    AGENTFLOW_DEBUG=1   Enable debug logging (alternative to --debug)\n    RUST_LOG            Override the log filter"
)]
pub struct Cli {
    /// Enable debug logging (written to stderr)
    #[arg(short = 'd', long, global = true)]
    pub debug: bool,

    /// Config file (defaults to ~/.agentflow/agentflow.toml)
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Print the execution plan of a task list
    Plan {
        /// Task list file (.toml or .json)
        file: PathBuf,

        /// Minimum level width shown as parallel
        #[arg(long)]
        threshold: Option<usize>,

        /// Treat tasks without depends_on as roots instead of chaining them
        #[arg(long)]
        independent: bool,
    },

    /// Validate a task list without running it
    Check {
        /// Task list file (.toml or .json)
        file: PathBuf,

        /// Treat tasks without depends_on as roots instead of chaining them
        #[arg(long)]
        independent: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    agentflow::log::init(cli.debug);

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Plan {
            file,
            threshold,
            independent,
        } => run_plan(&file, &config, threshold, independent),
        Command::Check { file, independent } => run_check(&file, &config, independent),
    }
}

fn load_config(path: Option<&Path>) -> Result<OrchestratorConfig> {
    match path {
        Some(path) => OrchestratorConfig::load_from(path),
        None => OrchestratorConfig::load(),
    }
}

fn inference(config: &OrchestratorConfig, independent: bool) -> EdgeInference {
    if independent {
        EdgeInference::Independent
    } else {
        config.edge_inference
    }
}

fn load_graph(file: &Path, inference: EdgeInference) -> Result<WorkflowGraph> {
    debug!(file = %file.display(), ?inference, "Loading task list");
    let tasks = TaskList::load(file)?;
    Orchestrator::build_graph(&tasks, inference)
}

fn run_plan(
    file: &Path,
    config: &OrchestratorConfig,
    threshold: Option<usize>,
    independent: bool,
) -> Result<()> {
    let mut config = config.clone();
    if let Some(threshold) = threshold {
        config.parallel_threshold = threshold;
    }
    config.validate()?;

    let graph = load_graph(file, inference(&config, independent))?;
    print!("{}", graph.execution_plan(config.parallel_threshold)?);
    Ok(())
}

fn run_check(file: &Path, config: &OrchestratorConfig, independent: bool) -> Result<()> {
    let graph = load_graph(file, inference(config, independent))?;
    let levels = graph.execution_levels()?;
    let widest = levels.iter().map(Vec::len).max().unwrap_or(0);
    info!(file = %file.display(), nodes = graph.len(), "Task list is valid");

    println!("{}: OK", file.display());
    println!("  Tasks:   {}", graph.len());
    println!("  Edges:   {}", graph.edge_count());
    println!("  Levels:  {}", levels.len());
    println!("  Widest:  {}", widest);
    Ok(())
}
