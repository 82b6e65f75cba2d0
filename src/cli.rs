use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "armory",
    version,
    about = "Bandit search over LLM sub-agent configurations"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start a new optimization run
    Run {
        /// Model used by the generator, refiner and judge (e.g., "llama3.2")
        #[arg(short, long)]
        model: Option<String>,

        /// Directory receiving the archive, iteration records and logs
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Path to config file (layered above the output dir's armory.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Maximum number of iterations
        #[arg(short = 'n', long)]
        iterations: Option<u64>,

        /// Seed for growth draws, warmup calibration and batch sampling
        #[arg(long)]
        seed: Option<u64>,

        /// Number of candidates selected per iteration
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Growth concentration; 0 disables growth
        #[arg(long)]
        theta: Option<f64>,

        /// JSON or JSONL file of task instances
        #[arg(short, long)]
        instances: Option<PathBuf>,
    },
    /// Continue a run from its last persisted iteration
    Resume {
        /// Output directory of the run to resume
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Path to config file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Raise the iteration cap
        #[arg(short = 'n', long)]
        iterations: Option<u64>,

        /// JSON or JSONL file of task instances
        #[arg(short, long)]
        instances: Option<PathBuf>,
    },
    /// Print the top candidates of a run
    Export {
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Number of candidates to export
        #[arg(short, default_value_t = 5)]
        k: usize,

        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Summarize every candidate in a run's archive
    Inspect {
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },
}
