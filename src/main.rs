use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use armory::archive::export_top_k;
use armory::archive::snapshot::snapshot_path;
use armory::archive::{Archive, Candidate};
use armory::cli::{Cli, Commands};
use armory::collab::harness::HarnessExecutor;
use armory::collab::{BundleAssembler, OrchestratorAssembler};
use armory::config::{self, AppConfig};
use armory::controller::{Collaborators, Optimizer};
use armory::experiment::{ExperimentRunner, InstancePool};
use armory::llm::{self, LlmClient, LlmGenerator, LlmJudge, LlmRefiner};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    tracing::info!("Armory starting");

    let config = config::load_config(&cli)?;
    tracing::info!(model = %config.model, output_dir = %config.output_dir.display(), "Config loaded");

    match cli.command {
        Commands::Run { .. } => optimize(config, false).await?,
        Commands::Resume { .. } => optimize(config, true).await?,
        Commands::Export { k, json, .. } => {
            let archive = load_archive(&config.output_dir)?;
            let top = export_top_k(&archive, k);
            if json {
                println!("{}", serde_json::to_string_pretty(&top)?);
            } else if top.is_empty() {
                println!("No active candidates yet.");
            } else {
                print_table(&top);
            }
        }
        Commands::Inspect { .. } => {
            let archive = load_archive(&config.output_dir)?;
            println!(
                "Run {} (seed {}), iteration {}, {} candidates, {} total pulls",
                archive.run_id(),
                archive.seed(),
                archive.iteration(),
                archive.len(),
                archive.total_pulls()
            );
            print_table(archive.candidates());
            for candidate in archive.candidates() {
                if let Some(reason) = &candidate.retire_reason {
                    println!("  {} retired: {reason}", candidate.id);
                }
            }
        }
    }

    Ok(())
}

/// Wire the real collaborators and drive the loop until it stops.
async fn optimize(config: AppConfig, resume: bool) -> anyhow::Result<()> {
    if llm::uses_ollama(&config.model) {
        llm::check_ollama_ready(&config.model).await?;
    }

    let instances = config
        .instances
        .as_deref()
        .context("No task instances configured; pass --instances or set general.instances")?;
    let pool = InstancePool::load(instances)?;
    tracing::info!(instances = pool.len(), path = %instances.display(), "Instance pool loaded");

    let harness = config
        .harness_command
        .clone()
        .context("No harness configured; set execution.harness_command")?;

    let assembler: Arc<dyn OrchestratorAssembler> = match &config.agent_template {
        Some(path) => Arc::new(BundleAssembler::from_file(path)?),
        None => Arc::new(BundleAssembler::default()),
    };
    let executor = Arc::new(
        HarnessExecutor::new(harness, config.output_dir.join("work"))
            .with_cost_limit(config.cost_limit),
    );
    let client = LlmClient::new(config.model.clone());
    let calibration_runner = ExperimentRunner::new(
        config.workers,
        Duration::from_secs(config.instance_timeout_secs),
        config.cost_limit,
    );

    let collab = Collaborators {
        generator: Arc::new(LlmGenerator::new(client.clone())?),
        refiner: Arc::new(LlmRefiner::new(
            client.clone(),
            assembler.clone(),
            executor.clone(),
            calibration_runner,
        )?),
        assembler,
        executor,
        judge: Arc::new(LlmJudge::new(client)),
    };

    // Ctrl+C cancels the in-flight iteration; the last persisted one survives.
    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling the current iteration");
            signal_token.cancel();
        }
    });

    let output_dir = config.output_dir.clone();
    let mut optimizer = if resume {
        Optimizer::resume(&snapshot_path(&output_dir), config, pool, collab, cancel)?
    } else {
        Optimizer::new(config, pool, collab, cancel)?
    };
    let summary = optimizer.run().await?;

    println!(
        "Stopped after {} iteration(s): {}\n  Archive: {} candidates ({} active)\n  Log: {}",
        summary.iterations_run,
        summary.stop_reason,
        summary.archive_size,
        summary.active_count,
        optimizer.log_path().display(),
    );
    Ok(())
}

fn load_archive(output_dir: &Path) -> anyhow::Result<Archive> {
    let path = snapshot_path(output_dir);
    Archive::load(&path).with_context(|| format!("No readable run at {}", output_dir.display()))
}

fn print_table(candidates: &[Candidate]) {
    println!(
        "{:>5}  {:<28} {:<8} {:>6} {:>7} {:>9}",
        "id", "name", "status", "pulls", "mean", "avg tok"
    );
    for c in candidates {
        println!(
            "{:>5}  {:<28} {:<8} {:>6} {:>7.3} {:>9.0}",
            c.id.to_string(),
            c.name(),
            c.status.as_str(),
            c.stats.pull_count,
            c.stats.mean_reward,
            c.stats.average_tokens()
        );
    }
}
