//! `maestro` command-line front end.

mod config;
mod console;

use crate::config::MaestroConfig;
use crate::console::StdinChannel;
use clap::{Parser, Subcommand};
use maestro_agent::LlmWorkerFactory;
use maestro_core::{CheckpointChannel, RosterProvider};
use maestro_orchestrator::{
    CapabilityIndex, CheckpointStore, DetachedChannel, FileCheckpointStore,
    MemoryCheckpointStore, Orchestrator, RoutingOptimizer, RunOutcome, WorkerLoader,
};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "maestro", about = "Maestro: multi-worker task routing and orchestration")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "maestro.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a request, answering checkpoints on the terminal
    Ask {
        /// Request text; omit to be prompted for it
        text: Vec<String>,
    },
    /// Run a request until its first checkpoint and persist it
    Start {
        /// Request text
        #[arg(required = true)]
        text: Vec<String>,
    },
    /// Answer the checkpoint a persisted thread is parked at
    Resume {
        /// Thread id printed by `start`
        thread_id: String,
        /// Reply text
        #[arg(required = true)]
        reply: Vec<String>,
    },
    /// List persisted threads
    Threads,
    /// Show the roster with derived capabilities
    Workers,
    /// Analyze a task and show the routing decision without running it
    Route {
        /// Task text
        #[arg(required = true)]
        text: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = MaestroConfig::load(&cli.config).await?;

    match cli.command {
        Commands::Ask { text } => {
            let channel = Arc::new(StdinChannel::new(config.orchestrator.worker_timeout()));
            let orchestrator = build(&config, channel, Arc::new(MemoryCheckpointStore::new()))?;
            let _monitor = orchestrator.spawn_monitor();

            let outcome = orchestrator.start(&text.join(" ")).await?;
            print_outcome(outcome)
        }
        Commands::Start { text } => {
            let orchestrator = build_detached(&config).await?;
            let outcome = orchestrator.start(&text.join(" ")).await?;
            print_outcome(outcome)
        }
        Commands::Resume { thread_id, reply } => {
            let orchestrator = build_detached(&config).await?;
            let outcome = orchestrator.resume(&thread_id, &reply.join(" ")).await?;
            print_outcome(outcome)
        }
        Commands::Threads => {
            let store = FileCheckpointStore::new(config.checkpoint_dir()).await?;
            for id in store.list().await? {
                if let Some(state) = store.load(&id).await? {
                    println!("{id}\t{}\t{}", state.stage, state.updated_at.to_rfc3339());
                }
            }
            Ok(())
        }
        Commands::Workers => {
            let index = CapabilityIndex::with_patterns(config.capabilities.clone());
            let roster = config.roster();
            let workers: Vec<serde_json::Value> = roster
                .list_workers()
                .values()
                .map(|worker| {
                    serde_json::json!({
                        "name": worker.name,
                        "director": worker.name == roster.director(),
                        "description": worker.description,
                        "tools": worker.tools,
                        "max_instances": worker.max_instances,
                        "capabilities": index.capabilities_for(worker),
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&workers)?);
            Ok(())
        }
        Commands::Route { text } => {
            let roster: Arc<dyn RosterProvider> = Arc::new(config.roster());
            let index = Arc::new(CapabilityIndex::with_patterns(config.capabilities.clone()));
            let factory = Arc::new(LlmWorkerFactory::new(config.model.clone()));
            let loader = Arc::new(WorkerLoader::new(Arc::clone(&roster), factory, index));
            let router = RoutingOptimizer::new(roster, loader, config.routing.clone())
                .with_director(config.orchestrator.director.clone())
                .with_max_collaborators(config.orchestrator.max_collaborators);

            let analysis = router.analyze_task(&text.join(" "));
            let decision =
                router.optimize_routing(&analysis, config.orchestrator.strategy, &BTreeSet::new());
            let report = serde_json::json!({
                "analysis": analysis,
                "decision": decision,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
    }
}

fn build(
    config: &MaestroConfig,
    channel: Arc<dyn CheckpointChannel>,
    store: Arc<dyn CheckpointStore>,
) -> anyhow::Result<Orchestrator> {
    let roster = Arc::new(config.roster());
    let factory = Arc::new(LlmWorkerFactory::new(config.model.clone()));
    let index = Arc::new(CapabilityIndex::with_patterns(config.capabilities.clone()));
    info!(
        workers = roster.len(),
        provider = ?config.model.provider,
        strategy = %config.orchestrator.strategy,
        "Orchestrator configured"
    );
    Ok(Orchestrator::new(
        config.orchestrator.clone(),
        config.routing.clone(),
        roster,
        factory,
        index,
        channel,
        store,
    )?)
}

async fn build_detached(config: &MaestroConfig) -> anyhow::Result<Orchestrator> {
    let store = Arc::new(FileCheckpointStore::new(config.checkpoint_dir()).await?);
    build(config, Arc::new(DetachedChannel), store)
}

fn print_outcome(outcome: RunOutcome) -> anyhow::Result<()> {
    match outcome {
        RunOutcome::Completed { response, .. } => {
            println!("{response}");
            Ok(())
        }
        RunOutcome::Suspended {
            thread_id,
            checkpoint,
        } => {
            if !checkpoint.context.is_empty() {
                println!("{}", checkpoint.context);
            }
            eprintln!("\n{}", checkpoint.prompt);
            eprintln!("Resume with: maestro resume {thread_id} <reply>");
            Ok(())
        }
        RunOutcome::Failed {
            execution_id,
            error,
            ..
        } => Err(error.to_error(execution_id).into()),
    }
}
