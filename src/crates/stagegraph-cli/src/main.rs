//! # stagegraph-cli
//!
//! A thin binary over `stagegraph-core`'s [`PipelineEngine`] and
//! `stagegraph-agent`'s [`CodergenExecutor`]: parse a DOT file, run it
//! against an in-process mock `ChatModel` and a local filesystem sandbox,
//! and print the event stream. This is both the harness the workspace's
//! own integration tests drive and the tool a human operator reaches for
//! to explore a graph (§3 "Supplemented features").

mod mock_llm;

use clap::{Parser, Subcommand};
use stagegraph_agent::environment::LocalFilesystemEnvironment;
use stagegraph_agent::executor::CodergenExecutor;
use stagegraph_agent::session::SessionConfig;
use stagegraph_agent::tools::ToolRegistry;
use stagegraph_core::dsl;
use stagegraph_core::event_bus::EventBus;
use stagegraph_core::graph::NodeType;
use stagegraph_core::handler::HandlerRegistry;
use stagegraph_core::persistence::RunsStore;
use stagegraph_core::visualization;
use stagegraph_toolkit::config::{ConfigBuilder, EngineConfig};
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

use mock_llm::DeterministicEchoClient;

#[derive(Parser)]
#[command(name = "stagegraph")]
#[command(about = "Graph pipeline orchestrator CLI", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse and structurally validate a DOT graph file.
    Validate {
        /// Path to a DOT graph definition.
        file: PathBuf,
    },

    /// Re-render a parsed DOT graph back to DOT (round-trip check).
    Render {
        /// Path to a DOT graph definition.
        file: PathBuf,
    },

    /// Run a DOT graph to completion against the mock ChatModel and a
    /// sandboxed local filesystem, printing each event as NDJSON.
    Run {
        /// Path to a DOT graph definition.
        file: PathBuf,

        /// Working directory the agent tools are sandboxed to (defaults
        /// to the current directory).
        #[arg(long)]
        workdir: Option<PathBuf>,

        /// Root directory stage/run logs and checkpoints are written
        /// under (defaults to `EngineConfig::default().logs_root`).
        #[arg(long)]
        logs_root: Option<PathBuf>,

        /// Path to the persisted run index (defaults to
        /// `EngineConfig::default().runs_file`).
        #[arg(long)]
        runs_file: Option<PathBuf>,
    },
}

fn install_tracing() {
    use tracing_subscriber::EnvFilter;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    install_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { file } => validate(&file)?,
        Commands::Render { file } => render(&file)?,
        Commands::Run { file, workdir, logs_root, runs_file } => {
            run(&file, workdir, logs_root, runs_file).await?
        }
    }

    Ok(())
}

fn validate(file: &PathBuf) -> anyhow::Result<()> {
    let source = std::fs::read_to_string(file)?;
    let graph = dsl::parse(&source)?;
    graph.validate()?;

    println!("graph is valid");
    println!("  id: {}", graph.id);
    println!("  nodes: {}", graph.nodes.len());
    println!("  edges: {}", graph.edges.len());
    if let Some(start) = graph.start_node() {
        println!("  start: {}", start.id);
    }
    if let Some(goal) = &graph.attrs.goal {
        println!("  goal: {goal}");
    }
    Ok(())
}

fn render(file: &PathBuf) -> anyhow::Result<()> {
    let source = std::fs::read_to_string(file)?;
    let graph = dsl::parse(&source)?;
    print!("{}", visualization::to_dot(&graph));
    Ok(())
}

async fn run(
    file: &PathBuf,
    workdir: Option<PathBuf>,
    logs_root: Option<PathBuf>,
    runs_file: Option<PathBuf>,
) -> anyhow::Result<()> {
    let source = std::fs::read_to_string(file)?;
    let engine_config = EngineConfig::from_env_with_defaults("STAGEGRAPH")?;

    let workdir = workdir.unwrap_or_else(|| PathBuf::from("."));
    let logs_root = logs_root.unwrap_or_else(|| PathBuf::from(&engine_config.logs_root));
    let runs_file = runs_file.unwrap_or_else(|| PathBuf::from(&engine_config.runs_file));

    let bus = EventBus::new();
    let env = Arc::new(LocalFilesystemEnvironment::new(workdir));
    let llm = Arc::new(DeterministicEchoClient::new());
    let session_config = SessionConfig::from_engine_config(&engine_config, "mock-model", "You are a helpful engineer.");

    let executor = Arc::new(CodergenExecutor::new(
        llm,
        env,
        ToolRegistry::with_builtins(),
        bus.clone(),
        session_config,
        Some(logs_root.clone()),
    ));

    let mut handlers = HandlerRegistry::new();
    handlers.register_executor(NodeType::CoderGen, executor.clone());
    handlers.register_executor(NodeType::Tool, executor);

    let runs = RunsStore::init(runs_file).await?;
    let engine = stagegraph_core::engine::PipelineEngine::new(runs, logs_root, handlers);

    let run_id = Uuid::new_v4().to_string();
    let _unsubscribe = engine.subscribe(run_id.clone(), |event| {
        let line = serde_json::json!({
            "kind": event.kind,
            "timestamp": event.timestamp,
            "subject": event.subject_id,
            "payload": event.payload,
        });
        println!("{line}");
    });

    let run = engine.start_with_id(run_id, source).await;
    println!("--- final status: {:?} ---", run.status);
    if let Some(error) = &run.error {
        eprintln!("error: {error}");
        std::process::exit(1);
    }
    Ok(())
}
