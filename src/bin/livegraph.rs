//! Command line front end and worker entry point
//!
//! Usage:
//!   livegraph run pipeline.json --seconds 5
//!   livegraph describe pipeline.json
//!   livegraph classes
//!
//! Started with `LIVEGRAPH_WORKER` set, the binary serves as the worker of a
//! process computer instead and speaks the worker protocol on stdin/stdout.

use clap::{Parser, Subcommand};
use livegraph::runtime::computer::{is_worker_process, run_worker};
use livegraph::runtime::topology::Topology;
use livegraph::{EngineConfig, Graph, NodeRegistry, Pipeline};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a saved pipeline
    Run {
        /// Pipeline JSON file
        pipeline: PathBuf,

        /// Engine configuration (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Name of the node the graph is discovered from (first node if unset)
        #[arg(short, long)]
        start: Option<String>,

        /// Stop after this many seconds instead of waiting for completion
        #[arg(long)]
        seconds: Option<f64>,
    },

    /// Show the nodes of a pipeline and the bridge of every connection
    Describe {
        pipeline: PathBuf,

        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// List the node classes this binary can construct
    Classes,
}

fn load_config(path: Option<&PathBuf>) -> Result<EngineConfig, Box<dyn std::error::Error>> {
    match path {
        Some(path) => Ok(EngineConfig::load(path)?),
        None => Ok(EngineConfig::default()),
    }
}

fn run(
    registry: NodeRegistry,
    pipeline_path: PathBuf,
    config: EngineConfig,
    start: Option<String>,
    seconds: Option<f64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let pipeline = Pipeline::load(&pipeline_path, &registry)?;
    let start = match start {
        Some(name) => pipeline
            .node_id(&name)
            .ok_or_else(|| format!("no node named '{}'", name))?,
        None => pipeline.node_ids().next().ok_or("pipeline is empty")?,
    };

    let run_for = seconds
        .map(Duration::try_from_secs_f64)
        .transpose()
        .map_err(|e| format!("invalid --seconds: {}", e))?;

    let stop_timeout = config.stop_timeout();
    let mut graph = Graph::new(pipeline, start)
        .with_config(config)
        .with_registry(registry);

    info!("Running {}", pipeline_path.display());
    graph.start_all()?;

    match run_for {
        Some(run_for) => {
            if graph.join(run_for) {
                info!("Pipeline finished");
            }
        }
        None => {
            while !graph.join(Duration::from_secs(1)) {}
            info!("Pipeline finished");
        }
    }

    if !graph.stop_all(stop_timeout) {
        warn!("Some computers had to be closed forcibly");
    }
    Ok(())
}

fn describe(
    registry: &NodeRegistry,
    pipeline_path: PathBuf,
    config: EngineConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let pipeline = Pipeline::load(&pipeline_path, registry)?;
    let doc = pipeline.to_doc();
    let topology = Topology::from_doc(&doc, &config.bridges)?;

    println!("Nodes:");
    for (id, placement) in topology.placements() {
        println!(
            "  {:>4}  {:<20} {:<10} {}",
            id.to_string(),
            placement.name,
            placement.class,
            placement.location
        );
    }
    println!("Connections:");
    for edge in topology.edges() {
        println!("  {:<40} {}", edge.key, edge.kind);
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // stdout carries the worker protocol, so logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let registry = NodeRegistry::with_builtin();
    if is_worker_process() {
        run_worker(&registry)?;
        return Ok(());
    }

    let args = Args::parse();
    match args.command {
        Commands::Run {
            pipeline,
            config,
            start,
            seconds,
        } => run(registry, pipeline, load_config(config.as_ref())?, start, seconds),
        Commands::Describe { pipeline, config } => {
            describe(&registry, pipeline, load_config(config.as_ref())?)
        }
        Commands::Classes => {
            for class in registry.classes() {
                println!("{}", class);
            }
            Ok(())
        }
    }
}
