//! Convoy - dependency-ordered compose orchestration
//!
//! This is the main CLI entry point for Convoy.

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use convoy::backend::{Backend, DryRunBackend, LocalBackend};
use convoy::compose::{ComposeOrchestrator, Direction, OrchestratorOptions, Project};
use convoy::container::ContainerManager;
use convoy::Context;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Convoy - compose projects started and stopped in dependency order
#[derive(Parser)]
#[command(name = "convoy")]
#[command(version)]
#[command(about = "Run compose projects in dependency order", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Compose file (repeatable; later files override earlier ones)
    #[arg(short, long = "file", global = true)]
    file: Vec<PathBuf>,

    /// Project name
    #[arg(short = 'p', long = "project-name", global = true)]
    project_name: Option<String>,

    /// Activate a profile (repeatable)
    #[arg(long = "profile", global = true)]
    profile: Vec<String>,

    /// Maximum number of services operated on at once
    #[arg(long, global = true)]
    parallel: Option<usize>,

    /// Give up after this many seconds
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Log what would happen without touching containers
    #[arg(long, global = true)]
    dry_run: bool,

    /// Ignore dependencies on services that are not defined
    #[arg(long, global = true)]
    lenient_deps: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create and start containers
    Up {
        /// Build images before starting containers
        #[arg(long)]
        build: bool,
    },
    /// Stop and remove containers
    Down,
    /// Start services and their dependencies
    Start {
        /// Services to start (default: all)
        services: Vec<String>,
    },
    /// Stop services and their dependents
    Stop {
        /// Services to stop (default: all)
        services: Vec<String>,
    },
    /// Restart services
    Restart {
        /// Services to restart (default: all)
        services: Vec<String>,
    },
    /// Pull service images
    Pull,
    /// Build service images
    Build,
    /// List containers
    Ps,
    /// Validate and print the merged compose file
    Config,
    /// Print the service dependency graph
    Graph {
        /// Show the shutdown order instead of the startup order
        #[arg(long)]
        reverse: bool,
        /// Print the adjacency map as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();

    let working_dir = std::env::current_dir()?;
    let project = Project::load(
        &cli.file,
        &working_dir,
        cli.project_name.as_deref(),
        &cli.profile,
    )
    .context("failed to load compose project")?;

    match cli.command {
        Commands::Config => {
            print!("{}", serde_yaml::to_string(&project_config(&project))?);
            return Ok(());
        }
        Commands::Graph { reverse, json } => {
            let graph = project.graph(cli.lenient_deps)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&graph.adjacency())?);
            } else {
                let direction = if reverse {
                    Direction::Backward
                } else {
                    Direction::Forward
                };
                for (depth, level) in graph.levels(direction).iter().enumerate() {
                    println!("{}: {}", depth, level.join(" "));
                }
                if let Some(cycle) = graph.find_cycle() {
                    println!("cycle: {}", cycle.join(" -> "));
                }
            }
            return Ok(());
        }
        _ => {}
    }

    let backend: Arc<dyn Backend> = if cli.dry_run {
        // Existing containers are shown, but a missing store is never created
        let store = LocalBackend::default_path();
        if store.exists() {
            Arc::new(DryRunBackend::with_existing(Arc::new(ContainerManager::new(store)?)))
        } else {
            Arc::new(DryRunBackend::new())
        }
    } else {
        Arc::new(LocalBackend::open(LocalBackend::default_path())?)
    };

    let orchestrator = ComposeOrchestrator::new(project, backend).with_options(OrchestratorOptions {
        max_concurrency: cli.parallel,
        lenient: cli.lenient_deps,
        ..Default::default()
    });

    let root = Context::background();
    let ctx = match cli.timeout {
        Some(secs) => root.with_timeout(Duration::from_secs(secs)),
        None => root.with_cancel(),
    };

    let interrupt = root.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, stopping");
            interrupt.cancel();
        }
    });

    let name = orchestrator.project().name.clone();
    match cli.command {
        Commands::Up { build } => {
            orchestrator.up(&ctx, build).await?;
            println!("Started project {}", name);
        }
        Commands::Down => {
            orchestrator.down(&ctx).await?;
            println!("Removed project {}", name);
        }
        Commands::Start { services } => orchestrator.start(&ctx, &services).await?,
        Commands::Stop { services } => orchestrator.stop(&ctx, &services).await?,
        Commands::Restart { services } => orchestrator.restart(&ctx, &services).await?,
        Commands::Pull => orchestrator.pull(&ctx).await?,
        Commands::Build => orchestrator.build(&ctx).await?,
        Commands::Ps => {
            println!("{:<30} {:<15} {:<25} {}", "NAME", "SERVICE", "IMAGE", "STATUS");
            for container in orchestrator.ps(&ctx).await? {
                println!(
                    "{:<30} {:<15} {:<25} {}",
                    container.name,
                    container.service,
                    container.image,
                    container.state()
                );
            }
        }
        Commands::Config | Commands::Graph { .. } => {}
    }

    Ok(())
}

/// The project's effective configuration, as `config` prints it
fn project_config(project: &Project) -> convoy::compose::ComposeConfig {
    convoy::compose::ComposeConfig {
        name: Some(project.name.clone()),
        services: project
            .services
            .iter()
            .map(|s| (s.name.clone(), s.clone()))
            .collect(),
        ..Default::default()
    }
}
