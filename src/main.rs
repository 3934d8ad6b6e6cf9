use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use aiwork_core::config::AppConfig;
use aiwork_core::event::EventBus;
use aiwork_core::types::{Status, WorkflowEvent, WorkflowId};

use aiwork_engine::{FlowDefinition, LocalExecutor, MetricsRegistry, Orchestrator};
use aiwork_gateway::GatewayServer;

const DEFAULT_CONFIG: &str = "aiwork.toml";

#[derive(Parser)]
#[command(name = "aiwork", version, about = "DAG workflow orchestration for task and agent pipelines")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = DEFAULT_CONFIG)]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the REST gateway
    Serve {
        /// Override the configured bind address
        #[arg(long)]
        bind: Option<String>,
    },
    /// Execute a flow definition (TOML or JSON) and print its outputs
    Run {
        /// Flow definition file
        file: PathBuf,
        /// Workflow id to use (generated if not provided)
        #[arg(long)]
        workflow_id: Option<String>,
    },
    /// Validate a flow definition and print its execution order
    Check {
        /// Flow definition file
        file: PathBuf,
    },
    /// Show current configuration
    Config,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

/// Engine components shared by every command that runs workflows.
struct Engine {
    orchestrator: Arc<Orchestrator>,
    metrics: Arc<MetricsRegistry>,
    event_bus: Arc<EventBus>,
}

impl Engine {
    fn new(config: &AppConfig) -> Self {
        let metrics = Arc::new(MetricsRegistry::new());
        let event_bus = Arc::new(EventBus::new(config.events.capacity));
        let executor = LocalExecutor::new(config.executor.clone(), metrics.clone());
        let orchestrator = Orchestrator::new()
            .with_executor(Arc::new(executor))
            .with_event_bus(event_bus.clone());
        Self {
            orchestrator: Arc::new(orchestrator),
            metrics,
            event_bus,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("aiwork=info,warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    // Handle completions before config loading
    if let Some(Commands::Completions { shell }) = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "aiwork", &mut std::io::stdout());
        return Ok(());
    }

    // Check needs no config
    if let Some(Commands::Check { file }) = &cli.command {
        return check_flow(file);
    }

    let config = load_config(&cli.config)?;

    match cli.command {
        Some(Commands::Config) => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Some(Commands::Serve { bind }) => {
            let mut gateway_config = config.gateway.clone();
            if let Some(bind) = bind {
                gateway_config.bind = bind;
            }
            let engine = Engine::new(&config);
            info!(bind = %gateway_config.bind, "Starting REST gateway");
            let server = GatewayServer::new(gateway_config, engine.orchestrator, engine.metrics);
            let cancel = tokio_util::sync::CancellationToken::new();
            let cancel_clone = cancel.clone();

            // Graceful shutdown on Ctrl-C
            tokio::spawn(async move {
                tokio::signal::ctrl_c().await.ok();
                info!("Shutting down gateway...");
                cancel_clone.cancel();
            });

            server.run(cancel).await?;
        }
        Some(Commands::Run { file, workflow_id }) => {
            let engine = Engine::new(&config);
            run_flow(&engine, &file, workflow_id).await?;
        }
        Some(Commands::Check { .. }) => unreachable!("handled before config load"),
        Some(Commands::Completions { .. }) => unreachable!("handled before config load"),
        None => {
            Cli::command().print_help()?;
            println!();
        }
    }

    Ok(())
}

/// Load the config file. A missing file at the default path means defaults.
fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    if !path.exists() && path == Path::new(DEFAULT_CONFIG) {
        info!("No {} found, using defaults", DEFAULT_CONFIG);
        return Ok(AppConfig::default());
    }
    Ok(AppConfig::load(path)?)
}

fn check_flow(file: &Path) -> anyhow::Result<()> {
    let def = FlowDefinition::load(file)?;
    let flow = def.placeholder_flow()?;
    let order = flow.topological_order()?;

    println!("Flow '{}' ({} tasks)", flow.name, flow.len());
    for (i, task) in order.iter().enumerate() {
        let deps = flow.dependencies(&task.name);
        if deps.is_empty() {
            println!("  {}. {}", i + 1, task.name);
        } else {
            println!("  {}. {} (after {})", i + 1, task.name, deps.join(", "));
        }
    }
    Ok(())
}

async fn run_flow(engine: &Engine, file: &Path, workflow_id: Option<String>) -> anyhow::Result<()> {
    let def = FlowDefinition::load(file)?;
    let mut flow = def.placeholder_flow()?;
    let workflow_id = workflow_id.map(WorkflowId::from).unwrap_or_default();

    // Subscribe to events for progress output
    let mut events = engine.event_bus.subscribe_workflow(workflow_id.clone());
    let print_handle = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            print_event(&event);
        }
    });

    let context = engine
        .orchestrator
        .execute(&mut flow, def.context(), Some(workflow_id.clone()))
        .await;
    print_handle.await.ok();

    println!("{}", serde_json::to_string_pretty(context.outputs())?);

    let state = engine
        .orchestrator
        .state_manager()
        .get_workflow_state(workflow_id.as_str())?;
    match state.status {
        Status::Completed => Ok(()),
        status => anyhow::bail!(
            "workflow {} ended {}: {}",
            workflow_id,
            status,
            state.error.unwrap_or_default()
        ),
    }
}

fn print_event(event: &WorkflowEvent) {
    match event {
        WorkflowEvent::WorkflowStarted { workflow_id, name } => {
            eprintln!("[flow: {}] started ({})", name, workflow_id);
        }
        WorkflowEvent::TaskStarted { task, .. } => {
            eprintln!("[{}] running", task);
        }
        WorkflowEvent::TaskCompleted { task, elapsed_ms, .. } => {
            eprintln!("[{}: ok] {}ms", task, elapsed_ms);
        }
        WorkflowEvent::TaskFailed { task, error, .. } => {
            eprintln!("[{}: ERROR] {}", task, error);
        }
        WorkflowEvent::TasksInjected { source, tasks, .. } => {
            eprintln!("[{}] injected {}", source, tasks.join(", "));
        }
        WorkflowEvent::WorkflowCompleted { .. } => {
            eprintln!("[flow] completed");
        }
        WorkflowEvent::WorkflowFailed { error, .. } => {
            eprintln!("[flow] failed: {}", error);
        }
    }
}
