//! Command-line driver for the orchestration engine: a thin config provider
//! and event sink kept to the edges of the kernel, exposing the Workflow
//! Executor's operations directly — `run` (full `wfauto`), `start`, `retry`,
//! and `checkpoints`.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use stagecraft_bus::{Bus, SharedBus};
use stagecraft_core::{StagecraftError, StagecraftResult};
use stagecraft_gate::GateEvaluator;
use stagecraft_invoker::{InvokerBackend, PlaceholderInvoker};
use stagecraft_orchestrator::{
    CheckpointManager, Event, EventEnvelope, EventSink, FileCheckpointStore, Orchestrator, StageStatus,
    WorkflowExecutor,
};
use stagecraft_registry::Registry;
use stagecraft_tracker::Tracker;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "stagecraft", about = "Multi-agent workflow orchestration engine")]
struct Cli {
    /// Path to the YAML registry config (skills, roles, workflow)
    #[arg(short, long, default_value = "stagecraft.yaml")]
    config: PathBuf,

    /// Directory holding this workflow's checkpoints
    #[arg(long, default_value = "./stagecraft-state")]
    state_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every startable stage to completion, resuming from the latest checkpoint if one exists
    Run {
        /// Overarching goal text passed to every stage's agent, overriding each stage's own name
        #[arg(long)]
        goal: Option<String>,
    },
    /// Start a single stage
    Start {
        stage: String,
        /// Role to run the stage as, overriding its declared or inferred role
        #[arg(long)]
        role: Option<String>,
    },
    /// Retry a blocked stage with the role it last used
    Retry { stage: String },
    /// List or restore checkpoints
    Checkpoints {
        #[command(subcommand)]
        action: CheckpointAction,
    },
}

#[derive(Subcommand)]
enum CheckpointAction {
    List,
    Restore { id: Uuid },
}

/// Prints each event as a single line, for a human watching a run from a
/// terminal rather than tailing structured logs.
struct StdoutEventSink;

impl EventSink for StdoutEventSink {
    fn emit(&self, envelope: EventEnvelope) {
        match envelope.event {
            Event::StageStarted { stage_id, role_id } => {
                println!("stage '{stage_id}' started (role: {})", role_id.as_deref().unwrap_or("inferred"));
            }
            Event::StageCompleted { stage_id } => println!("stage '{stage_id}' completed"),
            Event::StageBlocked { stage_id, findings } => {
                println!("stage '{stage_id}' blocked:");
                for f in findings {
                    println!("  - {f}");
                }
            }
            Event::TaskCreated { task_id, role_id } => println!("task '{task_id}' created (role: {role_id})"),
            Event::TaskCompleted { task_id } => println!("task '{task_id}' completed"),
            Event::SkillInvoked { skill_id, owner_id } => println!("  skill '{skill_id}' invoked by '{owner_id}'"),
            Event::SkillCompleted { skill_id, owner_id, success } => {
                println!("  skill '{skill_id}' finished for '{owner_id}' (success: {success})");
            }
            Event::CheckpointCreated { checkpoint_id, name } => {
                println!("checkpoint '{checkpoint_id}' saved ({})", name.as_deref().unwrap_or("unnamed"));
            }
            Event::GateFailed { stage_id, gate_id, message } => {
                println!("  gate '{gate_id}' on stage '{stage_id}' failed: {message}");
            }
            Event::AgentMessage { from_agent, to } => println!("  message from '{from_agent}' to '{to}'"),
        }
    }
}

#[tokio::main]
async fn main() -> StagecraftResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .json()
        .init();

    let cli = Cli::parse();
    let config = config::load_registry_config(&cli.config).await?;
    let registry = Registry::load(config)?;
    let tracker = Tracker::new();
    let bus: SharedBus = Arc::new(Bus::new());
    let backend: Arc<dyn InvokerBackend> = Arc::new(PlaceholderInvoker);
    let gate = GateEvaluator::new();

    let workflow_id = registry.workflow().id.clone();
    let orchestrator = Orchestrator::new(workflow_id.clone(), &registry, &tracker, bus, backend, gate)
        .with_sink(Arc::new(StdoutEventSink));

    let store = Box::new(FileCheckpointStore::new(&cli.state_dir)?);
    let checkpoints = CheckpointManager::new(workflow_id.clone(), store);
    let executor = WorkflowExecutor::new(workflow_id, &registry, orchestrator, checkpoints).with_sink(Arc::new(StdoutEventSink));

    restore_latest(&executor).await?;

    match cli.command {
        Commands::Run { goal } => {
            let transitions = executor.wfauto(goal.as_deref()).await?;
            info!(count = transitions.len(), "run finished");
            if transitions.iter().any(|t| t.status != StageStatus::Completed) {
                return Err(StagecraftError::Execution("one or more stages did not complete".into()));
            }
        }
        Commands::Start { stage, role } => {
            executor.start(&stage, role.as_deref()).await?;
        }
        Commands::Retry { stage } => {
            executor.retry(&stage).await?;
        }
        Commands::Checkpoints { action } => match action {
            CheckpointAction::List => {
                for descriptor in executor.checkpoints().list().await? {
                    println!(
                        "{}  {}  {}",
                        descriptor.id,
                        descriptor.created_at,
                        descriptor.name.as_deref().unwrap_or("-")
                    );
                }
            }
            CheckpointAction::Restore { id } => {
                executor.restore(id).await?;
                println!("restored checkpoint '{id}'");
            }
        },
    }

    Ok(())
}

/// Resumes from the newest checkpoint in `--state-dir`, if any, so a CLI
/// invocation picks up where the previous one left off instead of always
/// starting a workflow from scratch. [`CheckpointManager::list`] returns
/// descriptors newest-first, so the first entry is the one to resume from.
async fn restore_latest(executor: &WorkflowExecutor<'_>) -> StagecraftResult<()> {
    let mut descriptors = executor.checkpoints().list().await?;
    if let Some(latest) = descriptors.drain(..).next() {
        executor.restore(latest.id).await?;
        info!(checkpoint = %latest.id, "resumed from checkpoint");
    }
    Ok(())
}
