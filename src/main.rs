//! Hensu CLI entry point.
//!
//! Thin operational shell over the execution service: validate and run
//! workflow files, inspect execution status, list executions parked for
//! review. Agent invocations in `run` use the echo agent unless an
//! embedding application registers real providers.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Table};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

use hensu::adapters::agents::EchoAgent;
use hensu::adapters::sqlite::{initialize_database, SqliteStateRepository, SqliteWorkflowRepository};
use hensu::adapters::memory::InMemoryRubricRepository;
use hensu::domain::models::Workflow;
use hensu::infrastructure::config::ConfigLoader;
use hensu::infrastructure::logging;
use hensu::services::{ActionDispatcher, EventPayload, ExecutionService};

#[derive(Parser)]
#[command(name = "hensu", about = "Workflow orchestration engine for AI agent pipelines")]
struct Cli {
    /// Tenant the command operates on.
    #[arg(long, global = true, default_value = "default")]
    tenant: String,

    /// Alternative configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a workflow file for referential integrity.
    Validate {
        /// Path to a compiled workflow JSON file.
        file: PathBuf,
    },
    /// Execute a workflow file and stream its events.
    Run {
        /// Path to a compiled workflow JSON file.
        file: PathBuf,
        /// Initial context as a JSON object.
        #[arg(long)]
        context: Option<String>,
    },
    /// Show the latest snapshot of an execution.
    Status {
        execution_id: Uuid,
    },
    /// List executions parked for review.
    Paused,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ConfigLoader::load_from_file(path)?,
        None => ConfigLoader::load().context("Failed to load configuration")?,
    };
    logging::init(&config.logging)?;

    // Validation needs no database.
    if let Commands::Validate { file } = &cli.command {
        let workflow = read_workflow(file)?;
        workflow.validate()?;
        println!("{}: ok ({} nodes)", workflow.id, workflow.nodes.len());
        return Ok(());
    }

    let database_url = format!("sqlite:{}", config.database.path);
    let pool = initialize_database(&database_url)
        .await
        .context("Failed to open database")?;

    let service = ExecutionService::new(
        config,
        Arc::new(SqliteWorkflowRepository::new(pool.clone())),
        Arc::new(SqliteStateRepository::new(pool)),
        Arc::new(InMemoryRubricRepository::new()),
        None,
        None,
        Arc::new(ActionDispatcher::local()),
        true,
    );

    match cli.command {
        Commands::Validate { .. } => unreachable!("handled above"),
        Commands::Run { file, context } => run(&service, &cli.tenant, &file, context).await,
        Commands::Status { execution_id } => status(&service, &cli.tenant, execution_id).await,
        Commands::Paused => paused(&service, &cli.tenant).await,
    }
}

async fn run(
    service: &Arc<ExecutionService>,
    tenant: &str,
    file: &PathBuf,
    context: Option<String>,
) -> Result<()> {
    let workflow = read_workflow(file)?;
    let initial_context: HashMap<String, serde_json::Value> = match context {
        Some(raw) => serde_json::from_str(&raw).context("--context must be a JSON object")?,
        None => HashMap::new(),
    };

    service.agents().set_default(Arc::new(EchoAgent)).await;

    // Subscribe before starting so no event is missed. The execution id is
    // only known after start, so pre-register through a fresh id.
    let execution_id = Uuid::new_v4();
    let mut events = service.subscribe_events(execution_id);
    let started = service
        .start_execution_with_id(tenant, workflow, initial_context, execution_id)
        .await?;

    println!("execution: {}", started);
    while let Ok(event) = events.recv().await {
        match &event.payload {
            EventPayload::NodeStarted { node_id } => println!("  → {}", node_id),
            EventPayload::NodeCompleted { node_id, outcome } => {
                println!("  ← {} ({})", node_id, outcome);
            }
            EventPayload::Backtrack { from, to, reason } => {
                println!("  ↩ {} → {} ({})", from, to, reason);
            }
            EventPayload::ExecutionCompleted { success, output, .. } => {
                println!("done: success={}", success);
                if !output.is_empty() {
                    println!("{}", serde_json::to_string_pretty(output)?);
                }
                break;
            }
            _ => {}
        }
    }
    Ok(())
}

async fn status(service: &Arc<ExecutionService>, tenant: &str, execution_id: Uuid) -> Result<()> {
    let view = service.get_status(tenant, execution_id).await?;
    println!("execution:  {}", view.snapshot.execution_id);
    println!("workflow:   {}", view.snapshot.workflow_id);
    println!("status:     {:?}", view.status);
    println!("node:       {}", view.snapshot.current_node_id.as_deref().unwrap_or("-"));
    println!("steps:      {}", view.snapshot.state.step_count());
    println!("checkpoint: {}", view.snapshot.checkpoint_time.to_rfc3339());
    Ok(())
}

async fn paused(service: &Arc<ExecutionService>, tenant: &str) -> Result<()> {
    let snapshots = service.list_paused(tenant).await?;
    if snapshots.is_empty() {
        println!("No executions awaiting review.");
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Execution", "Workflow", "Node", "Pending", "Since"]);
    for snapshot in &snapshots {
        table.add_row(vec![
            snapshot.execution_id.to_string(),
            snapshot.workflow_id.clone(),
            snapshot.current_node_id.clone().unwrap_or_default(),
            ExecutionService::pending_review_node(snapshot).unwrap_or_default(),
            snapshot.checkpoint_time.to_rfc3339(),
        ]);
    }
    println!("{}", table);
    Ok(())
}

fn read_workflow(file: &PathBuf) -> Result<Workflow> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let is_yaml = file
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"));
    if is_yaml {
        serde_yaml::from_str(&raw)
            .with_context(|| format!("Invalid workflow YAML in {}", file.display()))
    } else {
        serde_json::from_str(&raw)
            .with_context(|| format!("Invalid workflow JSON in {}", file.display()))
    }
}
