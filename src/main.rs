use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use mbflow_engine::{
  ExecutionManager, ExecutorError, InMemoryRegistry, NodeContext, NodeExecutor, TracingSink,
};
use mbflow_store::{ExecutionStatus, MemoryStore};
use mbflow_workflow::Workflow;

/// MBFlow - a DAG workflow orchestrator
#[derive(Parser)]
#[command(name = "mbflow")]
#[command(version, about, long_about = None)]
struct Cli {
  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Validate a workflow file and print its wave plan
  Validate {
    /// Path to the workflow file (JSON)
    workflow_file: PathBuf,
  },

  /// Run a workflow file with the built-in executor set
  Run {
    /// Path to the workflow file (JSON)
    workflow_file: PathBuf,

    /// Execution input as a JSON document
    #[arg(long, default_value = "{}")]
    input: String,

    /// Per-run variable overrides as key=value (value parsed as JSON,
    /// falling back to a plain string)
    #[arg(long = "var")]
    vars: Vec<String>,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
    .init();

  let cli = Cli::parse();

  match cli.command {
    Commands::Validate { workflow_file } => validate(workflow_file).await,
    Commands::Run {
      workflow_file,
      input,
      vars,
    } => run(workflow_file, input, vars).await,
  }
}

async fn load_workflow(workflow_file: &PathBuf) -> Result<Workflow> {
  let content = tokio::fs::read_to_string(workflow_file)
    .await
    .with_context(|| format!("failed to read workflow file: {}", workflow_file.display()))?;

  serde_json::from_str(&content)
    .with_context(|| format!("failed to parse workflow file: {}", workflow_file.display()))
}

async fn validate(workflow_file: PathBuf) -> Result<()> {
  let workflow = load_workflow(&workflow_file).await?;
  let graph = workflow.graph().context("workflow failed validation")?;

  println!(
    "workflow '{}' is valid ({} nodes, {} edges)",
    workflow.name,
    workflow.nodes.len(),
    workflow.edges.len()
  );
  for (index, wave) in graph.waves().iter().enumerate() {
    println!("  wave {index}: {}", wave.join(", "));
  }
  if !graph.loop_edges().is_empty() {
    let edges: Vec<&str> = graph.loop_edges().iter().map(|e| e.id.as_str()).collect();
    println!("  loop edges: {}", edges.join(", "));
  }

  Ok(())
}

async fn run(workflow_file: PathBuf, input: String, vars: Vec<String>) -> Result<()> {
  let workflow = load_workflow(&workflow_file).await?;
  let workflow_id = workflow.id.clone();

  let input: serde_json::Value =
    serde_json::from_str(&input).context("--input must be valid JSON")?;
  let run_variables = parse_vars(&vars)?;

  let store = MemoryStore::new();
  store.put_workflow(workflow).await;

  let manager = ExecutionManager::new(Arc::new(store), builtin_registry())
    .with_sink(Arc::new(TracingSink));

  let record = manager
    .execute(&workflow_id, input, run_variables, CancellationToken::new())
    .await
    .context("workflow execution failed")?;

  eprintln!("execution {}: {:?}", record.execution_id, record.status);

  if record.status != ExecutionStatus::Completed {
    bail!(
      "execution failed: {}",
      record.error.unwrap_or_else(|| "unknown error".to_string())
    );
  }

  let output = record.output.unwrap_or(serde_json::Value::Null);
  println!("{}", serde_json::to_string_pretty(&output)?);
  Ok(())
}

fn parse_vars(vars: &[String]) -> Result<HashMap<String, serde_json::Value>> {
  let mut parsed = HashMap::new();
  for var in vars {
    let Some((key, value)) = var.split_once('=') else {
      bail!("--var must be key=value, got '{var}'");
    };
    let value = serde_json::from_str(value)
      .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
    parsed.insert(key.to_string(), value);
  }
  Ok(parsed)
}

/// The built-in executors available to `mbflow run`.
///
/// Real deployments register their own implementations; these cover local
/// testing of workflow structure, templates, and conditions.
fn builtin_registry() -> Arc<InMemoryRegistry> {
  let registry = InMemoryRegistry::new();
  registry.register("value", Arc::new(ValueExecutor));
  registry.register("passthrough", Arc::new(PassthroughExecutor));
  registry.register("fail", Arc::new(FailExecutor));
  Arc::new(registry)
}

/// Returns the resolved `config.value`.
struct ValueExecutor;

#[async_trait]
impl NodeExecutor for ValueExecutor {
  async fn execute(
    &self,
    _ctx: &NodeContext,
    config: &serde_json::Value,
    _input: &serde_json::Value,
  ) -> Result<serde_json::Value, ExecutorError> {
    Ok(config.get("value").cloned().unwrap_or(serde_json::Value::Null))
  }
}

/// Echoes its direct-parent input.
struct PassthroughExecutor;

#[async_trait]
impl NodeExecutor for PassthroughExecutor {
  async fn execute(
    &self,
    _ctx: &NodeContext,
    _config: &serde_json::Value,
    input: &serde_json::Value,
  ) -> Result<serde_json::Value, ExecutorError> {
    Ok(input.clone())
  }
}

/// Fails with `config.message`; useful for exercising retry policies.
struct FailExecutor;

#[async_trait]
impl NodeExecutor for FailExecutor {
  async fn execute(
    &self,
    _ctx: &NodeContext,
    config: &serde_json::Value,
    _input: &serde_json::Value,
  ) -> Result<serde_json::Value, ExecutorError> {
    let message = config
      .get("message")
      .and_then(serde_json::Value::as_str)
      .unwrap_or("boom");
    Err(ExecutorError::new(message))
  }
}
