use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use conduit_engine::{EngineConfig, ExecutionJournal, RunRequest, WorkflowExecutor, parse_workflow_file, plan, validate_workflow};
use conduit_types::{CredentialMap, ExecutionStatus, StepStatus, Workflow};
use conduit_util::interpolate_credentials;
use serde_json::{Map, Value, json};
use tokio::io::AsyncReadExt;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Validate, plan and run conduit workflows.
#[derive(Debug, Parser)]
#[command(name = "conduit", version)]
struct Cli {
    /// Engine config file; defaults to $CONDUIT_CONFIG_PATH or the user config dir.
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Check a workflow definition and list every problem found.
    Validate { workflow: PathBuf },
    /// Print the order in which steps would run.
    Plan { workflow: PathBuf },
    /// Execute a workflow and print the execution record.
    Run(RunArgs),
    /// Execute a single step with test data.
    TestStep(TestStepArgs),
}

#[derive(Debug, Args)]
struct RunArgs {
    workflow: PathBuf,
    /// Trigger payload as JSON or YAML; `-` reads stdin.
    #[arg(long, value_name = "FILE")]
    trigger: Option<String>,
    /// Per-service credentials; values may use `${env:NAME}`.
    #[arg(long, value_name = "FILE")]
    credentials: Option<PathBuf>,
    /// Values exposed to templates under `variables`.
    #[arg(long, value_name = "FILE")]
    variables: Option<PathBuf>,
    /// Include the execution journal in the output.
    #[arg(long)]
    journal: bool,
}

#[derive(Debug, Args)]
struct TestStepArgs {
    workflow: PathBuf,
    step_id: String,
    /// Test data made available as `trigger.data`; `-` reads stdin.
    #[arg(long, value_name = "FILE")]
    data: Option<String>,
    #[arg(long, value_name = "FILE")]
    credentials: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Validate { workflow } => validate_command(&workflow),
        Command::Plan { workflow } => plan_command(&workflow),
        Command::Run(args) => run_command(cli.config.as_deref(), args).await,
        Command::TestStep(args) => test_step_command(cli.config.as_deref(), args).await,
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn validate_command(path: &Path) -> Result<ExitCode> {
    let workflow = parse_workflow_file(path)?;
    let errors = validate_workflow(&workflow);
    let report = json!({
        "workflow_id": workflow.id,
        "valid": errors.is_empty(),
        "errors": errors.iter().map(ToString::to_string).collect::<Vec<_>>(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(if errors.is_empty() { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

fn plan_command(path: &Path) -> Result<ExitCode> {
    let workflow = parse_workflow_file(path)?;
    let ordered = plan(&workflow.steps)?;
    let steps: Vec<Value> = ordered
        .iter()
        .map(|step| {
            json!({
                "id": step.id,
                "service": step.service,
                "action": step.action,
                "depends_on": step.depends_on,
            })
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&steps)?);
    Ok(ExitCode::SUCCESS)
}

async fn run_command(config_path: Option<&Path>, args: RunArgs) -> Result<ExitCode> {
    let workflow = load_valid_workflow(&args.workflow)?;
    let journal = Arc::new(ExecutionJournal::new());
    let mut executor = build_executor(config_path)?;
    if args.journal {
        executor = executor.with_hooks(journal.clone());
    }

    let trigger_data = match args.trigger.as_deref() {
        Some(source) => read_document(source).await?,
        None => json!({}),
    };
    let credentials = match args.credentials.as_deref() {
        Some(path) => read_credentials(path).await?,
        None => CredentialMap::new(),
    };
    let variables = match args.variables.as_deref() {
        Some(path) => read_variables(path).await?,
        None => Map::new(),
    };

    let request = RunRequest::new(trigger_data)
        .with_credentials(credentials)
        .with_variables(variables);
    let execution = executor.execute_with(&workflow, request).await;
    info!(
        execution_id = %execution.execution_id,
        status = ?execution.status,
        failed_steps = execution.step_count_by_status(StepStatus::Error),
        "run finished"
    );

    let output = if args.journal {
        json!({"execution": execution, "journal": journal.entries(&execution.execution_id)})
    } else {
        serde_json::to_value(&execution)?
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(match execution.status {
        ExecutionStatus::Completed => ExitCode::SUCCESS,
        _ => ExitCode::FAILURE,
    })
}

async fn test_step_command(config_path: Option<&Path>, args: TestStepArgs) -> Result<ExitCode> {
    let workflow = parse_workflow_file(&args.workflow)?;
    let executor = build_executor(config_path)?;
    let test_data = match args.data.as_deref() {
        Some(source) => read_document(source).await?,
        None => json!({}),
    };
    let credentials = match args.credentials.as_deref() {
        Some(path) => read_credentials(path).await?,
        None => CredentialMap::new(),
    };

    let record = executor
        .execute_step_isolated(&workflow, &args.step_id, test_data, credentials)
        .await;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(if record.is_error() { ExitCode::FAILURE } else { ExitCode::SUCCESS })
}

fn load_valid_workflow(path: &Path) -> Result<Workflow> {
    let workflow = parse_workflow_file(path)?;
    conduit_engine::ensure_valid(&workflow).with_context(|| format!("Refusing to run {}", path.display()))?;
    Ok(workflow)
}

fn build_executor(config_path: Option<&Path>) -> Result<WorkflowExecutor> {
    let config = match config_path {
        Some(path) => EngineConfig::load_from(path)?,
        None => EngineConfig::load()?,
    };
    debug!(?config, "engine config");
    config.build_executor().context("Failed to build executor")
}

/// Reads a JSON or YAML document from a file, or from stdin when `source` is `-`.
async fn read_document(source: &str) -> Result<Value> {
    if source == "-" {
        let mut content = String::new();
        tokio::io::stdin()
            .read_to_string(&mut content)
            .await
            .context("Failed to read stdin")?;
        return parse_document(&content, None);
    }
    let path = Path::new(source);
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    parse_document(&content, Some(path)).with_context(|| format!("Invalid document: {}", path.display()))
}

fn parse_document(content: &str, path: Option<&Path>) -> Result<Value> {
    let is_yaml = path
        .and_then(Path::extension)
        .and_then(|extension| extension.to_str())
        .is_some_and(|extension| matches!(extension, "yaml" | "yml"));
    if is_yaml {
        return Ok(serde_yaml::from_str(content)?);
    }
    match serde_json::from_str(content) {
        Ok(value) => Ok(value),
        Err(json_error) => serde_yaml::from_str(content).map_err(|_| json_error.into()),
    }
}

async fn read_credentials(path: &Path) -> Result<CredentialMap> {
    let document = read_document(&path.to_string_lossy()).await?;
    let credentials: CredentialMap =
        serde_json::from_value(document).with_context(|| format!("{} must map services to string fields", path.display()))?;
    Ok(interpolate_credentials(&credentials)?)
}

async fn read_variables(path: &Path) -> Result<Map<String, Value>> {
    match read_document(&path.to_string_lossy()).await? {
        Value::Object(variables) => Ok(variables),
        _ => bail!("{} must contain an object", path.display()),
    }
}
