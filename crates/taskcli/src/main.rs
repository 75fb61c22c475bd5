use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use taskcore::{ExecutionEvent, PipelineSpec, StepSpec, TaskStatus, Value, WorkflowStatus};
use taskruntime::{RuntimeConfig, StepRegistry, TaskRuntime};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "taskflow")]
#[command(about = "Task executor and workflow runner", long_about = None)]
struct Cli {
    /// Show debug logs
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a pipeline as a recorded workflow, once per input
    Run {
        /// Path to pipeline JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Workflow input; JSON, or taken as a plain string when it does not parse
        #[arg(short, long = "input", required = true)]
        inputs: Vec<String>,
    },

    /// Submit inputs as tasks to the bounded executor and wait for all of them
    Submit {
        #[arg(short, long)]
        file: PathBuf,

        #[arg(short, long = "input", required = true)]
        inputs: Vec<String>,

        /// Override the concurrency bound
        #[arg(short, long)]
        max_concurrent: Option<usize>,
    },

    /// Validate a pipeline file against the available step types
    Validate {
        /// Path to pipeline JSON file
        #[arg(short, long)]
        file: PathBuf,
    },

    /// List available step types
    Steps,

    /// Create an example pipeline
    Init {
        /// Output file path
        #[arg(short, long, default_value = "pipeline.json")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Run { file, inputs } => run_workflows(&file, inputs).await?,
        Commands::Submit {
            file,
            inputs,
            max_concurrent,
        } => submit_tasks(&file, inputs, max_concurrent).await?,
        Commands::Validate { file } => validate_pipeline(&file)?,
        Commands::Steps => list_steps(),
        Commands::Init { output } => create_example_pipeline(&output)?,
    }

    Ok(())
}

fn registry() -> Arc<StepRegistry> {
    Arc::new(tasksteps::standard_registry())
}

fn load_pipeline(file: &Path) -> Result<PipelineSpec> {
    PipelineSpec::from_file(file).with_context(|| format!("loading pipeline {}", file.display()))
}

/// JSON when it parses, otherwise the raw string (e.g. a bare URL)
fn parse_input(raw: &str) -> Value {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(json) => Value::from_plain_json(json),
        Err(_) => Value::from(raw),
    }
}

fn print_events(mut events: broadcast::Receiver<ExecutionEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    println!("  (skipped {} events)", n);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };
            match event {
                ExecutionEvent::TaskSubmitted { task_id, .. } => {
                    println!("  📥 Task {} queued", task_id);
                }
                ExecutionEvent::TaskStarted { task_id, .. } => {
                    println!("  ⚡ Task {} started", task_id);
                }
                ExecutionEvent::TaskCompleted {
                    task_id,
                    duration_ms,
                    ..
                } => {
                    println!("  ✅ Task {} completed in {}ms", task_id, duration_ms);
                }
                ExecutionEvent::TaskFailed { task_id, error, .. } => {
                    println!("  ❌ Task {} failed: {}", task_id, error);
                }
                ExecutionEvent::WorkflowStarted {
                    workflow_id, name, ..
                } => {
                    println!("▶️  Workflow {} ({}) started", workflow_id, name);
                }
                ExecutionEvent::StepCompleted {
                    step, duration_ms, ..
                } => {
                    println!("  ✅ Step {} completed in {}ms", step, duration_ms);
                }
                ExecutionEvent::StepFailed { step, error, .. } => {
                    println!("  ❌ Step {} failed: {}", step, error);
                }
                ExecutionEvent::WorkflowCompleted {
                    success,
                    duration_ms,
                    ..
                } => {
                    if success {
                        println!("✨ Workflow completed in {}ms", duration_ms);
                    } else {
                        println!("💥 Workflow failed after {}ms", duration_ms);
                    }
                }
            }
        }
    })
}

async fn finish_printing(printer: JoinHandle<()>) {
    tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    printer.abort();
}

async fn run_workflows(file: &Path, inputs: Vec<String>) -> Result<()> {
    println!("🚀 Loading pipeline from: {}", file.display());
    let spec = load_pipeline(file)?;
    println!("📋 Pipeline: {} ({} steps)", spec.name, spec.steps.len());
    println!();

    let runtime = TaskRuntime::new(registry(), &spec, RuntimeConfig::from_env()?)?;
    let printer = print_events(runtime.subscribe_events());

    let inputs: Vec<Value> = inputs.iter().map(|raw| parse_input(raw)).collect();
    let ids = runtime.run_batch(inputs).await;
    finish_printing(printer).await;

    println!();
    println!("📊 Summary:");
    let mut failed = 0;
    for id in &ids {
        let workflow = runtime.orchestrator().get_workflow(*id).await?;
        match workflow.status {
            WorkflowStatus::Completed => {
                println!("   ✅ {} ({} steps)", id, workflow.steps.len());
                for step in &workflow.steps {
                    if let Some(result) = step.result() {
                        println!("      {}: {}", step.name, result.to_plain_json());
                    }
                }
            }
            _ => {
                failed += 1;
                println!(
                    "   ❌ {}: {}",
                    id,
                    workflow.error.as_deref().unwrap_or("unknown error")
                );
            }
        }
    }
    println!(
        "   {}/{} workflows completed",
        ids.len() - failed,
        ids.len()
    );

    Ok(())
}

async fn submit_tasks(file: &Path, inputs: Vec<String>, max_concurrent: Option<usize>) -> Result<()> {
    let spec = load_pipeline(file)?;
    let mut config = RuntimeConfig::from_env()?;
    if let Some(n) = max_concurrent {
        config.max_concurrent_tasks = n;
    }

    let runtime = TaskRuntime::new(registry(), &spec, config)?;
    println!(
        "🚀 Submitting {} tasks to '{}' (max {} at once)",
        inputs.len(),
        spec.name,
        runtime.config().max_concurrent_tasks
    );
    let printer = print_events(runtime.subscribe_events());
    runtime.start().await;

    let ids = runtime
        .submit_batch(inputs.iter().map(|raw| parse_input(raw)).collect())
        .await;
    let tasks = runtime.executor().wait_all(&ids).await;
    runtime.shutdown().await;
    finish_printing(printer).await;

    println!();
    println!("📊 Summary:");
    let mut completed = 0;
    for task in tasks {
        let task = task?;
        match task.status {
            TaskStatus::Completed => {
                completed += 1;
                let result = task.result.map(|r| r.to_plain_json()).unwrap_or_default();
                println!("   ✅ {}: {}", task.id, result);
            }
            _ => println!(
                "   ❌ {}: {}",
                task.id,
                task.error.as_deref().unwrap_or("unknown error")
            ),
        }
    }
    println!("   {}/{} tasks completed", completed, ids.len());

    Ok(())
}

fn validate_pipeline(file: &Path) -> Result<()> {
    println!("🔍 Validating pipeline: {}", file.display());

    let spec = load_pipeline(file)?;
    let pipeline = registry().build_pipeline(&spec)?;

    println!("✅ Pipeline is valid:");
    println!("   Name: {}", pipeline.name());
    if let Some(description) = &spec.description {
        println!("   Description: {}", description);
    }
    for (index, step) in spec.steps.iter().enumerate() {
        println!("   {}. {} ({})", index + 1, step.name, step.step_type);
    }

    Ok(())
}

fn list_steps() {
    println!("📦 Available Step Types:");
    println!();

    let registry = registry();
    for step_type in registry.list_step_types() {
        if let Some(metadata) = registry.get_metadata(&step_type) {
            println!("  • {} ({})", step_type, metadata.category);
            println!("    {}", metadata.description);
        } else {
            println!("  • {}", step_type);
        }
    }
}

fn example_pipeline() -> PipelineSpec {
    PipelineSpec::new("video-analysis")
        .with_description("Resolves a video link, logs the id and renders a report")
        .with_step(StepSpec::new("video_id", "source.video_id"))
        .with_step(
            StepSpec::new("log", "debug.log")
                .with_config("from", "video_id")
                .with_config("label", "video id"),
        )
        .with_step(StepSpec::new("pause", "time.delay").with_config("delay_ms", 250i64))
        .with_step(
            StepSpec::new("report", "transform.json_stringify")
                .with_config("from", "video_id")
                .with_config("pretty", false),
        )
}

fn create_example_pipeline(output: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(&example_pipeline())?;
    std::fs::write(output, json)?;

    println!("✨ Created example pipeline: {}", output.display());
    println!();
    println!("Run it with:");
    println!(
        "  taskflow run --file {} --input https://youtu.be/dQw4w9WgXcQ",
        output.display()
    );

    Ok(())
}
