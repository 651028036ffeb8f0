use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use provcore::memory::{Fixture, InMemoryProvider};
use provcore::{ExecutionEvent, Providers, StepEvent};
use provruntime::{LinkOutcome, Runtime, RuntimeConfig, Workflow};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "provflow")]
#[command(about = "Provisioning workflow CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Populate a chained workflow (or a single workflow) and print it
    Print {
        /// Path to the chain or workflow JSON file
        file: PathBuf,

        /// Treat FILE as a single workflow instead of a chain
        #[arg(short, long)]
        workflow: bool,

        /// Resources seeded into the in-memory provider
        #[arg(long)]
        fixture: Option<PathBuf>,
    },

    /// Run a chained workflow (or a single workflow) against the in-memory provider
    Simulate {
        /// Path to the chain or workflow JSON file
        file: PathBuf,

        /// Treat FILE as a single workflow instead of a chain
        #[arg(short, long)]
        workflow: bool,

        /// Resources seeded into the in-memory provider
        #[arg(long)]
        fixture: Option<PathBuf>,

        /// Workflow variable as KEY=VALUE, single workflows only
        #[arg(long = "var", value_name = "KEY=VALUE")]
        vars: Vec<String>,

        /// Keep created resources after the run
        #[arg(long)]
        no_cleanup: bool,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Print {
            file,
            workflow,
            fixture,
        } => {
            init_logging(false);
            let runtime = create_runtime(fixture.as_deref(), RuntimeConfig::default())?;
            let printed = if workflow {
                runtime.load_workflow(&file)?.print().await?
            } else {
                let (mut chain, loader) = runtime.load_chain(&file)?;
                chain.print(&loader).await?
            };
            println!("{}", printed);
        }

        Commands::Simulate {
            file,
            workflow,
            fixture,
            vars,
            no_cleanup,
            verbose,
        } => {
            init_logging(verbose);
            let config = RuntimeConfig {
                cleanup: !no_cleanup,
                ..Default::default()
            };
            let runtime = create_runtime(fixture.as_deref(), config)?;
            let event_task = spawn_event_printer(&runtime);

            let result = if workflow {
                let mut workflow = runtime.load_workflow(&file)?;
                for var in &vars {
                    let (key, value) = var
                        .split_once('=')
                        .with_context(|| format!("bad --var {:?}, expected KEY=VALUE", var))?;
                    workflow.add_var(key, value);
                }
                simulate_workflow(workflow).await
            } else {
                if !vars.is_empty() {
                    anyhow::bail!("--var applies to single workflows; set chain variables on the links");
                }
                simulate_chain(&runtime, &file).await
            };

            // Wait for events to finish printing
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            event_task.abort();
            result?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn create_runtime(fixture: Option<&Path>, config: RuntimeConfig) -> Result<Runtime> {
    let fixture = match fixture {
        Some(path) => {
            let data = std::fs::read_to_string(path)
                .with_context(|| format!("reading fixture {}", path.display()))?;
            serde_json::from_str::<Fixture>(&data)
                .with_context(|| format!("parsing fixture {}", path.display()))?
        }
        None => Fixture::default(),
    };
    let provider = Arc::new(InMemoryProvider::from_fixture(fixture));
    let providers = Providers::new(provider.clone()).with_patch(provider);
    Ok(Runtime::with_config(providers, config))
}

fn spawn_event_printer(runtime: &Runtime) -> tokio::task::JoinHandle<()> {
    let mut events = runtime.subscribe_events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ExecutionEvent::WorkflowStarted { workflow, .. } => {
                    println!("▶️  Workflow {} started", workflow);
                }
                ExecutionEvent::StepStarted { step, step_type, .. } => {
                    println!("  ⚡ Starting step: {} ({})", step, step_type);
                }
                ExecutionEvent::StepCompleted { step, duration_ms, .. } => {
                    println!("  ✅ Step {} completed in {}ms", step, duration_ms);
                }
                ExecutionEvent::StepFailed { step, error, .. } => {
                    println!("  ❌ Step {} failed: {}", step, error);
                }
                ExecutionEvent::StepEvent { step, event, .. } => match event {
                    StepEvent::Info { message, .. } => println!("     ℹ️  [{}] {}", step, message),
                    StepEvent::Warning { message, .. } => println!("     ⚠️  [{}] {}", step, message),
                },
                ExecutionEvent::WorkflowCompleted {
                    workflow,
                    success,
                    duration_ms,
                    ..
                } => {
                    if success {
                        println!("✨ Workflow {} completed successfully in {}ms", workflow, duration_ms);
                    } else {
                        println!("💥 Workflow {} failed after {}ms", workflow, duration_ms);
                    }
                }
                ExecutionEvent::LinkStarted { chain, link, .. } => {
                    println!("🔗 [{}] running link {}", chain, link);
                }
                ExecutionEvent::LinkCompleted { .. } => {}
            }
        }
    })
}

async fn simulate_workflow(mut workflow: Workflow) -> Result<()> {
    cancel_on_ctrl_c(workflow.cancellation().clone());
    let summary = workflow.run().await?;

    println!();
    println!("📊 Execution Summary:");
    println!("   Execution ID: {}", summary.execution_id);
    println!("   Completed steps: {}", summary.completed.join(", "));
    if summary.cancelled {
        println!("   Cancelled");
    }
    Ok(())
}

async fn simulate_chain(runtime: &Runtime, file: &Path) -> Result<()> {
    let (mut chain, loader) = runtime.load_chain(file)?;
    cancel_on_ctrl_c(chain.cancellation().clone());

    let report = chain.run(&loader).await?;

    println!();
    println!("📊 Chain Summary: {}", report.chain);
    for run in &report.visited {
        match &run.outcome {
            LinkOutcome::Succeeded => println!("   {}: succeeded", run.link),
            LinkOutcome::Failed { error } => println!("   {}: failed ({})", run.link, error),
        }
    }
    Ok(())
}

fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling");
            token.cancel();
        }
    });
}
