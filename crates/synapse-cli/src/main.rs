//! `synapse` - demo driver for the orchestration core.
//!
//! - `synapse demo` submits a batch of typed tasks, waits for them and prints
//!   their final status as JSON
//! - `synapse config` prints the configuration resolved from `SYNAPSE_*`
//!   environment variables

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tracing::info;

use synapse_core::impls::MemoryBank;
use synapse_core::typed::{Handler, HandlerContext, TaskKind};
use synapse_core::{
    ExecutionError, OrchestratorBuilder, OrchestratorConfig, OrchestratorError, Priority, TaskId,
};

#[derive(Parser)]
#[command(name = "synapse")]
#[command(version, about = "AI agent task orchestration core", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a batch of demo tasks end to end
    Demo {
        /// Worker count (overrides SYNAPSE_WORKERS)
        #[arg(long)]
        workers: Option<usize>,

        /// Number of tasks to submit
        #[arg(long, default_value_t = 8)]
        tasks: usize,

        /// Every K-th task fails once and is retried (0 disables)
        #[arg(long, default_value_t = 3)]
        fail_every: usize,

        /// How long each task works, in milliseconds
        #[arg(long, default_value_t = 50)]
        work_ms: u64,
    },
    /// Print the configuration resolved from the environment
    Config,
}

#[derive(Debug, Serialize, Deserialize)]
struct Summarize {
    index: usize,
    text: String,
}

impl TaskKind for Summarize {
    const TYPE: &'static str = "demo.text.summarize.v1";
    type Output = String;
}

struct SummarizeHandler {
    fail_every: usize,
    work: Duration,
}

#[async_trait]
impl Handler<Summarize> for SummarizeHandler {
    async fn handle(&self, task: Summarize, ctx: HandlerContext) -> Result<String, ExecutionError> {
        tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(ExecutionError::cancelled()),
            _ = tokio::time::sleep(self.work) => {}
        }

        if self.fail_every > 0 && task.index % self.fail_every == 0 && ctx.attempt() == 1 {
            return Err(ExecutionError::retryable(format!(
                "task #{} flaked on its first attempt",
                task.index
            )));
        }

        let words = task.text.split_whitespace().count();
        Ok(format!(
            "{words} words, {} related memories",
            ctx.recalled().len()
        ))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Demo {
            workers,
            tasks,
            fail_every,
            work_ms,
        } => run_demo(workers, tasks, fail_every, Duration::from_millis(work_ms)).await,
        Command::Config => {
            let config = OrchestratorConfig::from_env()?;
            config.validate()?;
            println!("{config:#?}");
            Ok(())
        }
    }
}

async fn run_demo(
    workers: Option<usize>,
    tasks: usize,
    fail_every: usize,
    work: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = OrchestratorConfig::from_env()?;
    if let Some(workers) = workers {
        config.worker_count = workers;
    }
    let drain_timeout = config.drain_timeout;
    let await_timeout = config.drain_timeout;

    let bank = MemoryBank::new();
    let orchestrator = OrchestratorBuilder::new()
        .config(config)
        .recall_store(Arc::new(bank.clone()))
        .result_recorder(Arc::new(bank.clone()))
        .register::<Summarize, _>(SummarizeHandler { fail_every, work })?
        .expect_task_types(&[Summarize::TYPE])
        .build()?;

    let priorities = [Priority::Low, Priority::Normal, Priority::High, Priority::Critical];
    let mut ids: Vec<TaskId> = Vec::with_capacity(tasks);
    for index in 0..tasks {
        let payload = serde_json::to_value(Summarize {
            index,
            text: format!("agent note {index} about the orchestration core"),
        })?;
        let mut metadata = BTreeMap::new();
        metadata.insert("task_type".to_string(), serde_json::json!(Summarize::TYPE));

        match orchestrator.submit(payload, priorities[index % priorities.len()], metadata) {
            Ok(id) => ids.push(id),
            Err(OrchestratorError::CapacityExceeded { capacity }) => {
                tracing::warn!(index, capacity, "queue full, task dropped");
            }
            Err(err) => return Err(err.into()),
        }
    }
    info!(submitted = ids.len(), "demo tasks submitted");

    let wait_all = async {
        for id in &ids {
            if let Err(err) = orchestrator.await_result(*id, await_timeout).await {
                tracing::warn!(task_id = %id, error = %err, "task did not succeed");
            }
        }
    };
    tokio::select! {
        _ = wait_all => {}
        _ = tokio::signal::ctrl_c() => info!("interrupted, shutting down"),
    }

    for id in &ids {
        let status = orchestrator.status(*id)?;
        println!("{}", serde_json::to_string_pretty(&status)?);
    }
    println!("{}", serde_json::to_string_pretty(&orchestrator.stats())?);

    orchestrator.shutdown(drain_timeout).await?;
    info!(memories = bank.len(), "demo finished");
    Ok(())
}
