//! conductord: hosts a Conductor engine with an in-process activity worker

use anyhow::Context;
use clap::Parser;
use conductor_engine::Conductor;
use conductor_types::{ExecutionId, ExecutionStatus};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;
mod demo;

use config::{DaemonConfig, LoggingConfig};

/// Conductor daemon
#[derive(Parser, Debug)]
#[command(name = "conductord")]
#[command(about = "Conductor orchestration daemon", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "CONDUCTOR_CONFIG")]
    config: Option<String>,

    /// Log level (overrides the configuration file)
    #[arg(long, env = "CONDUCTOR_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long)]
    json: bool,

    /// Number of onboarding executions to start
    #[arg(short, long)]
    executions: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config =
        DaemonConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    if cli.json {
        config.logging.json = true;
    }
    if let Some(executions) = cli.executions {
        config.demo.executions = executions;
    }

    init_tracing(&config.logging);

    info!(
        task_list = %config.worker.task_list,
        max_concurrent_deciders = config.engine.max_concurrent_deciders,
        "Starting conductord"
    );

    let conductor = Conductor::new(config.engine.clone());
    demo::register(&conductor, &config.worker.task_list)?;
    let worker = demo::worker(conductor.clone(), config.worker.clone()).start();

    let mut started = Vec::with_capacity(config.demo.executions);
    for n in 0..config.demo.executions {
        let input = json!({ "userId": format!("user-{n}") });
        started.push(conductor.start_execution(&demo::onboarding(), input)?);
    }

    tokio::select! {
        result = wait_all(&conductor, &started) => result?,
        _ = tokio::signal::ctrl_c() => warn!("Interrupted; shutting down"),
    }

    conductor.shutdown();
    worker.shutdown().await;
    info!("conductord stopped");
    Ok(())
}

async fn wait_all(conductor: &Arc<Conductor>, ids: &[ExecutionId]) -> anyhow::Result<()> {
    for id in ids {
        let execution = conductor.wait_for_close(id).await?;
        match execution.status {
            ExecutionStatus::Completed => info!(
                execution_id = %id,
                result = %execution.result.unwrap_or_default(),
                "Execution completed"
            ),
            status => error!(
                execution_id = %id,
                ?status,
                failure = execution.failure.as_deref().unwrap_or(""),
                "Execution did not complete"
            ),
        }
    }
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    if logging.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}
