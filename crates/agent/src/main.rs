//! Workload Agent - adaptive workload control loop
//!
//! Runs the task executor, system monitor and performance optimizer on
//! this host and exposes their health, metrics and status over HTTP.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use workload_agent::{api, config::AgentConfig};
use workload_lib::{
    monitor::{ProcfsProbe, ResourceProbe},
    observability::{ControlMetrics, StructuredLogger},
    WorkloadController,
};

#[derive(Debug, Parser)]
#[command(name = "workload-agent", version, about = "Adaptive workload control agent")]
struct Args {
    /// Optional configuration file (toml, yaml or json)
    #[arg(short, long, env = "WORKLOAD_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let args = Args::parse();
    info!("Starting workload-agent");

    // Load configuration
    let config = AgentConfig::load(args.config.as_deref())?;
    info!(
        node_name = %config.node_name,
        api_port = config.api_port,
        max_concurrent_tasks = config.control.executor.max_concurrent_tasks,
        "Agent configured"
    );

    let logger = StructuredLogger::new(&config.node_name);
    let probe: Arc<dyn ResourceProbe> = Arc::new(ProcfsProbe::new(&config.control.monitor));
    let controller = WorkloadController::with_logger(config.control.clone(), probe, logger).await?;

    let app_state = Arc::new(api::AppState::new(
        controller.health().clone(),
        ControlMetrics::new(),
        controller.optimizer().clone(),
    ));

    controller.start().await;

    // Start health, metrics and status server
    let mut api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    let reason = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            "SIGINT received"
        }
        served = &mut api_handle => {
            match served {
                Ok(Ok(())) => "API server stopped",
                Ok(Err(e)) => {
                    error!(error = %e, "API server failed");
                    "API server failed"
                }
                Err(e) => {
                    error!(error = %e, "API server task aborted");
                    "API server task aborted"
                }
            }
        }
    };

    controller.shutdown(reason).await;
    api_handle.abort();
    info!("Shutdown complete");

    Ok(())
}
