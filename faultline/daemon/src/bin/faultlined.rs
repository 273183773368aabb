use std::{path::PathBuf, process::ExitCode};

use clap::Parser;
use faultline_config::OrchestratorConfig;
use faultline_daemon::{FatalError, run};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const EXIT_CONFIG_INVALID: u8 = 2;
const EXIT_PROBE_FAILED: u8 = 3;

#[derive(Debug, Parser)]
#[command(name = "faultlined", about = "Incident-triage orchestrator for Kubernetes clusters")]
struct Args {
    /// Path to the YAML configuration file.
    #[arg(long, env = "FAULTLINE_CONFIG")]
    config: PathBuf,

    /// Override the workspace root directory.
    #[arg(long)]
    workspace_root: Option<PathBuf>,

    /// Override the agent launcher script.
    #[arg(long)]
    agent_script: Option<PathBuf>,

    /// Override the chat webhook URL.
    #[arg(long)]
    webhook_url: Option<String>,

    /// Override the health endpoint port (0 disables).
    #[arg(long)]
    health_port: Option<u16>,

    /// Log filter, e.g. `info` or `faultline_core=debug`.
    #[arg(long)]
    log_level: Option<String>,
}

impl Args {
    /// Flags take precedence over environment and file values.
    fn apply(&self, config: &mut OrchestratorConfig) {
        if let Some(root) = &self.workspace_root {
            config.workspace_root = root.clone();
        }
        if let Some(script) = &self.agent_script {
            config.agent.script = script.clone();
        }
        if let Some(url) = &self.webhook_url {
            config.notifier.webhook_url = Some(url.clone());
        }
        if let Some(port) = self.health_port {
            config.health.port = port;
        }
    }
}

fn init_tracing(level: Option<&str>) {
    let fallback = level
        .map(str::to_owned)
        .or_else(faultline_env::faultline_log_level)
        .or_else(faultline_env::rust_log)
        .unwrap_or_else(|| "info".to_owned());
    let filter = EnvFilter::try_new(fallback).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn shutdown_on_signal(cancel: CancellationToken) {
    let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
    {
        Ok(sigterm) => sigterm,
        Err(error) => {
            error!(%error, "failed to install SIGTERM handler");
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("received SIGINT, shutting down"),
        _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
    }
    cancel.cancel();
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.log_level.as_deref());

    let mut config = match OrchestratorConfig::load(&args.config) {
        Ok(config) => config,
        Err(error) => {
            error!(%error, "configuration is invalid");
            return ExitCode::from(EXIT_CONFIG_INVALID);
        }
    };
    config.apply_env();
    args.apply(&mut config);

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_on_signal(cancel.clone()));

    match run(config, cancel).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error @ FatalError::Config(_)) => {
            error!(%error, "configuration is invalid");
            ExitCode::from(EXIT_CONFIG_INVALID)
        }
        Err(error @ FatalError::Probe(_)) => {
            error!(%error, "permission probing failed");
            ExitCode::from(EXIT_PROBE_FAILED)
        }
        Err(error) => {
            error!(%error, "orchestrator failed");
            ExitCode::FAILURE
        }
    }
}
