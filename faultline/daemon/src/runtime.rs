use std::{fs, sync::Arc};

use faultline_config::{OrchestratorConfig, SinkConfig};
use faultline_core::{
    AgentExecutor, ArtifactSink, ConnectionManager, FailureBreaker, IncidentPipeline,
    ManagerError, Notify, PermissionProber, PipelineTuning, WebhookNotifier, WorkspaceManager,
    notifier::NoopNotifier,
};
use faultline_sink_fs::FilesystemSink;
use faultline_sink_objectstore::ObjectStoreSink;
use faultline_stream_sse::SseFaultStream;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Startup failures that terminate the process, mapped onto exit codes by
/// the binary.
#[derive(Debug, Error)]
pub enum FatalError {
    #[error(transparent)]
    Config(#[from] faultline_config::ConfigError),
    #[error(transparent)]
    Probe(ManagerError),
    #[error("{0}")]
    Startup(String),
}

/// Compose every collaborator from the validated config and drive the
/// orchestrator until the cancellation token fires.
pub async fn run(
    config: OrchestratorConfig,
    cancel: CancellationToken,
) -> Result<(), FatalError> {
    config.validate()?;

    let manager = Arc::new(ConnectionManager::new(
        &config.clusters,
        &config.tuning,
        PermissionProber::default(),
    ));

    for cluster in &config.clusters {
        let stream = SseFaultStream::new(
            cluster.name.clone(),
            cluster.endpoint.clone(),
            config.tuning.stream_buffer,
        )
        .map_err(|error| FatalError::Startup(format!("failed to build stream client: {error}")))?;
        manager
            .attach(&cluster.name, Arc::new(stream))
            .map_err(|error| FatalError::Startup(error.to_string()))?;
    }

    // Permission probing is startup-fatal: a cluster we cannot assess is a
    // cluster we must not triage.
    manager
        .initialize(&cancel)
        .await
        .map_err(FatalError::Probe)?;

    let health_task = if config.health.port == 0 {
        info!("health endpoint disabled");
        None
    } else {
        let port = config.health.port;
        let manager = Arc::clone(&manager);
        let health_cancel = cancel.clone();
        Some(tokio::spawn(async move {
            if let Err(error) = crate::health::serve(port, manager, health_cancel).await {
                error!(%error, "health endpoint terminated");
            }
        }))
    };

    let events = manager
        .start(&cancel)
        .await
        .map_err(|error| FatalError::Startup(error.to_string()))?;

    let pipeline = build_pipeline(&config)?;
    pipeline.run(cancel.clone(), events).await;

    manager.stop().await;
    if let Some(task) = health_task {
        let _ = task.await;
    }
    info!("orchestrator shut down");
    Ok(())
}

fn build_pipeline(config: &OrchestratorConfig) -> Result<IncidentPipeline, FatalError> {
    let workspaces = WorkspaceManager::new(&config.workspace_root);
    let executor = AgentExecutor::new(config.agent.clone(), config.tuning.timeout_buffer());
    let breaker = FailureBreaker::new(
        config.tuning.breaker_threshold,
        config.tuning.recent_reasons_capacity,
    );

    let notifier: Arc<dyn Notify> = match &config.notifier.webhook_url {
        Some(url) => Arc::new(
            WebhookNotifier::new(url.clone(), config.tuning.http_timeout()).map_err(|error| {
                FatalError::Startup(format!("failed to build webhook client: {error}"))
            })?,
        ),
        None => {
            warn!("no webhook configured, notifications are disabled");
            Arc::new(NoopNotifier)
        }
    };

    let tuning = PipelineTuning {
        min_report_bytes: config.tuning.min_report_bytes,
        report_ext: config.agent.report_ext.clone(),
        upload_on_agent_failure: config.upload_on_agent_failure,
    };

    let mut pipeline = IncidentPipeline::new(workspaces, executor, breaker, notifier, tuning);

    if let Some(sink) = build_sink(config)? {
        pipeline = pipeline.with_sink(sink);
    }

    if let Some(path) = &config.agent.system_prompt {
        let prompt = fs::read_to_string(path).map_err(|error| {
            FatalError::Startup(format!(
                "failed to read system prompt {}: {error}",
                path.display()
            ))
        })?;
        pipeline = pipeline.with_system_prompt(prompt);
    }

    Ok(pipeline)
}

fn build_sink(config: &OrchestratorConfig) -> Result<Option<Arc<dyn ArtifactSink>>, FatalError> {
    match &config.sink {
        SinkConfig::Disabled => Ok(None),
        SinkConfig::Filesystem { root } => Ok(Some(Arc::new(FilesystemSink::new(root)))),
        SinkConfig::ObjectStore { bucket, prefix, .. } => {
            let sink = ObjectStoreSink::from_env(bucket, prefix.clone(), config.sink.url_ttl())
                .map_err(|error| {
                    FatalError::Startup(format!("failed to build object store sink: {error}"))
                })?;
            Ok(Some(Arc::new(sink)))
        }
    }
}
