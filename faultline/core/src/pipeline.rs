use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    breaker::FailureBreaker,
    detector::{Outcome, classify},
    event::ClusterEvent,
    executor::{AgentExecutor, ExecutionReport},
    incident::{INCIDENT_FILENAME, Incident, IncidentStatus},
    manager::EventReceiver,
    notifier::{ChatMessage, DegradedAlert, IncidentMessage, Notify, RecoveredAlert},
    prompt,
    report::{ReportExcerpts, extract_excerpts, render_html},
    sink::{ArtifactBundle, ArtifactSink, PERMISSIONS_FILENAME},
    workspace::{Workspace, WorkspaceManager},
};

/// Pipeline knobs lifted from the configuration bag.
#[derive(Clone, Debug)]
pub struct PipelineTuning {
    pub min_report_bytes: u64,
    pub report_ext: String,
    pub upload_on_agent_failure: bool,
}

/// The per-event driver: guards on permissions, composes workspace inputs,
/// executes the agent, classifies the outcome, persists artifacts and
/// notifies. Runs serially on the single receiver of the global channel.
pub struct IncidentPipeline {
    workspaces: WorkspaceManager,
    executor: AgentExecutor,
    breaker: FailureBreaker,
    notifier: Arc<dyn Notify>,
    sink: Option<Arc<dyn ArtifactSink>>,
    system_prompt: String,
    tuning: PipelineTuning,
}

impl IncidentPipeline {
    #[must_use]
    pub fn new(
        workspaces: WorkspaceManager,
        executor: AgentExecutor,
        breaker: FailureBreaker,
        notifier: Arc<dyn Notify>,
        tuning: PipelineTuning,
    ) -> Self {
        Self {
            workspaces,
            executor,
            breaker,
            notifier,
            sink: None,
            system_prompt: prompt::DEFAULT_SYSTEM_PROMPT.to_owned(),
            tuning,
        }
    }

    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn ArtifactSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    #[must_use]
    pub fn with_system_prompt(mut self, system_prompt: String) -> Self {
        self.system_prompt = system_prompt;
        self
    }

    /// Current failure-streak view, for operators and tests.
    #[must_use]
    pub fn breaker_stats(&self) -> crate::breaker::BreakerStats {
        self.breaker.stats()
    }

    /// Drain the global channel until cancellation or channel close.
    pub async fn run(mut self, cancel: CancellationToken, mut events: EventReceiver) {
        loop {
            let event = tokio::select! {
                () = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            self.process(&cancel, event).await;
        }
        info!("incident pipeline stopped");
    }

    /// Drive one accepted event through the full incident lifecycle.
    pub async fn process(&mut self, cancel: &CancellationToken, event: ClusterEvent) {
        let incident_id = Uuid::new_v4().to_string();

        let Some(permissions) = event.permissions.clone() else {
            info!(
                cluster = %event.cluster,
                fault_id = %event.fault.id,
                "triage disabled for cluster, dropping event"
            );
            return;
        };
        if !permissions.minimum_met() {
            warn!(
                cluster = %event.cluster,
                fault_id = %event.fault.id,
                "minimum permissions not met, proceeding with degraded investigation"
            );
        }

        let mut incident = Incident::from_event(incident_id, &event);
        info!(
            incident_id = %incident.id,
            cluster = %incident.cluster,
            fault_id = %incident.fault_id,
            fault_type = %incident.fault_type,
            "incident accepted"
        );

        let workspace = match self.workspaces.create(&incident.id) {
            Ok(workspace) => workspace,
            Err(error) => {
                warn!(incident_id = %incident.id, %error, "workspace creation failed, abandoning incident");
                return;
            }
        };

        if let Err(error) = self.stage_inputs(&workspace, &incident, &permissions) {
            warn!(incident_id = %incident.id, %error, "failed to stage inputs, abandoning incident");
            return;
        }

        incident.started_at = Some(Utc::now());
        let composed = prompt::compose(&self.system_prompt, &incident, Some(permissions.as_ref()));
        let report = self
            .executor
            .execute(
                cancel,
                &workspace,
                &incident.id,
                &composed,
                event.kubeconfig.as_deref(),
            )
            .await;
        incident.completed_at = Some(Utc::now());
        incident.exit_code = report.exit_code;
        incident.log_paths = report.logs.clone();

        let report_path = workspace
            .output_dir()
            .join(format!("investigation.{}", self.tuning.report_ext));
        let outcome = classify(&report, &report_path, self.tuning.min_report_bytes);
        let (status, failure_reason) = resolve_status(&report, outcome);
        incident.failure_reason = failure_reason;
        if let Err(error) = incident.complete(status) {
            warn!(incident_id = %incident.id, %error, "status transition rejected");
            return;
        }
        info!(
            incident_id = %incident.id,
            outcome = outcome.as_str(),
            status = incident.status.as_str(),
            exit_code = ?incident.exit_code,
            "execution classified"
        );

        self.drive_breaker(cancel, &incident, outcome).await;

        self.persist(&workspace, &incident);

        if self.should_persist_artifacts(incident.status) {
            self.persist_artifacts(cancel, &workspace, &mut incident)
                .await;
        }

        self.notify_completion(cancel, &workspace, &incident).await;
    }

    /// Step 4: incident document and permission snapshot land in the
    /// workspace before the agent starts.
    fn stage_inputs(
        &self,
        workspace: &Workspace,
        incident: &Incident,
        permissions: &crate::permissions::ClusterPermissions,
    ) -> Result<(), crate::DynError> {
        incident.write_json(&workspace.file_path(INCIDENT_FILENAME)?)?;
        let body = serde_json::to_vec_pretty(permissions)?;
        workspace.write(PERMISSIONS_FILENAME, &body)?;
        Ok(())
    }

    /// Step 7: one breaker call per incident, edges turn into alerts.
    async fn drive_breaker(
        &mut self,
        cancel: &CancellationToken,
        incident: &Incident,
        outcome: Outcome,
    ) {
        if outcome == Outcome::Success {
            let stats = self.breaker.stats();
            if self.breaker.record_success() {
                let alert = ChatMessage::Recovered(RecoveredAlert {
                    failures_overcome: stats.consecutive_failures,
                    window_secs: stats.window.as_secs(),
                });
                if let Err(error) = self.notifier.send(cancel, &alert).await {
                    warn!(%error, "failed to deliver recovery alert");
                }
            }
            return;
        }

        let reason = incident
            .failure_reason
            .clone()
            .unwrap_or_else(|| outcome.as_str().to_owned());
        if self.breaker.record_failure(&reason) {
            let stats = self.breaker.stats();
            let alert = ChatMessage::Degraded(DegradedAlert {
                consecutive_failures: stats.consecutive_failures,
                window_secs: stats.window.as_secs(),
                recent_reasons: stats.recent_reasons,
            });
            if let Err(error) = self.notifier.send(cancel, &alert).await {
                warn!(%error, "failed to deliver degraded alert");
            }
        }
    }

    fn persist(&self, workspace: &Workspace, incident: &Incident) {
        match workspace.file_path(INCIDENT_FILENAME) {
            Ok(path) => {
                if let Err(error) = incident.write_json(&path) {
                    warn!(incident_id = %incident.id, %error, "failed to persist incident document");
                }
            }
            Err(error) => {
                warn!(incident_id = %incident.id, %error, "failed to resolve incident document path");
            }
        }
    }

    fn should_persist_artifacts(&self, status: IncidentStatus) -> bool {
        self.sink.is_some()
            && (status != IncidentStatus::AgentFailed || self.tuning.upload_on_agent_failure)
    }

    /// Step 9: render the HTML view, gather the bundle and hand it to the
    /// sink; merge returned references back into the incident document.
    async fn persist_artifacts(
        &self,
        cancel: &CancellationToken,
        workspace: &Workspace,
        incident: &mut Incident,
    ) {
        let Some(sink) = &self.sink else {
            return;
        };

        self.render_report_html(workspace, incident);

        let bundle = ArtifactBundle::collect(workspace, &self.tuning.report_ext);
        match sink.save(cancel, &incident.id, &bundle).await {
            Ok(saved) => {
                incident.report_url = saved.report_ref;
                incident.log_urls = saved.log_refs;
                self.persist(workspace, incident);
                debug!(incident_id = %incident.id, "artifacts persisted");
            }
            Err(error) => {
                warn!(incident_id = %incident.id, %error, "artifact persistence failed");
            }
        }
    }

    fn render_report_html(&self, workspace: &Workspace, incident: &Incident) {
        let report_name = format!("output/investigation.{}", self.tuning.report_ext);
        let Ok(markdown) = workspace.read(&report_name) else {
            return;
        };
        let title = format!("incident {}", incident.id);
        let html = render_html(&title, &String::from_utf8_lossy(&markdown));
        if let Err(error) = workspace.write("output/investigation.html", html.as_bytes()) {
            warn!(incident_id = %incident.id, %error, "failed to write HTML report");
        }
    }

    /// Step 10: per-incident message for `resolved` and `failed`;
    /// `agent_failed` is aggregated by the breaker instead.
    async fn notify_completion(
        &self,
        cancel: &CancellationToken,
        workspace: &Workspace,
        incident: &Incident,
    ) {
        if !matches!(
            incident.status,
            IncidentStatus::Resolved | IncidentStatus::Failed
        ) {
            return;
        }

        let excerpts = self.read_excerpts(workspace);
        let message = ChatMessage::Incident(IncidentMessage {
            incident_id: incident.id.clone(),
            cluster: incident.cluster.clone(),
            resource: incident.resource.qualified(),
            fault_type: incident.fault_type.clone(),
            status: incident.status.as_str().to_owned(),
            root_cause: excerpts.root_cause,
            confidence: excerpts.confidence,
            duration_secs: incident
                .duration()
                .and_then(|d| u64::try_from(d.num_seconds()).ok())
                .unwrap_or(0),
            report_url: incident.report_url.clone(),
        });

        if let Err(error) = self.notifier.send(cancel, &message).await {
            warn!(incident_id = %incident.id, %error, "failed to deliver incident notification");
        }
    }

    fn read_excerpts(&self, workspace: &Workspace) -> ReportExcerpts {
        let report_name = format!("output/investigation.{}", self.tuning.report_ext);
        workspace.read(&report_name).map_or_else(
            |_| ReportExcerpts::default(),
            |raw| extract_excerpts(&String::from_utf8_lossy(&raw)),
        )
    }
}

/// Map a detector outcome onto the incident state machine. Spawn, timeout
/// and cancellation failures are execution errors (`failed`); an agent that
/// exits nonzero also failed on its own terms; an agent that exits cleanly
/// without a usable report is `agent_failed`.
fn resolve_status(report: &ExecutionReport, outcome: Outcome) -> (IncidentStatus, Option<String>) {
    match outcome {
        Outcome::Success => (IncidentStatus::Resolved, None),
        Outcome::ExecutionError => {
            let detail = report
                .error
                .as_ref()
                .map_or_else(|| "unknown execution error".to_owned(), ToString::to_string);
            (
                IncidentStatus::Failed,
                Some(format!("agent execution error: {detail}")),
            )
        }
        Outcome::ExitNonZero => {
            let code = report
                .exit_code
                .map_or_else(|| "signal".to_owned(), |code| code.to_string());
            (
                IncidentStatus::Failed,
                Some(format!("agent exited with status {code}")),
            )
        }
        Outcome::ReportMissing | Outcome::ReportUndersized => (
            IncidentStatus::AgentFailed,
            Some(outcome.as_str().to_owned()),
        ),
    }
}
