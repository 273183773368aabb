use std::{
    collections::BTreeMap,
    io,
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use chrono::{SecondsFormat, Utc};
use faultline_config::AgentConfig;
use thiserror::Error;
use tokio::{
    io::{AsyncBufReadExt as _, BufReader},
    process::{Child, Command},
    task::JoinHandle,
    time::{sleep, timeout},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::workspace::{Workspace, WorkspaceError};

/// File the composed prompt is written to before spawn.
pub const PROMPT_FILENAME: &str = "prompt.md";

const STDOUT_LOG: &str = "agent.stdout.log";
const STDERR_LOG: &str = "agent.stderr.log";
const COMBINED_LOG: &str = "agent.combined.log";

/// Grace between SIGTERM and SIGKILL when tearing down the process group.
const KILL_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to spawn agent '{}': {source}", script.display())]
    SpawnFailed {
        script: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("agent did not exit within {limit:?}")]
    Timeout { limit: Duration },
    #[error("agent execution cancelled")]
    Cancelled,
    #[error("failed to await agent: {source}")]
    Wait {
        #[source]
        source: io::Error,
    },
    #[error("failed to stage agent inputs: {source}")]
    Inputs {
        #[source]
        source: WorkspaceError,
    },
}

/// Outcome of one agent invocation. A non-zero exit code is data for the
/// failure detector, not an executor error.
#[derive(Debug, Default)]
pub struct ExecutionReport {
    pub exit_code: Option<i32>,
    pub logs: BTreeMap<String, PathBuf>,
    pub error: Option<ExecError>,
}

/// Invokes the external investigation worker under a bounded wall-clock.
///
/// The worker runs in its own Unix process group so that a deadline or
/// cancellation tears down the whole tree: SIGTERM first, SIGKILL after a
/// short grace.
#[derive(Clone, Debug)]
pub struct AgentExecutor {
    agent: AgentConfig,
    timeout_buffer: Duration,
}

impl AgentExecutor {
    #[must_use]
    pub const fn new(agent: AgentConfig, timeout_buffer: Duration) -> Self {
        Self {
            agent,
            timeout_buffer,
        }
    }

    #[must_use]
    pub const fn agent(&self) -> &AgentConfig {
        &self.agent
    }

    /// Stage the prompt, spawn the worker and wait for exit or deadline.
    pub async fn execute(
        &self,
        cancel: &CancellationToken,
        workspace: &Workspace,
        incident_id: &str,
        prompt: &str,
        kubeconfig: Option<&Path>,
    ) -> ExecutionReport {
        let mut report = ExecutionReport::default();

        let prompt_path = match workspace.write(PROMPT_FILENAME, prompt.as_bytes()) {
            Ok(path) => path,
            Err(source) => {
                report.error = Some(ExecError::Inputs { source });
                return report;
            }
        };

        let mut child = match self.spawn(workspace, incident_id, &prompt_path, kubeconfig) {
            Ok(child) => child,
            Err(error) => {
                report.error = Some(error);
                return report;
            }
        };
        let pgid = child.id();

        let capture = if self.agent.debug {
            match spawn_capture(&mut child, workspace) {
                Ok((tasks, logs)) => {
                    report.logs = logs;
                    tasks
                }
                Err(error) => {
                    warn!(incident_id, %error, "failed to open agent log capture");
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        let limit = self.agent.timeout() + self.timeout_buffer;
        debug!(incident_id, limit_secs = limit.as_secs(), "awaiting agent");

        let outcome = tokio::select! {
            () = cancel.cancelled() => WaitOutcome::Cancelled,
            () = sleep(limit) => WaitOutcome::Deadline,
            status = child.wait() => WaitOutcome::Exited(status),
        };

        match outcome {
            WaitOutcome::Cancelled => {
                info!(incident_id, "cancellation fired, terminating agent");
                terminate_group(&mut child, pgid).await;
                report.error = Some(ExecError::Cancelled);
            }
            WaitOutcome::Deadline => {
                warn!(incident_id, limit_secs = limit.as_secs(), "agent deadline exceeded");
                terminate_group(&mut child, pgid).await;
                report.error = Some(ExecError::Timeout { limit });
            }
            WaitOutcome::Exited(Ok(status)) => {
                report.exit_code = status.code();
                info!(incident_id, exit_code = ?status.code(), "agent exited");
            }
            WaitOutcome::Exited(Err(source)) => report.error = Some(ExecError::Wait { source }),
        }

        for task in capture {
            let _ = task.await;
        }

        report
    }

    fn spawn(
        &self,
        workspace: &Workspace,
        incident_id: &str,
        prompt_path: &Path,
        kubeconfig: Option<&Path>,
    ) -> Result<Child, ExecError> {
        let mut std_cmd = std::process::Command::new(&self.agent.script);
        std_cmd
            .current_dir(workspace.path())
            .stdin(Stdio::null())
            .env("FAULTLINE_WORKSPACE", workspace.path())
            .env("FAULTLINE_INCIDENT_ID", incident_id)
            .env("FAULTLINE_AGENT_CLI", &self.agent.cli)
            .env("FAULTLINE_AGENT_MODEL", &self.agent.model)
            .env("FAULTLINE_ALLOWED_TOOLS", self.agent.allowed_tools.join(","))
            .env("FAULTLINE_PROMPT_FILE", prompt_path)
            .env(
                "FAULTLINE_TIMEOUT_SECS",
                self.agent.timeout().as_secs().to_string(),
            )
            .env("FAULTLINE_VERBOSE", bool_flag(self.agent.verbose))
            .env("FAULTLINE_DEBUG", bool_flag(self.agent.debug));
        if let Some(path) = kubeconfig {
            std_cmd.env("KUBECONFIG", path);
        }
        if self.agent.debug {
            std_cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        } else {
            std_cmd.stdout(Stdio::null()).stderr(Stdio::null());
        }
        {
            use std::os::unix::process::CommandExt as _;
            std_cmd.process_group(0);
        }

        let mut cmd = Command::from(std_cmd);
        cmd.kill_on_drop(true);
        cmd.spawn().map_err(|source| ExecError::SpawnFailed {
            script: self.agent.script.clone(),
            source,
        })
    }
}

enum WaitOutcome {
    Cancelled,
    Deadline,
    Exited(io::Result<std::process::ExitStatus>),
}

fn bool_flag(value: bool) -> &'static str {
    if value { "true" } else { "false" }
}

/// SIGTERM the worker's process group, escalate to SIGKILL after a grace.
async fn terminate_group(child: &mut Child, pgid: Option<u32>) {
    signal_group(child, pgid, libc::SIGTERM);

    if timeout(KILL_GRACE, child.wait()).await.is_err() {
        warn!("agent ignored SIGTERM, escalating to SIGKILL");
        signal_group(child, pgid, libc::SIGKILL);
        let _ = child.wait().await;
    }
}

fn signal_group(child: &mut Child, pgid: Option<u32>, signal: i32) {
    if let Some(pgid) = pgid {
        // The child was spawned with process_group(0), so its pgid equals
        // its pid.
        let rc = unsafe { libc::killpg(pgid as i32, signal) };
        if rc == 0 {
            return;
        }
    }
    let _ = child.start_kill();
}

type CaptureTasks = Vec<JoinHandle<()>>;

/// Stream captured stdout/stderr to per-stream files plus an interleaved
/// combined log, line by line as output arrives, so partial logs survive a
/// SIGKILL.
fn spawn_capture(
    child: &mut Child,
    workspace: &Workspace,
) -> Result<(CaptureTasks, BTreeMap<String, PathBuf>), WorkspaceError> {
    let stdout_path = workspace.write(STDOUT_LOG, b"")?;
    let stderr_path = workspace.write(STDERR_LOG, b"")?;
    let combined_path = workspace.write(COMBINED_LOG, b"")?;

    let combined = std::sync::Arc::new(std::sync::Mutex::new(open_append(&combined_path)?));

    let mut tasks = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        tasks.push(capture_stream(
            stdout,
            open_append(&stdout_path)?,
            std::sync::Arc::clone(&combined),
            "stdout",
        ));
    }
    if let Some(stderr) = child.stderr.take() {
        tasks.push(capture_stream(
            stderr,
            open_append(&stderr_path)?,
            combined,
            "stderr",
        ));
    }

    let mut logs = BTreeMap::new();
    logs.insert("stdout".to_owned(), stdout_path);
    logs.insert("stderr".to_owned(), stderr_path);
    logs.insert("combined".to_owned(), combined_path);
    Ok((tasks, logs))
}

fn open_append(path: &Path) -> Result<std::fs::File, WorkspaceError> {
    std::fs::OpenOptions::new()
        .append(true)
        .open(path)
        .map_err(|source| WorkspaceError::Io {
            path: path.to_path_buf(),
            source,
        })
}

fn capture_stream<R>(
    stream: R,
    mut own: std::fs::File,
    combined: std::sync::Arc<std::sync::Mutex<std::fs::File>>,
    tag: &'static str,
) -> JoinHandle<()>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        use std::io::Write as _;

        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let _ = writeln!(own, "{line}");
            let stamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
            if let Ok(mut combined) = combined.lock() {
                let _ = writeln!(combined, "{stamp} [{tag}] {line}");
            }
        }
        let _ = own.flush();
    })
}
