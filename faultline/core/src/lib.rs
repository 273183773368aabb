pub mod breaker;
pub mod detector;
pub mod event;
pub mod executor;
pub mod fault;
pub mod incident;
pub mod manager;
pub mod notifier;
pub mod permissions;
pub mod pipeline;
pub mod prompt;
pub mod report;
pub mod sink;
pub mod stream;
pub mod workspace;

/// Boxed error used at capability seams where callers only log or wrap.
pub type DynError = Box<dyn std::error::Error + Send + Sync>;

pub use breaker::{BreakerStats, FailureBreaker};
pub use detector::{Outcome, classify};
pub use event::ClusterEvent;
pub use executor::{AgentExecutor, ExecError, ExecutionReport};
pub use fault::{Fault, ResourceRef, Severity};
pub use incident::{Incident, IncidentStatus};
pub use manager::{ConnectionManager, EventReceiver, HealthSnapshot, ManagerError};
pub use notifier::{ChatMessage, Notify, NotifyError, WebhookNotifier};
pub use permissions::{ClusterPermissions, PermissionProber, ProbeError};
pub use pipeline::{IncidentPipeline, PipelineTuning};
pub use sink::{ArtifactBundle, ArtifactSink, SavedArtifacts, SinkError};
pub use stream::{FaultReceiver, FaultSender, FaultSubscription, StreamError, fault_channel};
pub use workspace::{Workspace, WorkspaceError, WorkspaceManager};
