use std::{env, path::PathBuf};

#[must_use]
pub fn faultline_config() -> Option<PathBuf> {
    env::var("FAULTLINE_CONFIG").ok().map(PathBuf::from)
}

#[must_use]
pub fn faultline_workspace_root() -> Option<PathBuf> {
    env::var("FAULTLINE_WORKSPACE_ROOT").ok().map(PathBuf::from)
}

#[must_use]
pub fn faultline_agent_script() -> Option<PathBuf> {
    env::var("FAULTLINE_AGENT_SCRIPT").ok().map(PathBuf::from)
}

#[must_use]
pub fn faultline_webhook_url() -> Option<String> {
    env::var("FAULTLINE_WEBHOOK_URL").ok()
}

#[must_use]
pub fn faultline_health_port() -> Option<u16> {
    env::var("FAULTLINE_HEALTH_PORT")
        .ok()
        .and_then(|v| v.parse::<u16>().ok())
}

#[must_use]
pub fn faultline_log_level() -> Option<String> {
    env::var("FAULTLINE_LOG_LEVEL").ok()
}

#[must_use]
pub fn faultline_agent_model() -> Option<String> {
    env::var("FAULTLINE_AGENT_MODEL").ok()
}

#[must_use]
pub fn faultline_agent_cli() -> Option<String> {
    env::var("FAULTLINE_AGENT_CLI").ok()
}

#[must_use]
pub fn faultline_agent_timeout_secs() -> Option<u64> {
    env::var("FAULTLINE_AGENT_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
}

#[must_use]
pub fn faultline_keep_workspaces() -> bool {
    env::var("FAULTLINE_KEEP_WORKSPACES").is_ok_and(|v| v.eq_ignore_ascii_case("true"))
}

#[must_use]
pub fn rust_log() -> Option<String> {
    env::var("RUST_LOG").ok()
}
