use std::path::PathBuf;
use std::sync::Arc;

use fm_domain::cancel::CancelToken;
use fm_domain::config::SandboxConfig;
use fm_domain::credentials::CredentialResolver;

/// Everything a handler may touch while executing one call.
#[derive(Clone)]
pub struct ExecContext {
    pub agent_id: String,
    pub org_id: String,
    pub session_id: String,
    /// Secrets accessor; resolved values are never journaled.
    pub credentials: Arc<dyn CredentialResolver>,
    /// Per-call cancellation, chained from the session's signal.
    pub cancel: CancelToken,
    /// The agent's sandbox descriptor.
    pub sandbox: SandboxConfig,
    /// Root for relative paths in filesystem tools.
    pub workspace_root: PathBuf,
}
