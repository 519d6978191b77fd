//! Credential resolver port.
//!
//! The core never stores secrets: tool handlers and provider adapters ask
//! a resolver for the secret behind a named credential reference.  Secrets
//! are never journaled and the DLP layer treats resolved values as
//! sensitive.  Implementations live in `fm-providers` (env chain, OS
//! keychain).

use crate::error::Result;

/// Resolves a named credential reference to its secret value.
pub trait CredentialResolver: Send + Sync {
    /// Return the secret for `reference`, or an auth error when the
    /// reference cannot be resolved.
    fn resolve(&self, reference: &str) -> Result<String>;
}
