//! Credential resolver implementations.
//!
//! The core consumes [`CredentialResolver`] as a port; these are the two
//! stock implementations: environment variables (headless deployments)
//! and the OS keychain.  Provider adapters additionally accept inline
//! `key`/`env` fields on [`AuthConfig`] for low-friction setups.

use fm_domain::config::AuthConfig;
use fm_domain::credentials::CredentialResolver;
use fm_domain::error::{Error, Result};

/// Resolves credential references as environment variable names.
#[derive(Default)]
pub struct EnvCredentialResolver;

impl CredentialResolver for EnvCredentialResolver {
    fn resolve(&self, reference: &str) -> Result<String> {
        std::env::var(reference).map_err(|_| {
            Error::Auth(format!(
                "environment variable '{reference}' not set or not valid UTF-8"
            ))
        })
    }
}

/// Resolves `service/account` references against the OS keychain
/// (macOS Keychain, Windows Credential Manager, Linux Secret Service).
///
/// On headless systems without a keychain daemon, falls back to the env
/// var `{SERVICE}_{ACCOUNT}` uppercased with hyphens replaced.
pub struct KeychainCredentialResolver;

impl CredentialResolver for KeychainCredentialResolver {
    fn resolve(&self, reference: &str) -> Result<String> {
        let (service, account) = reference
            .split_once('/')
            .ok_or_else(|| Error::Auth(format!("keychain reference '{reference}' must be 'service/account'")))?;

        match keychain_lookup(service, account) {
            Ok(secret) => Ok(secret),
            Err(e) => {
                let fallback_var = fallback_env_name(service, account);
                if let Ok(val) = std::env::var(&fallback_var) {
                    tracing::info!(
                        env_var = %fallback_var,
                        "credential resolved from keychain headless fallback env var"
                    );
                    return Ok(val);
                }
                Err(e)
            }
        }
    }
}

fn keychain_lookup(service: &str, account: &str) -> Result<String> {
    let entry = keyring::Entry::new(service, account)
        .map_err(|e| Error::Auth(format!("keyring entry creation failed: {e}")))?;
    entry
        .get_password()
        .map_err(|e| Error::Auth(format!("keyring get_password failed: {e}")))
}

/// Build the headless fallback env var name for a keychain reference.
/// Example: `("foreman", "venice-api-key")` → `"FOREMAN_VENICE_API_KEY"`.
fn fallback_env_name(service: &str, account: &str) -> String {
    format!(
        "{}_{}",
        service.to_uppercase().replace('-', "_"),
        account.to_uppercase().replace('-', "_"),
    )
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// AuthConfig resolution
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Resolve a provider API key from its [`AuthConfig`].
///
/// Precedence:
/// 1. `key` field (plaintext — warn)
/// 2. `credential` reference through the resolver port
/// 3. `env` field (reads environment variable)
/// 4. Error
pub fn resolve_api_key(auth: &AuthConfig, resolver: &dyn CredentialResolver) -> Result<String> {
    if let Some(ref key) = auth.key {
        tracing::warn!(
            "API key loaded from plaintext config field 'key' — \
             prefer 'env' or 'credential' instead"
        );
        return Ok(key.clone());
    }

    if let Some(ref reference) = auth.credential {
        return resolver.resolve(reference);
    }

    if let Some(ref env_var) = auth.env {
        return std::env::var(env_var).map_err(|_| {
            Error::Auth(format!(
                "environment variable '{env_var}' not set or not valid UTF-8"
            ))
        });
    }

    Err(Error::Auth(
        "no API key configured: set 'key', 'env', or 'credential' in the provider auth".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_env_name_basic() {
        assert_eq!(
            fallback_env_name("foreman", "venice-api-key"),
            "FOREMAN_VENICE_API_KEY"
        );
    }

    #[test]
    fn resolve_api_key_plaintext() {
        let auth = AuthConfig {
            key: Some("sk-test-123".into()),
            ..Default::default()
        };
        let key = resolve_api_key(&auth, &EnvCredentialResolver).unwrap();
        assert_eq!(key, "sk-test-123");
    }

    #[test]
    fn resolve_api_key_env_var() {
        let var_name = "FM_TEST_RESOLVE_ENV_KEY_1234";
        std::env::set_var(var_name, "env-secret-value");
        let auth = AuthConfig {
            env: Some(var_name.into()),
            ..Default::default()
        };
        let key = resolve_api_key(&auth, &EnvCredentialResolver).unwrap();
        assert_eq!(key, "env-secret-value");
        std::env::remove_var(var_name);
    }

    #[test]
    fn resolve_api_key_env_var_missing() {
        let auth = AuthConfig {
            env: Some("FM_TEST_NONEXISTENT_VAR_8888".into()),
            ..Default::default()
        };
        let err = resolve_api_key(&auth, &EnvCredentialResolver).unwrap_err();
        assert!(err.to_string().contains("FM_TEST_NONEXISTENT_VAR_8888"));
    }

    #[test]
    fn resolve_api_key_no_config() {
        let auth = AuthConfig::default();
        let err = resolve_api_key(&auth, &EnvCredentialResolver).unwrap_err();
        assert!(err.to_string().contains("no API key configured"));
    }

    #[test]
    fn plaintext_takes_precedence() {
        let auth = AuthConfig {
            key: Some("plaintext-wins".into()),
            env: Some("FM_TEST_SHOULD_NOT_BE_READ".into()),
            ..Default::default()
        };
        let key = resolve_api_key(&auth, &EnvCredentialResolver).unwrap();
        assert_eq!(key, "plaintext-wins");
    }

    #[test]
    fn keychain_reference_shape_enforced() {
        let err = KeychainCredentialResolver.resolve("not-a-pair").unwrap_err();
        assert!(err.to_string().contains("service/account"));
    }
}
