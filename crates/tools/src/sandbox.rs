//! Sandbox checks: filesystem containment, network egress (SSRF), and
//! shell-command policy.
//!
//! All checks return `Err(String)` with the denial reason; the executor
//! converts them into `policy_denied` tool results.

use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::path::{Component, Path, PathBuf};

use regex::Regex;

use fm_domain::config::{CommandMode, SandboxConfig};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Path sandbox
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Validate and resolve a requested path within a workspace root.
///
/// 1. Rejects absolute paths and raw `..` components.
/// 2. Joins onto the workspace root and canonicalizes the longest
///    existing prefix, appending the remainder.
/// 3. Checks containment under the root (or any extra allowed dir) and
///    the blocked-pattern list.
pub fn validate_path(
    workspace_root: &Path,
    sandbox: &SandboxConfig,
    requested: &str,
) -> std::result::Result<PathBuf, String> {
    let requested_path = Path::new(requested);
    if requested_path.is_absolute() {
        return Err(format!(
            "absolute paths are not allowed; use a path relative to the workspace root (got '{requested}')"
        ));
    }

    for component in requested_path.components() {
        if matches!(component, Component::ParentDir) {
            return Err("path must not contain '..' components".to_owned());
        }
    }

    for pattern in &sandbox.blocked_path_patterns {
        if let Ok(re) = Regex::new(pattern) {
            if re.is_match(requested) {
                return Err(format!("path '{requested}' matches blocked pattern '{pattern}'"));
            }
        }
    }

    let canonical_root = workspace_root
        .canonicalize()
        .map_err(|e| format!("cannot resolve workspace root '{}': {e}", workspace_root.display()))?;

    let candidate = canonical_root.join(requested_path);

    // Canonicalize the longest existing ancestor, then re-append the
    // not-yet-existing tail, so writes to new files still validate.
    let resolved = if candidate.exists() {
        candidate
            .canonicalize()
            .map_err(|e| format!("cannot resolve path '{}': {e}", candidate.display()))?
    } else {
        let mut existing = candidate.as_path();
        let mut tail: Vec<&std::ffi::OsStr> = Vec::new();
        loop {
            if existing.exists() {
                break;
            }
            match existing.parent() {
                Some(parent) => {
                    if let Some(file_name) = existing.file_name() {
                        tail.push(file_name);
                    }
                    existing = parent;
                }
                None => break,
            }
        }
        let mut resolved = existing
            .canonicalize()
            .map_err(|e| format!("cannot resolve ancestor of '{}': {e}", candidate.display()))?;
        for part in tail.into_iter().rev() {
            resolved.push(part);
        }
        resolved
    };

    let allowed = resolved.starts_with(&canonical_root)
        || sandbox.allowed_dirs.iter().any(|dir| {
            dir.canonicalize()
                .map(|d| resolved.starts_with(&d))
                .unwrap_or(false)
        });
    if !allowed {
        return Err(format!(
            "path '{}' resolves outside the allowed roots",
            requested
        ));
    }

    Ok(resolved)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Network sandbox (SSRF)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Check a URL against the host allowlist and CIDR blocklist.
///
/// Literal-IP hosts are checked against `blocked_cidrs` directly.  DNS
/// names are resolved, and *every* resolved address must fall outside
/// `blocked_cidrs` — a crafted record pointing a public-looking name at
/// a private or metadata range is rejected.
pub fn validate_url(sandbox: &SandboxConfig, url: &str) -> std::result::Result<(), String> {
    let host = host_of(url).ok_or_else(|| format!("cannot parse host from url '{url}'"))?;

    if let Some(allowed) = &sandbox.allowed_hosts {
        if !host_allowed(allowed, &host) {
            return Err(format!("host '{host}' is not in the egress allowlist"));
        }
    }

    if let Ok(ip) = host.parse::<IpAddr>() {
        return check_ip(sandbox, &host, ip);
    }

    if host.eq_ignore_ascii_case("localhost") {
        return Err("host 'localhost' is blocked".into());
    }

    // Resolve the name and vet every address it maps to.
    let addr_str = format!("{host}:{}", port_of(url));
    let addrs: Vec<SocketAddr> = addr_str
        .to_socket_addrs()
        .map_err(|e| format!("DNS resolution failed for '{host}': {e}"))?
        .collect();
    if addrs.is_empty() {
        return Err(format!("DNS resolution returned no addresses for '{host}'"));
    }
    for addr in &addrs {
        check_ip(sandbox, &host, addr.ip())?;
    }

    Ok(())
}

/// Allowlist match: exact host or subdomain of an allowed suffix.
fn host_allowed(allowed: &[String], host: &str) -> bool {
    allowed
        .iter()
        .any(|a| host.eq_ignore_ascii_case(a) || host.ends_with(&format!(".{a}")))
}

fn check_ip(sandbox: &SandboxConfig, host: &str, ip: IpAddr) -> std::result::Result<(), String> {
    for cidr in &sandbox.blocked_cidrs {
        if cidr_contains(cidr, ip) {
            return Err(format!(
                "host '{host}' resolves into blocked range '{cidr}' ({ip})"
            ));
        }
    }
    Ok(())
}

/// Extract the host portion of an http(s) URL without a parser crate.
fn host_of(url: &str) -> Option<String> {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))?;
    let authority = rest.split(['/', '?', '#']).next()?;
    // Strip userinfo and port.
    let host = authority.rsplit('@').next()?;
    let host = if let Some(stripped) = host.strip_prefix('[') {
        // Bracketed IPv6 literal.
        stripped.split(']').next()?
    } else {
        host.split(':').next()?
    };
    if host.is_empty() {
        None
    } else {
        Some(host.to_ascii_lowercase())
    }
}

/// Extract the port of an http(s) URL, defaulting by scheme.
fn port_of(url: &str) -> u16 {
    let default = if url.starts_with("https://") { 443 } else { 80 };
    let Some(rest) = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
    else {
        return default;
    };
    let authority = rest.split(['/', '?', '#']).next().unwrap_or("");
    let hostport = authority.rsplit('@').next().unwrap_or(authority);
    let port = if hostport.starts_with('[') {
        // Bracketed IPv6 literal: port follows the closing bracket.
        hostport
            .split(']')
            .nth(1)
            .and_then(|s| s.strip_prefix(':'))
            .and_then(|p| p.parse().ok())
    } else {
        hostport.split_once(':').and_then(|(_, p)| p.parse().ok())
    };
    port.unwrap_or(default)
}

/// Prefix match of an IP against `a.b.c.d/len` (or a bare address).
fn cidr_contains(cidr: &str, ip: IpAddr) -> bool {
    let (net, len) = match cidr.split_once('/') {
        Some((net, len)) => match len.parse::<u32>() {
            Ok(len) => (net, len),
            Err(_) => return false,
        },
        None => (cidr, u32::MAX),
    };
    let Ok(net_ip) = net.parse::<IpAddr>() else {
        return false;
    };

    match (net_ip, ip) {
        (IpAddr::V4(net), IpAddr::V4(ip)) => {
            let len = if len == u32::MAX { 32 } else { len.min(32) };
            if len == 0 {
                return true;
            }
            let mask = u32::MAX << (32 - len);
            (u32::from(net) & mask) == (u32::from(ip) & mask)
        }
        (IpAddr::V6(net), IpAddr::V6(ip)) => {
            let len = if len == u32::MAX { 128 } else { len.min(128) };
            if len == 0 {
                return true;
            }
            let mask = u128::MAX << (128 - len);
            (u128::from(net) & mask) == (u128::from(ip) & mask)
        }
        _ => false,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Command sanitizer
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Check a shell command line against the configured policy mode.
pub fn validate_command(sandbox: &SandboxConfig, command: &str) -> std::result::Result<(), String> {
    match sandbox.command_mode {
        CommandMode::Blocklist => {
            for pattern in &sandbox.blocked_commands {
                if let Ok(re) = Regex::new(pattern) {
                    if re.is_match(command) {
                        return Err(format!("command matches blocked pattern '{pattern}'"));
                    }
                }
            }
            Ok(())
        }
        CommandMode::Allowlist => {
            let top_level = command.trim().split_whitespace().next().unwrap_or("");
            if sandbox.allowed_commands.iter().any(|c| c == top_level) {
                Ok(())
            } else {
                Err(format!("command '{top_level}' is not in the allowlist"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sandbox() -> SandboxConfig {
        SandboxConfig::default()
    }

    // ── Paths ──────────────────────────────────────────────────────

    #[test]
    fn path_inside_workspace_ok() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("file.txt"), "x").unwrap();
        let resolved = validate_path(dir.path(), &sandbox(), "file.txt").unwrap();
        assert!(resolved.ends_with("file.txt"));
    }

    #[test]
    fn nonexistent_target_still_validates() {
        let dir = tempfile::tempdir().unwrap();
        let resolved = validate_path(dir.path(), &sandbox(), "sub/new.txt").unwrap();
        assert!(resolved.starts_with(dir.path().canonicalize().unwrap()));
    }

    #[test]
    fn absolute_and_traversal_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(validate_path(dir.path(), &sandbox(), "/etc/passwd").is_err());
        assert!(validate_path(dir.path(), &sandbox(), "../outside").is_err());
        assert!(validate_path(dir.path(), &sandbox(), "a/../../b").is_err());
    }

    #[test]
    fn blocked_pattern_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let sb = SandboxConfig {
            blocked_path_patterns: vec![r"\.env$".into()],
            ..Default::default()
        };
        assert!(validate_path(dir.path(), &sb, "config/.env").is_err());
        assert!(validate_path(dir.path(), &sb, "config/app.toml").is_ok());
    }

    // ── URLs ───────────────────────────────────────────────────────

    #[test]
    fn public_ip_ok_private_ip_blocked() {
        let sb = sandbox();
        assert!(validate_url(&sb, "http://93.184.216.34/page").is_ok());
        assert!(validate_url(&sb, "http://10.1.2.3/admin").is_err());
        assert!(validate_url(&sb, "http://127.0.0.1:8080/").is_err());
        assert!(validate_url(&sb, "http://169.254.169.254/latest/meta-data").is_err());
        assert!(validate_url(&sb, "http://localhost/").is_err());
    }

    #[test]
    fn allowlist_rejects_unlisted_host_before_resolution() {
        let sb = SandboxConfig {
            allowed_hosts: Some(vec!["api.example.com".into()]),
            ..Default::default()
        };
        let err = validate_url(&sb, "https://evil.com/").unwrap_err();
        assert!(err.contains("allowlist"));
    }

    #[test]
    fn allowlist_matches_exact_and_subdomains() {
        let allowed = vec!["api.example.com".to_string()];
        assert!(host_allowed(&allowed, "api.example.com"));
        assert!(host_allowed(&allowed, "API.EXAMPLE.COM"));
        assert!(host_allowed(&allowed, "v2.api.example.com"));
        assert!(!host_allowed(&allowed, "example.com"));
        assert!(!host_allowed(&allowed, "notapi.example.com"));
    }

    #[test]
    fn resolved_addresses_checked_against_cidrs() {
        // check_ip is the per-address gate applied to every DNS result.
        let sb = sandbox();
        assert!(check_ip(&sb, "name", "169.254.169.254".parse().unwrap()).is_err());
        assert!(check_ip(&sb, "name", "192.168.1.10".parse().unwrap()).is_err());
        assert!(check_ip(&sb, "name", "8.8.8.8".parse().unwrap()).is_ok());
    }

    #[test]
    fn host_parsing_handles_ports_and_userinfo() {
        assert_eq!(host_of("https://user:pw@host.com:8443/p"), Some("host.com".into()));
        assert_eq!(host_of("http://[::1]:8080/x"), Some("::1".into()));
        assert_eq!(host_of("ftp://nope"), None);
    }

    #[test]
    fn port_parsing_defaults_by_scheme() {
        assert_eq!(port_of("https://host.com/p"), 443);
        assert_eq!(port_of("http://host.com/p"), 80);
        assert_eq!(port_of("https://user:pw@host.com:8443/p"), 8443);
        assert_eq!(port_of("http://[::1]:8080/x"), 8080);
    }

    #[test]
    fn cidr_matching() {
        let ip: IpAddr = "10.255.0.1".parse().unwrap();
        assert!(cidr_contains("10.0.0.0/8", ip));
        assert!(!cidr_contains("192.168.0.0/16", ip));
        let v6: IpAddr = "::1".parse().unwrap();
        assert!(cidr_contains("::1/128", v6));
    }

    #[test]
    #[ignore] // Requires network DNS (skip in CI)
    fn dns_name_resolves_and_passes() {
        let sb = sandbox();
        assert!(validate_url(&sb, "https://example.com/page").is_ok());
    }

    // ── Commands ───────────────────────────────────────────────────

    #[test]
    fn blocklist_mode_blocks_destructive() {
        let sb = sandbox();
        assert!(validate_command(&sb, "ls -la").is_ok());
        assert!(validate_command(&sb, "rm -rf /").is_err());
        assert!(validate_command(&sb, "dd if=/dev/zero of=/dev/sda").is_err());
    }

    #[test]
    fn allowlist_mode_permits_only_listed() {
        let sb = SandboxConfig {
            command_mode: CommandMode::Allowlist,
            allowed_commands: vec!["ls".into(), "cat".into()],
            ..Default::default()
        };
        assert!(validate_command(&sb, "ls -la").is_ok());
        assert!(validate_command(&sb, "cat file").is_ok());
        assert!(validate_command(&sb, "curl http://x").is_err());
    }
}
