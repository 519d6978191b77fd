//! Built-in tools.
//!
//! A small stock catalog exercising every executor path: `echo` (pure),
//! `file_read`/`file_write` (sandboxed filesystem, write is reversible),
//! `http_get` (egress-sandboxed), `shell` (command-sanitized, mutating).

use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};

use fm_domain::config::SideEffect;
use fm_domain::journal::JournalEntry;
use fm_domain::message::ToolDefinition;

use crate::context::ExecContext;
use crate::registry::{ToolHandler, ToolOutput};
use crate::sandbox;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// echo
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Returns its argument unchanged.  Used for smoke tests and demos.
pub struct EchoTool;

#[async_trait::async_trait]
impl ToolHandler for EchoTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "echo".into(),
            description: "Echo the given text back unchanged.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "text": {"type": "string", "description": "Text to echo."}
                },
                "required": ["text"],
                "additionalProperties": false
            }),
        }
    }

    async fn execute(&self, arguments: Value, _ctx: &ExecContext) -> ToolOutput {
        Ok(json!({"text": arguments.get("text").cloned().unwrap_or(Value::Null)}))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// file_read
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Deserialize)]
struct FileReadArgs {
    path: String,
    #[serde(default)]
    offset: Option<usize>,
    #[serde(default)]
    limit: Option<usize>,
}

/// Read a file under the workspace root, with optional line windowing.
pub struct FileReadTool;

#[async_trait::async_trait]
impl ToolHandler for FileReadTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "file_read".into(),
            description: "Read a text file relative to the workspace root.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string"},
                    "offset": {"type": "integer", "minimum": 0},
                    "limit": {"type": "integer", "minimum": 1}
                },
                "required": ["path"],
                "additionalProperties": false
            }),
        }
    }

    fn risk_level(&self) -> u8 {
        1
    }

    fn side_effects(&self) -> &[SideEffect] {
        &[SideEffect::FsRead]
    }

    async fn execute(&self, arguments: Value, ctx: &ExecContext) -> ToolOutput {
        let args: FileReadArgs =
            serde_json::from_value(arguments).map_err(|e| e.to_string())?;
        let path = sandbox::validate_path(&ctx.workspace_root, &ctx.sandbox, &args.path)?;

        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| format!("failed to read '{}': {e}", path.display()))?;

        let lines: Vec<&str> = content.lines().collect();
        let total_lines = lines.len();
        let offset = args.offset.unwrap_or(0);
        let limit = args.limit.unwrap_or(total_lines.saturating_sub(offset));
        let selected: Vec<&str> = lines.into_iter().skip(offset).take(limit).collect();

        Ok(json!({
            "path": args.path,
            "total_lines": total_lines,
            "content": selected.join("\n"),
        }))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// file_write
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Deserialize)]
struct FileWriteArgs {
    path: String,
    content: String,
}

/// Write a file under the workspace root.  Reversible: the journal holds
/// the previous content, and `undo` restores it (or deletes a file that
/// did not exist before).
pub struct FileWriteTool;

#[async_trait::async_trait]
impl ToolHandler for FileWriteTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "file_write".into(),
            description: "Create or overwrite a text file relative to the workspace root.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string"},
                    "content": {"type": "string"}
                },
                "required": ["path", "content"],
                "additionalProperties": false
            }),
        }
    }

    fn risk_level(&self) -> u8 {
        2
    }

    fn side_effects(&self) -> &[SideEffect] {
        &[SideEffect::FsWrite]
    }

    fn mutates(&self) -> bool {
        true
    }

    fn reversible(&self) -> bool {
        true
    }

    async fn snapshot(&self, arguments: &Value, ctx: &ExecContext) -> Option<Value> {
        let path = arguments.get("path")?.as_str()?;
        let resolved = sandbox::validate_path(&ctx.workspace_root, &ctx.sandbox, path).ok()?;
        match tokio::fs::read_to_string(&resolved).await {
            Ok(content) => Some(json!({"path": path, "existed": true, "content": content})),
            Err(_) => Some(json!({"path": path, "existed": false})),
        }
    }

    async fn execute(&self, arguments: Value, ctx: &ExecContext) -> ToolOutput {
        let args: FileWriteArgs =
            serde_json::from_value(arguments).map_err(|e| e.to_string())?;
        let path = sandbox::validate_path(&ctx.workspace_root, &ctx.sandbox, &args.path)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| format!("failed to create '{}': {e}", parent.display()))?;
        }
        tokio::fs::write(&path, &args.content)
            .await
            .map_err(|e| format!("failed to write '{}': {e}", path.display()))?;

        Ok(json!({"path": args.path, "bytes_written": args.content.len()}))
    }

    async fn undo(
        &self,
        entry: &JournalEntry,
        ctx: &ExecContext,
    ) -> std::result::Result<(), String> {
        let before = entry
            .before
            .as_ref()
            .ok_or("journal entry carries no before snapshot")?;
        let path = before
            .get("path")
            .and_then(|v| v.as_str())
            .ok_or("before snapshot carries no path")?;
        let resolved = sandbox::validate_path(&ctx.workspace_root, &ctx.sandbox, path)?;

        if before.get("existed").and_then(|v| v.as_bool()) == Some(true) {
            let content = before
                .get("content")
                .and_then(|v| v.as_str())
                .ok_or("before snapshot carries no content")?;
            tokio::fs::write(&resolved, content)
                .await
                .map_err(|e| format!("failed to restore '{}': {e}", resolved.display()))
        } else {
            match tokio::fs::remove_file(&resolved).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(format!("failed to remove '{}': {e}", resolved.display())),
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// http_get
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Deserialize)]
struct HttpGetArgs {
    url: String,
}

/// Fetch a URL.  Egress is gated by the executor's network sandbox; the
/// handler re-validates in case it is invoked directly.
pub struct HttpGetTool;

#[async_trait::async_trait]
impl ToolHandler for HttpGetTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "http_get".into(),
            description: "Fetch a URL over HTTP(S) and return the response body.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "url": {"type": "string"}
                },
                "required": ["url"],
                "additionalProperties": false
            }),
        }
    }

    fn risk_level(&self) -> u8 {
        1
    }

    fn side_effects(&self) -> &[SideEffect] {
        &[SideEffect::Network]
    }

    async fn execute(&self, arguments: Value, ctx: &ExecContext) -> ToolOutput {
        let args: HttpGetArgs =
            serde_json::from_value(arguments).map_err(|e| e.to_string())?;
        sandbox::validate_url(&ctx.sandbox, &args.url)?;

        let client = reqwest::Client::new();
        let resp = client
            .get(&args.url)
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;
        let status = resp.status().as_u16();
        let body = resp
            .text()
            .await
            .map_err(|e| format!("reading body failed: {e}"))?;

        Ok(json!({"status": status, "body": body}))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// shell
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Deserialize)]
struct ShellArgs {
    command: String,
}

/// Run a shell command in the workspace root.  The command sanitizer has
/// already vetted the line; stdout and stderr are captured.
pub struct ShellTool;

#[async_trait::async_trait]
impl ToolHandler for ShellTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "shell".into(),
            description: "Run a shell command and capture its output.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "command": {"type": "string"}
                },
                "required": ["command"],
                "additionalProperties": false
            }),
        }
    }

    fn risk_level(&self) -> u8 {
        2
    }

    fn side_effects(&self) -> &[SideEffect] {
        &[SideEffect::Process]
    }

    fn mutates(&self) -> bool {
        true
    }

    fn deadline(&self) -> Option<Duration> {
        Some(Duration::from_secs(30))
    }

    async fn execute(&self, arguments: Value, ctx: &ExecContext) -> ToolOutput {
        let args: ShellArgs = serde_json::from_value(arguments).map_err(|e| e.to_string())?;
        sandbox::validate_command(&ctx.sandbox, &args.command)?;

        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&args.command)
            .current_dir(&ctx.workspace_root)
            .output()
            .await
            .map_err(|e| format!("failed to spawn: {e}"))?;

        Ok(json!({
            "exit_code": output.status.code(),
            "stdout": String::from_utf8_lossy(&output.stdout),
            "stderr": String::from_utf8_lossy(&output.stderr),
        }))
    }
}

/// The stock built-in catalog.
pub fn builtin_handlers() -> Vec<std::sync::Arc<dyn ToolHandler>> {
    vec![
        std::sync::Arc::new(EchoTool),
        std::sync::Arc::new(FileReadTool),
        std::sync::Arc::new(FileWriteTool),
        std::sync::Arc::new(HttpGetTool),
        std::sync::Arc::new(ShellTool),
    ]
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use fm_domain::cancel::CancelToken;
    use fm_domain::config::SandboxConfig;
    use fm_domain::credentials::CredentialResolver;
    use std::sync::Arc;

    struct NoCreds;

    impl CredentialResolver for NoCreds {
        fn resolve(&self, reference: &str) -> fm_domain::error::Result<String> {
            Err(fm_domain::error::Error::Auth(format!(
                "no credential '{reference}' in tests"
            )))
        }
    }

    fn ctx(workspace: &std::path::Path) -> ExecContext {
        ExecContext {
            agent_id: "a1".into(),
            org_id: "o1".into(),
            session_id: "s1".into(),
            credentials: Arc::new(NoCreds),
            cancel: CancelToken::new(),
            sandbox: SandboxConfig::default(),
            workspace_root: workspace.to_path_buf(),
        }
    }

    #[tokio::test]
    async fn echo_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let out = EchoTool
            .execute(json!({"text": "hi"}), &ctx(dir.path()))
            .await
            .unwrap();
        assert_eq!(out["text"], "hi");
    }

    #[tokio::test]
    async fn file_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let c = ctx(dir.path());

        let out = FileWriteTool
            .execute(json!({"path": "notes/hello.txt", "content": "line1\nline2"}), &c)
            .await
            .unwrap();
        assert_eq!(out["bytes_written"], 11);

        let out = FileReadTool
            .execute(json!({"path": "notes/hello.txt", "offset": 1}), &c)
            .await
            .unwrap();
        assert_eq!(out["content"], "line2");
        assert_eq!(out["total_lines"], 2);
    }

    #[tokio::test]
    async fn file_write_undo_restores_previous_content() {
        let dir = tempfile::tempdir().unwrap();
        let c = ctx(dir.path());
        std::fs::write(dir.path().join("doc.txt"), "original").unwrap();

        let args = json!({"path": "doc.txt", "content": "overwritten"});
        let before = FileWriteTool.snapshot(&args, &c).await;
        FileWriteTool.execute(args, &c).await.unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("doc.txt")).unwrap(),
            "overwritten"
        );

        let mut entry = JournalEntry::invocation("s1", "a1", "file_write");
        entry.before = before;
        entry.reversible = true;
        FileWriteTool.undo(&entry, &c).await.unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("doc.txt")).unwrap(),
            "original"
        );
    }

    #[tokio::test]
    async fn file_write_undo_removes_new_file() {
        let dir = tempfile::tempdir().unwrap();
        let c = ctx(dir.path());

        let args = json!({"path": "fresh.txt", "content": "x"});
        let before = FileWriteTool.snapshot(&args, &c).await;
        FileWriteTool.execute(args, &c).await.unwrap();
        assert!(dir.path().join("fresh.txt").exists());

        let mut entry = JournalEntry::invocation("s1", "a1", "file_write");
        entry.before = before;
        entry.reversible = true;
        FileWriteTool.undo(&entry, &c).await.unwrap();
        assert!(!dir.path().join("fresh.txt").exists());
    }

    #[tokio::test]
    async fn file_read_rejects_escape() {
        let dir = tempfile::tempdir().unwrap();
        let err = FileReadTool
            .execute(json!({"path": "../secrets"}), &ctx(dir.path()))
            .await
            .unwrap_err();
        assert!(err.contains(".."));
    }

    #[tokio::test]
    async fn shell_captures_output() {
        let dir = tempfile::tempdir().unwrap();
        let out = ShellTool
            .execute(json!({"command": "printf hello"}), &ctx(dir.path()))
            .await
            .unwrap();
        assert_eq!(out["exit_code"], 0);
        assert_eq!(out["stdout"], "hello");
    }

    #[tokio::test]
    async fn http_get_blocks_private_targets() {
        let dir = tempfile::tempdir().unwrap();
        let err = HttpGetTool
            .execute(json!({"url": "http://169.254.169.254/iam"}), &ctx(dir.path()))
            .await
            .unwrap_err();
        assert!(err.contains("blocked"));
    }

    #[test]
    fn stock_catalog_names() {
        let names: Vec<String> = builtin_handlers()
            .iter()
            .map(|h| h.definition().name)
            .collect();
        assert_eq!(names, vec!["echo", "file_read", "file_write", "http_get", "shell"]);
    }
}
