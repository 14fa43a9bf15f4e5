//! Sandbox runtime: executes one tool invocation as a subprocess under a
//! wall-clock timeout, capturing stdout/stderr. Grounded on
//! `tools/src/manager/executors/subprocess.rs`'s use of
//! `tokio::process::Command` + `Stdio::piped()` + `tokio::time::timeout`.

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::ToolsError;

/// Outcome of one sandboxed tool invocation.
#[derive(Debug, Clone)]
pub struct SandboxOutcome {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub duration: Duration,
}

/// Runs tool executables as child processes. Parameters are passed as a
/// single JSON object on stdin; the tool is expected to emit its result
/// as JSON on stdout and a non-zero exit code on failure.
pub struct SandboxRuntime {
    default_timeout: Duration,
}

impl SandboxRuntime {
    pub fn new(default_timeout: Duration) -> Self {
        Self { default_timeout }
    }

    pub async fn execute(
        &self,
        executable_path: &str,
        params: &HashMap<String, Value>,
        timeout: Option<Duration>,
    ) -> Result<SandboxOutcome, ToolsError> {
        let timeout = timeout.unwrap_or(self.default_timeout);
        let payload = serde_json::to_vec(params)?;

        let mut child = Command::new(executable_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&payload).await?;
            stdin.shutdown().await?;
        }

        let started = std::time::Instant::now();
        let wait_result = tokio::time::timeout(timeout, child.wait_with_output()).await;
        let duration = started.elapsed();

        let output = match wait_result {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(ToolsError::Io(e)),
            Err(_) => return Err(ToolsError::Timeout(timeout)),
        };

        Ok(SandboxOutcome {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
            duration,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn runs_a_successful_echo_script() {
        let dir = tempfile::tempdir().unwrap();
        let script_path = dir.path().join("echo_ok.sh");
        std::fs::write(&script_path, "#!/bin/sh\ncat > /dev/null\necho '{\"ok\":true}'\nexit 0\n").unwrap();
        std::fs::set_permissions(&script_path, std::os::unix::fs::PermissionsExt::from_mode(0o755)).unwrap();

        let sandbox = SandboxRuntime::new(Duration::from_secs(5));
        let outcome = sandbox.execute(script_path.to_str().unwrap(), &HashMap::new(), None).await.unwrap();

        assert!(outcome.success);
        assert!(outcome.stdout.contains("ok"));
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported_as_failure() {
        let dir = tempfile::tempdir().unwrap();
        let script_path = dir.path().join("fail.sh");
        std::fs::write(&script_path, "#!/bin/sh\ncat > /dev/null\necho boom 1>&2\nexit 1\n").unwrap();
        std::fs::set_permissions(&script_path, std::os::unix::fs::PermissionsExt::from_mode(0o755)).unwrap();

        let sandbox = SandboxRuntime::new(Duration::from_secs(5));
        let outcome = sandbox.execute(script_path.to_str().unwrap(), &HashMap::new(), None).await.unwrap();

        assert!(!outcome.success);
        assert_eq!(outcome.exit_code, Some(1));
        assert!(outcome.stderr.contains("boom"));
    }

    #[tokio::test]
    async fn exceeding_the_timeout_is_reported_as_a_timeout_error() {
        let dir = tempfile::tempdir().unwrap();
        let script_path = dir.path().join("slow.sh");
        std::fs::write(&script_path, "#!/bin/sh\ncat > /dev/null\nsleep 5\n").unwrap();
        std::fs::set_permissions(&script_path, std::os::unix::fs::PermissionsExt::from_mode(0o755)).unwrap();

        let sandbox = SandboxRuntime::new(Duration::from_millis(50));
        let result = sandbox.execute(script_path.to_str().unwrap(), &HashMap::new(), None).await;

        assert!(matches!(result, Err(ToolsError::Timeout(_))));
    }
}
