use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::{BackendErrorKind, GortError};
use crate::util::BoxFuture;

use super::{Backend, ExecutionResult, ExecutionSpec};

/// Forks/execs the invocation's argv directly. Intended for trusted
/// built-ins only — unlike `container`/`pod`, nothing isolates the
/// child process from the host.
pub struct LocalBackend;

impl Backend for LocalBackend {
    fn execute(&self, spec: ExecutionSpec) -> BoxFuture<'_, Result<ExecutionResult, GortError>> {
        Box::pin(async move { run(spec).await })
    }
}

async fn run(spec: ExecutionSpec) -> Result<ExecutionResult, GortError> {
    let Some((program, args)) = spec.argv.split_first() else {
        return Err(GortError::Backend {
            subcode: BackendErrorKind::Runtime,
            message: "empty argv".to_string(),
        });
    };

    let mut child = Command::new(program)
        .args(args)
        .envs(&spec.env)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| GortError::Backend {
            subcode: BackendErrorKind::Runtime,
            message: format!("spawn failed: {e}"),
        })?;

    if let Some(mut stdin) = child.stdin.take() {
        let _ = stdin.write_all(spec.stdin.as_bytes()).await;
    }

    let start = Instant::now();
    let mut timed_out = false;
    loop {
        match child.try_wait() {
            Ok(Some(_status)) => break,
            Ok(None) => {}
            Err(e) => {
                return Err(GortError::Backend {
                    subcode: BackendErrorKind::Runtime,
                    message: format!("wait failed: {e}"),
                })
            }
        }
        if start.elapsed() >= spec.deadline {
            timed_out = true;
            let _ = child.start_kill();
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    let output = child.wait_with_output().await.map_err(|e| GortError::Backend {
        subcode: BackendErrorKind::Runtime,
        message: format!("wait failed: {e}"),
    })?;

    if timed_out {
        return Err(GortError::Timeout {
            elapsed_ms: start.elapsed().as_millis() as u64,
            deadline_ms: spec.deadline.as_millis() as u64,
        });
    }

    Ok(ExecutionResult {
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        exit_code: output.status.code().unwrap_or(-1),
        duration: start.elapsed(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    #[tokio::test]
    async fn runs_simple_command_and_captures_stdout() {
        let backend = LocalBackend;
        let spec = ExecutionSpec {
            argv: vec!["/bin/echo".to_string(), "hello".to_string()],
            env: HashMap::new(),
            stdin: String::new(),
            image: None,
            kubernetes: None,
            deadline: Duration::from_secs(5),
        };
        let result = backend.execute(spec).await.unwrap();
        assert_eq!(result.stdout.trim(), "hello");
        assert_eq!(result.exit_code, 0);
    }

    #[tokio::test]
    async fn deadline_exceeded_yields_timeout_error() {
        let backend = LocalBackend;
        let spec = ExecutionSpec {
            argv: vec!["/bin/sleep".to_string(), "10".to_string()],
            env: HashMap::new(),
            stdin: String::new(),
            image: None,
            kubernetes: None,
            deadline: Duration::from_millis(50),
        };
        let err = backend.execute(spec).await.unwrap_err();
        assert!(matches!(err, GortError::Timeout { .. }));
    }
}
