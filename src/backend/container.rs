use std::time::Instant;

use bollard::container::{
    AttachContainerOptions, AttachContainerResults, Config, CreateContainerOptions, LogsOptions,
    RemoveContainerOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::Docker;
use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;

use crate::error::{BackendErrorKind, GortError};
use crate::util::BoxFuture;

use super::{Backend, ExecutionResult, ExecutionSpec};

/// Pulls the bundle's image if absent, creates a container with the
/// computed argv, scoped env, and piped stdin, starts it, streams its
/// output, waits for completion, then removes the container.
pub struct ContainerBackend {
    docker: Docker,
}

impl ContainerBackend {
    pub fn connect() -> Result<Self, GortError> {
        let docker = Docker::connect_with_local_defaults().map_err(|e| GortError::Backend {
            subcode: BackendErrorKind::Unreachable,
            message: e.to_string(),
        })?;
        Ok(Self { docker })
    }

    async fn ensure_image(&self, image: &str) -> Result<(), GortError> {
        if self.docker.inspect_image(image).await.is_ok() {
            return Ok(());
        }
        let options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };
        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(progress) = stream.next().await {
            progress.map_err(|e| GortError::Backend {
                subcode: BackendErrorKind::Pull,
                message: e.to_string(),
            })?;
        }
        Ok(())
    }
}

impl Backend for ContainerBackend {
    fn execute(&self, spec: ExecutionSpec) -> BoxFuture<'_, Result<ExecutionResult, GortError>> {
        Box::pin(async move { run(self, spec).await })
    }
}

async fn run(backend: &ContainerBackend, spec: ExecutionSpec) -> Result<ExecutionResult, GortError> {
    let image = spec.image.clone().ok_or_else(|| GortError::Backend {
        subcode: BackendErrorKind::Runtime,
        message: "container backend invoked without an image".to_string(),
    })?;

    backend.ensure_image(&image).await?;

    let env: Vec<String> = spec
        .env
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect();

    let config = Config {
        image: Some(image),
        cmd: Some(spec.argv.clone()),
        env: Some(env),
        attach_stdin: Some(true),
        attach_stdout: Some(true),
        attach_stderr: Some(true),
        open_stdin: Some(true),
        ..Default::default()
    };

    let name = format!("gort-{}", uuid::Uuid::new_v4());
    let create_options = CreateContainerOptions {
        name: name.as_str(),
        platform: None,
    };

    let container = backend
        .docker
        .create_container(Some(create_options), config)
        .await
        .map_err(|e| GortError::Backend {
            subcode: BackendErrorKind::Schedule,
            message: e.to_string(),
        })?;

    let AttachContainerResults { output: _output, mut input } = backend
        .docker
        .attach_container(
            &container.id,
            Some(AttachContainerOptions::<String> {
                stdin: Some(true),
                stdout: Some(true),
                stderr: Some(true),
                stream: Some(true),
                ..Default::default()
            }),
        )
        .await
        .map_err(|e| GortError::Backend {
            subcode: BackendErrorKind::Runtime,
            message: e.to_string(),
        })?;

    backend
        .docker
        .start_container::<String>(&container.id, None)
        .await
        .map_err(|e| GortError::Backend {
            subcode: BackendErrorKind::Runtime,
            message: e.to_string(),
        })?;

    input.write_all(spec.stdin.as_bytes()).await.map_err(|e| GortError::Backend {
        subcode: BackendErrorKind::Runtime,
        message: format!("stdin write failed: {e}"),
    })?;
    drop(input);

    let start = Instant::now();
    let wait_result = tokio::time::timeout(
        spec.deadline,
        backend
            .docker
            .wait_container(&container.id, None::<WaitContainerOptions<String>>)
            .collect::<Vec<_>>(),
    )
    .await;

    let outcome = match wait_result {
        Err(_) => {
            let _ = backend
                .docker
                .remove_container(
                    &container.id,
                    Some(RemoveContainerOptions {
                        force: true,
                        ..Default::default()
                    }),
                )
                .await;
            return Err(GortError::Timeout {
                elapsed_ms: start.elapsed().as_millis() as u64,
                deadline_ms: spec.deadline.as_millis() as u64,
            });
        }
        Ok(results) => results,
    };

    let exit_code = outcome
        .into_iter()
        .next()
        .and_then(|r| r.ok())
        .map(|r| r.status_code as i32)
        .unwrap_or(-1);

    let (stdout, stderr) = collect_logs(backend, &container.id).await?;

    let _ = backend
        .docker
        .remove_container(
            &container.id,
            Some(RemoveContainerOptions {
                force: true,
                ..Default::default()
            }),
        )
        .await;

    Ok(ExecutionResult {
        stdout,
        stderr,
        exit_code,
        duration: start.elapsed(),
    })
}

async fn collect_logs(backend: &ContainerBackend, container_id: &str) -> Result<(String, String), GortError> {
    let options = LogsOptions::<String> {
        stdout: true,
        stderr: true,
        ..Default::default()
    };
    let mut stream = backend.docker.logs(container_id, Some(options));
    let mut stdout = String::new();
    let mut stderr = String::new();
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(bollard::container::LogOutput::StdOut { message }) => {
                stdout.push_str(&String::from_utf8_lossy(&message));
            }
            Ok(bollard::container::LogOutput::StdErr { message }) => {
                stderr.push_str(&String::from_utf8_lossy(&message));
            }
            Ok(_) => {}
            Err(e) => {
                return Err(GortError::Backend {
                    subcode: BackendErrorKind::Runtime,
                    message: e.to_string(),
                })
            }
        }
    }
    Ok((stdout, stderr))
}
