use std::time::{Duration, Instant};

use k8s_openapi::api::core::v1::{Container, EnvFromSource, Pod, PodSpec, SecretEnvSource};
use kube::api::{Api, AttachParams, DeleteParams, LogParams, PostParams};
use kube::runtime::wait::{await_condition, conditions};
use kube::Client;
use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::error::{BackendErrorKind, GortError};
use crate::util::BoxFuture;

use super::{Backend, ExecutionResult, ExecutionSpec};

/// How long to wait for a pod to reach `Running` before giving up on
/// attaching its stdin. Scheduling/image-pull latency, not part of the
/// command's own deadline budget.
const POD_ATTACH_WAIT: Duration = Duration::from_secs(10);

/// Submits a short-lived pod spec with one container identical to the
/// container backend's spec, plus the bundle's `service_account` and
/// an `envFrom` secret reference. Waits for completion in the
/// namespace Gort itself is running in, retrieves logs, deletes the
/// pod.
pub struct PodBackend {
    client: Client,
    namespace: String,
}

impl PodBackend {
    pub async fn connect(namespace: impl Into<String>) -> Result<Self, GortError> {
        let client = Client::try_default().await.map_err(|e| GortError::Backend {
            subcode: BackendErrorKind::Unreachable,
            message: e.to_string(),
        })?;
        Ok(Self {
            client,
            namespace: namespace.into(),
        })
    }
}

impl Backend for PodBackend {
    fn execute(&self, spec: ExecutionSpec) -> BoxFuture<'_, Result<ExecutionResult, GortError>> {
        Box::pin(async move { run(self, spec).await })
    }
}

async fn run(backend: &PodBackend, spec: ExecutionSpec) -> Result<ExecutionResult, GortError> {
    let image = spec.image.clone().ok_or_else(|| GortError::Backend {
        subcode: BackendErrorKind::Runtime,
        message: "pod backend invoked without an image".to_string(),
    })?;
    let k8s = spec.kubernetes.clone().unwrap_or_default();

    let env: Vec<k8s_openapi::api::core::v1::EnvVar> = spec
        .env
        .iter()
        .map(|(k, v)| k8s_openapi::api::core::v1::EnvVar {
            name: k.clone(),
            value: Some(v.clone()),
            ..Default::default()
        })
        .collect();

    let env_from = k8s.env_secret.as_ref().map(|secret_name| {
        vec![EnvFromSource {
            secret_ref: Some(SecretEnvSource {
                name: secret_name.clone(),
                ..Default::default()
            }),
            ..Default::default()
        }]
    });

    let name = format!("gort-{}", uuid::Uuid::new_v4());
    let pod = Pod {
        metadata: kube::api::ObjectMeta {
            name: Some(name.clone()),
            namespace: Some(backend.namespace.clone()),
            ..Default::default()
        },
        spec: Some(PodSpec {
            service_account_name: k8s.service_account.clone(),
            restart_policy: Some("Never".to_string()),
            containers: vec![Container {
                name: "command".to_string(),
                image: Some(image),
                command: Some(spec.argv.clone()),
                env: Some(env),
                env_from,
                stdin: Some(true),
                stdin_once: Some(true),
                ..Default::default()
            }],
            ..Default::default()
        }),
        ..Default::default()
    };

    let api: Api<Pod> = Api::namespaced(backend.client.clone(), &backend.namespace);
    let start = Instant::now();

    api.create(&PostParams::default(), &pod)
        .await
        .map_err(|e| GortError::Backend {
            subcode: BackendErrorKind::Schedule,
            message: e.to_string(),
        })?;

    // Best-effort stdin plumbing: attach once the pod is Running and
    // write the piped input. A pod that completes before it is
    // observed Running (fast built-ins with no image pull) just runs
    // without its stdin populated rather than failing the dispatch.
    let running = tokio::time::timeout(
        POD_ATTACH_WAIT.min(spec.deadline),
        await_condition(api.clone(), &name, conditions::is_pod_running()),
    )
    .await;

    if matches!(running, Ok(Ok(_))) {
        let attach_params = AttachParams::default().stdin(true).stdout(false).stderr(false);
        match api.attach(&name, &attach_params).await {
            Ok(mut attached) => {
                if let Some(mut writer) = attached.stdin() {
                    if let Err(e) = writer.write_all(spec.stdin.as_bytes()).await {
                        warn!("stdin write to pod {name} failed: {e}");
                    }
                }
            }
            Err(e) => warn!("failed to attach stdin to pod {name}: {e}"),
        }
    } else {
        warn!("pod {name} did not reach Running before the stdin attach window elapsed; proceeding without piped stdin");
    }

    let wait = tokio::time::timeout(
        spec.deadline,
        await_condition(api.clone(), &name, conditions::is_pod_completed()),
    )
    .await;

    if wait.is_err() {
        let _ = api.delete(&name, &DeleteParams::default()).await;
        return Err(GortError::Timeout {
            elapsed_ms: start.elapsed().as_millis() as u64,
            deadline_ms: spec.deadline.as_millis() as u64,
        });
    }

    let logs = api
        .logs(&name, &LogParams::default())
        .await
        .unwrap_or_default();

    let final_pod = api.get(&name).await.ok();
    let exit_code = final_pod
        .as_ref()
        .and_then(|p| p.status.as_ref())
        .and_then(|s| s.container_statuses.as_ref())
        .and_then(|cs| cs.first())
        .and_then(|c| c.state.as_ref())
        .and_then(|s| s.terminated.as_ref())
        .map(|t| t.exit_code)
        .unwrap_or(-1);

    let _ = api.delete(&name, &DeleteParams::default()).await;

    Ok(ExecutionResult {
        stdout: logs,
        stderr: String::new(),
        exit_code,
        duration: start.elapsed(),
    })
}
