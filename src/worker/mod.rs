//! Owns a bounded pool of execution slots. Each invocation selects a
//! backend, computes argv and environment, feeds stdin, and enforces
//! the invocation's deadline (§4.5).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;

use crate::backend::{select_backend, Backend, BackendKind, ExecutionResult, ExecutionSpec};
use crate::error::GortError;
use crate::model::bundle::{Bundle, Command};
use crate::model::config::{resolve_env, DynamicConfiguration};
use crate::model::token::generate_token_value;

/// Grace period after the deadline is asked of the backend before the
/// worker abandons and returns anyway (§5).
pub const GRACE_PERIOD: Duration = Duration::from_secs(5);
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(60);

/// The identity and location context an invocation carries into its
/// environment — everything `GORT_*` besides the service token.
pub struct InvocationContext {
    pub chat_handle: String,
    pub room: String,
    pub adapter: String,
    pub services_root: String,
    pub user_groups: Vec<String>,
}

pub struct WorkerPool {
    permits: Arc<Semaphore>,
    local: Arc<dyn Backend>,
    container: Option<Arc<dyn Backend>>,
    pod: Option<Arc<dyn Backend>>,
}

impl WorkerPool {
    pub fn new(
        pool_size: usize,
        local: Arc<dyn Backend>,
        container: Option<Arc<dyn Backend>>,
        pod: Option<Arc<dyn Backend>>,
    ) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(pool_size.max(1))),
            local,
            container,
            pod,
        }
    }

    /// The default pool size: CPU count x4, minimum 8 (§4.5).
    pub fn default_pool_size() -> usize {
        (num_cpus() * 4).max(8)
    }

    pub async fn run(
        &self,
        bundle: &Bundle,
        command: &Command,
        parameters: &[String],
        stdin: String,
        ctx: &InvocationContext,
        dynamic_config: &[DynamicConfiguration],
        deadline: Duration,
    ) -> Result<ExecutionResult, GortError> {
        let _permit = self.permits.acquire().await.map_err(|_| GortError::Backend {
            subcode: crate::error::BackendErrorKind::Runtime,
            message: "worker pool closed".to_string(),
        })?;

        let kind = select_backend(bundle.image.as_deref(), bundle.kubernetes.as_ref());
        let backend: &Arc<dyn Backend> = match kind {
            BackendKind::Local => &self.local,
            BackendKind::Container => self.container.as_ref().ok_or_else(|| GortError::Backend {
                subcode: crate::error::BackendErrorKind::Unreachable,
                message: "container backend not configured".to_string(),
            })?,
            BackendKind::Pod => self.pod.as_ref().ok_or_else(|| GortError::Backend {
                subcode: crate::error::BackendErrorKind::Unreachable,
                message: "pod backend not configured".to_string(),
            })?,
        };

        let mut argv = command.executable.clone();
        argv.extend(parameters.iter().cloned());

        let env = build_env(bundle, command, ctx, dynamic_config);

        let spec = ExecutionSpec {
            argv,
            env,
            stdin,
            image: bundle.image.clone(),
            kubernetes: bundle.kubernetes.clone(),
            deadline,
        };

        // The worker never retries; partial failure of one pipeline
        // stage aborts the remainder (enforced by the caller, which
        // stops iterating stages on the first error).
        match tokio::time::timeout(deadline + GRACE_PERIOD, backend.execute(spec)).await {
            Ok(result) => result,
            Err(_) => Err(GortError::Timeout {
                elapsed_ms: (deadline + GRACE_PERIOD).as_millis() as u64,
                deadline_ms: deadline.as_millis() as u64,
            }),
        }
    }
}

fn build_env(
    bundle: &Bundle,
    command: &Command,
    ctx: &InvocationContext,
    dynamic_config: &[DynamicConfiguration],
) -> HashMap<String, String> {
    let mut env = HashMap::new();
    env.insert("GORT_BUNDLE".to_string(), bundle.name.clone());
    env.insert("GORT_COMMAND".to_string(), command.name.clone());
    env.insert("GORT_CHAT_HANDLE".to_string(), ctx.chat_handle.clone());
    env.insert("GORT_ROOM".to_string(), ctx.room.clone());
    env.insert("GORT_ADAPTER".to_string(), ctx.adapter.clone());
    env.insert("GORT_SERVICE_TOKEN".to_string(), generate_token_value());
    env.insert("GORT_SERVICES_ROOT".to_string(), ctx.services_root.clone());

    let keys: HashSet<&str> = dynamic_config
        .iter()
        .filter(|e| e.bundle == bundle.name)
        .map(|e| e.key.as_str())
        .collect();
    for key in keys {
        if let Some(value) = resolve_env(
            dynamic_config,
            &bundle.name,
            key,
            &ctx.room,
            &ctx.user_groups,
            &ctx.chat_handle,
        ) {
            env.insert(key.to_string(), value);
        }
    }
    env
}

fn num_cpus() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::local::LocalBackend;
    use crate::model::bundle::Templates;
    use chrono::Utc;

    fn bundle() -> Bundle {
        Bundle {
            gort_bundle_version: 1,
            name: "gort".to_string(),
            version: "1.0.0".to_string(),
            description: String::new(),
            long_description: String::new(),
            author: String::new(),
            homepage: String::new(),
            image: None,
            permissions: vec![],
            commands: Default::default(),
            templates: Templates::default(),
            kubernetes: None,
            enabled: true,
            install_user: "admin".to_string(),
            install_timestamp: Utc::now(),
        }
    }

    fn command() -> Command {
        Command {
            name: "echo".to_string(),
            description: String::new(),
            long_description: String::new(),
            executable: vec!["/bin/echo".to_string()],
            rules: vec!["allow".to_string()],
            triggers: vec![],
            templates: Templates::default(),
        }
    }

    #[tokio::test]
    async fn runs_local_command_and_injects_env() {
        let pool = WorkerPool::new(8, Arc::new(LocalBackend), None, None);
        let ctx = InvocationContext {
            chat_handle: "alice".to_string(),
            room: "C1".to_string(),
            adapter: "slack".to_string(),
            services_root: "http://localhost:8080".to_string(),
            user_groups: vec![],
        };
        let result = pool
            .run(
                &bundle(),
                &command(),
                &["hi".to_string()],
                String::new(),
                &ctx,
                &[],
                Duration::from_secs(5),
            )
            .await
            .unwrap();
        assert_eq!(result.stdout.trim(), "hi");
    }
}
