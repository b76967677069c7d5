//! Pluggable execution targets (§4.6). Each backend exposes a single
//! capability: execute a fully-resolved command spec and capture its
//! output, exit status, and duration.

pub mod container;
pub mod local;
pub mod pod;

use std::collections::HashMap;
use std::time::Duration;

use crate::error::GortError;
use crate::model::bundle::KubernetesSpec;
use crate::util::BoxFuture;

/// A fully-resolved invocation, ready for a backend to run. By the
/// time this reaches a backend, the worker has already computed the
/// argv, merged environment, and selected the backend.
#[derive(Debug, Clone)]
pub struct ExecutionSpec {
    pub argv: Vec<String>,
    pub env: HashMap<String, String>,
    pub stdin: String,
    pub image: Option<String>,
    pub kubernetes: Option<KubernetesSpec>,
    pub deadline: Duration,
}

#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub duration: Duration,
}

pub trait Backend: Send + Sync {
    fn execute(&self, spec: ExecutionSpec) -> BoxFuture<'_, Result<ExecutionResult, GortError>>;
}

/// Chooses the backend a bundle implies: an explicit `kubernetes`
/// stanza selects the pod backend; otherwise an `image` selects the
/// container backend; otherwise the local-process backend (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Local,
    Container,
    Pod,
}

pub fn select_backend(image: Option<&str>, kubernetes: Option<&KubernetesSpec>) -> BackendKind {
    if kubernetes.is_some() {
        BackendKind::Pod
    } else if image.is_some() {
        BackendKind::Container
    } else {
        BackendKind::Local
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kubernetes_stanza_selects_pod_backend() {
        assert_eq!(
            select_backend(Some("repo:tag"), Some(&KubernetesSpec::default())),
            BackendKind::Pod
        );
    }

    #[test]
    fn image_without_kubernetes_selects_container_backend() {
        assert_eq!(select_backend(Some("repo:tag"), None), BackendKind::Container);
    }

    #[test]
    fn no_image_selects_local_backend() {
        assert_eq!(select_backend(None, None), BackendKind::Local);
    }
}
