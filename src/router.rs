//! Drives a single adapter event to completion: identity, parse,
//! resolve, authorize, dispatch, template, reply (§4.4).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::adapter::{Adapter, AdapterEvent, EventKind, RenderedMessage};
use crate::authorizer::{self, Context as AuthContext};
use crate::backend::ExecutionResult;
use crate::error::GortError;
use crate::model::bundle::{Bundle, CommandEntry};
use crate::model::request::{CommandRequest, CommandResponse};
use crate::model::user::{effective_groups, effective_permissions, effective_roles, PermissionGraph, User};
use crate::parser::{self, Expander, Invocation};
use crate::persistence::Persistence;
use crate::resolver;
use crate::template::{self, Slot};
use crate::util::BoxFuture;
use crate::worker::{InvocationContext, WorkerPool};

/// Ties identity resolution, the command pipeline, the worker pool,
/// and the template/adapter reply path together. One `Router` serves
/// every registered adapter; the scheduler holds an `Arc<Router>` to
/// synthesize events of its own.
pub struct Router {
    persistence: Arc<dyn Persistence>,
    adapters: RwLock<HashMap<String, Arc<dyn Adapter>>>,
    worker: Arc<WorkerPool>,
    services_root: String,
    default_deadline: Duration,
}

impl Router {
    pub fn new(
        persistence: Arc<dyn Persistence>,
        worker: Arc<WorkerPool>,
        services_root: String,
        default_deadline: Duration,
    ) -> Self {
        Self {
            persistence,
            adapters: RwLock::new(HashMap::new()),
            worker,
            services_root,
            default_deadline,
        }
    }

    pub async fn register_adapter(&self, adapter: Arc<dyn Adapter>) {
        self.adapters.write().await.insert(adapter.name().to_string(), adapter);
    }

    async fn adapter(&self, name: &str) -> Option<Arc<dyn Adapter>> {
        self.adapters.read().await.get(name).cloned()
    }

    /// Handles one event from `adapter_name`. Never panics or
    /// propagates an error to the caller: every failure path either
    /// replies to the channel, logs, or both. The scheduler relies on
    /// this for its synthesized events (§4.7).
    pub async fn handle(&self, adapter_name: &str, event: AdapterEvent) {
        if !matches!(event.kind, EventKind::MessageDirect | EventKind::MessageChannel) {
            return;
        }

        let Some(adapter) = self.adapter(adapter_name).await else {
            warn!("event from unregistered adapter {adapter_name}");
            return;
        };

        let user = match self.persistence.user_by_mapping(adapter_name, &event.provider_user_id).await {
            Ok(Some(u)) => u,
            Ok(None) => {
                send_with_retry(
                    &adapter,
                    &event.channel,
                    RenderedMessage::Text(
                        "I don't know who you are yet — ask an admin to map your account.".to_string(),
                    ),
                )
                .await;
                return;
            }
            Err(e) => {
                warn!("identity lookup failed for {adapter_name}/{}: {e}", event.provider_user_id);
                return;
            }
        };

        let expander = RouterExpander {
            router: self,
            adapter_name,
            channel: &event.channel,
            user: &user,
            base_deadline: self.default_deadline,
        };
        let invocations = match parser::parse(&event.text, &expander).await {
            Ok(v) => v,
            Err(e) => {
                self.record_failure("", "", Vec::new(), adapter_name, &event, &user.username, &e)
                    .await;
                send_with_retry(&adapter, &event.channel, RenderedMessage::Text(format!("I couldn't parse that: {e}")))
                    .await;
                return;
            }
        };

        let bundles = match self.persistence.bundles_all().await {
            Ok(b) => b,
            Err(e) => {
                warn!("failed to load bundles: {e}");
                return;
            }
        };
        let groups = match self.persistence.groups_all().await {
            Ok(g) => g,
            Err(e) => {
                warn!("failed to load groups: {e}");
                return;
            }
        };
        let roles = match self.persistence.roles_all().await {
            Ok(r) => r,
            Err(e) => {
                warn!("failed to load roles: {e}");
                return;
            }
        };
        let graph = PermissionGraph {
            groups: &groups,
            roles: &roles,
            bundles: &bundles,
        };
        let user_permissions = effective_permissions(&user, &graph);
        let user_roles = effective_roles(&user, &graph);
        let user_groups = effective_groups(&user, &graph);

        let entries = match resolve_pipeline(&bundles, &invocations, &event.text, true) {
            ResolveOutcome::Entries(e) => e,
            ResolveOutcome::Silent => return,
            ResolveOutcome::Error(e) => {
                let bundle_name = invocations[0].bundle.clone().unwrap_or_default();
                self.record_failure(
                    &bundle_name,
                    &invocations[0].command,
                    invocations[0].parameters.clone(),
                    adapter_name,
                    &event,
                    &user.username,
                    &e,
                )
                .await;
                let text = match &e {
                    GortError::Ambiguous { candidates, .. } => {
                        format!("that's ambiguous; candidates: {}", candidates.join(", "))
                    }
                    other => format!("error: {other}"),
                };
                send_with_retry(&adapter, &event.channel, RenderedMessage::Text(text)).await;
                return;
            }
        };

        if let Err((e, entry)) =
            authorize_all(&entries, &invocations, &user, &user_permissions, &user_roles, &user_groups)
        {
            let response = self
                .record_failure(
                    &entry.bundle_name,
                    &entry.command.name,
                    invocations[0].parameters.clone(),
                    adapter_name,
                    &event,
                    &user.username,
                    &e,
                )
                .await;
            let text = match find_bundle(&bundles, &entry.bundle_name, &entry.bundle_version) {
                Some(bundle) => template::render(bundle, &entry.command, &user.username, &response, Slot::CommandError),
                None => format!("error: {e}"),
            };
            send_with_retry(&adapter, &event.channel, RenderedMessage::Text(text)).await;
            return;
        }

        let request = CommandRequest::new(
            entries[0].bundle_name.clone(),
            entries[0].command.name.clone(),
            invocations[0].parameters.clone(),
            adapter_name.to_string(),
            event.channel.clone(),
            event.provider_user_id.clone(),
            user.username.clone(),
        );
        let request_id = match self.persistence.request_begin(request).await {
            Ok(id) => id,
            Err(e) => {
                warn!("failed to persist request: {e}");
                return;
            }
        };

        match execute_stages(
            &self.worker,
            &self.persistence,
            &bundles,
            &entries,
            &invocations,
            adapter_name,
            &event.channel,
            &user,
            &user_groups,
            &self.services_root,
            self.default_deadline,
        )
        .await
        {
            Ok(result) => {
                let response = CommandResponse::from_result(
                    request_id,
                    result.duration.as_millis() as u64,
                    result.exit_code,
                    result.stdout,
                    result.stderr,
                );
                if let Err(e) = self.persistence.request_close(response.clone()).await {
                    warn!("failed to persist response: {e}");
                }
                let last_entry = entries.last().expect("non-empty pipeline");
                if let Some(last_bundle) = find_bundle(&bundles, &last_entry.bundle_name, &last_entry.bundle_version) {
                    let slot = if response.status == 0 { Slot::Command } else { Slot::CommandError };
                    let text = template::render(last_bundle, &last_entry.command, &user.username, &response, slot);
                    send_with_retry(&adapter, &event.channel, RenderedMessage::Text(text)).await;
                } else {
                    warn!("bundle {} vanished between resolve and reply", last_entry.bundle_name);
                }
                info!(request_id = %response.request_id, status = response.status, "command completed");
            }
            Err((e, entry)) => {
                let response = CommandResponse::failure(request_id, 0, 1, format!("{}: {}", e.audit_code(), e));
                if let Err(persist_err) = self.persistence.request_close(response.clone()).await {
                    warn!("failed to persist response: {persist_err}");
                }
                let text = match find_bundle(&bundles, &entry.bundle_name, &entry.bundle_version) {
                    Some(bundle) => template::render(bundle, &entry.command, &user.username, &response, Slot::CommandError),
                    None => format!("error: {e}"),
                };
                send_with_retry(&adapter, &event.channel, RenderedMessage::Text(text)).await;
            }
        }
    }

    /// Persists a best-effort audit row for a failure that occurred
    /// before a command ever reached dispatch (parse/resolve/authorize
    /// failures). Returns the response that was (or would have been)
    /// persisted, for reuse when rendering a reply template.
    async fn record_failure(
        &self,
        bundle_name: &str,
        command_name: &str,
        parameters: Vec<String>,
        adapter_name: &str,
        event: &AdapterEvent,
        username: &str,
        error: &GortError,
    ) -> CommandResponse {
        let request = CommandRequest::new(
            bundle_name.to_string(),
            command_name.to_string(),
            parameters,
            adapter_name.to_string(),
            event.channel.clone(),
            event.provider_user_id.clone(),
            username.to_string(),
        );
        match self.persistence.request_begin(request).await {
            Ok(request_id) => {
                let response = CommandResponse::failure(request_id, 0, 1, format!("{}: {}", error.audit_code(), error));
                if let Err(e) = self.persistence.request_close(response.clone()).await {
                    warn!("failed to persist response: {e}");
                }
                response
            }
            Err(e) => {
                warn!("failed to persist request: {e}");
                CommandResponse::failure(Uuid::new_v4(), 0, 1, format!("{}: {}", error.audit_code(), error))
            }
        }
    }

    /// Runs a nested `$(...)` pipeline to completion: a full
    /// parse/resolve/authorize/execute pass with a sub-deadline, but no
    /// audit row of its own (DESIGN.md Open Question 3). A command
    /// substitution that fails to resolve or is denied surfaces as a
    /// `GortError`, which the outer parse propagates as its own error —
    /// it is not silently swallowed the way an unrecognized chat line
    /// is.
    async fn run_nested(
        &self,
        adapter_name: &str,
        channel: &str,
        user: &User,
        text: &str,
        depth: usize,
        deadline: Duration,
    ) -> Result<String, GortError> {
        let expander = RouterExpander {
            router: self,
            adapter_name,
            channel,
            user,
            base_deadline: deadline,
        };
        let invocations = parser::parse_at_depth(text, &expander, depth).await?;
        let bundles = self.persistence.bundles_all().await?;
        let groups = self.persistence.groups_all().await?;
        let roles = self.persistence.roles_all().await?;
        let graph = PermissionGraph {
            groups: &groups,
            roles: &roles,
            bundles: &bundles,
        };
        let user_permissions = effective_permissions(user, &graph);
        let user_roles = effective_roles(user, &graph);
        let user_groups = effective_groups(user, &graph);

        let entries = match resolve_pipeline(&bundles, &invocations, text, false) {
            ResolveOutcome::Entries(e) => e,
            ResolveOutcome::Silent => {
                return Err(GortError::NoSuchCommand {
                    name: text.to_string(),
                })
            }
            ResolveOutcome::Error(e) => return Err(e),
        };
        authorize_all(&entries, &invocations, user, &user_permissions, &user_roles, &user_groups).map_err(|(e, _)| e)?;
        let result = execute_stages(
            &self.worker,
            &self.persistence,
            &bundles,
            &entries,
            &invocations,
            adapter_name,
            channel,
            user,
            &user_groups,
            &self.services_root,
            deadline,
        )
        .await
        .map_err(|(e, _)| e)?;
        Ok(result.stdout)
    }
}

/// One outcome of resolving an entire pipeline's stages. Distinguishes
/// "genuinely not a command, ignore the line" from "was meant as a
/// command but failed to resolve" (§4.4 step 4).
enum ResolveOutcome {
    Entries(Vec<CommandEntry>),
    Silent,
    Error(GortError),
}

/// Resolves every stage of `invocations` against `bundles`. At
/// `top_level`, an unresolved first stage falls back to trigger
/// matching against `raw_text` when the pipeline is a single stage,
/// and is otherwise treated as "not a command" rather than an error —
/// most chat traffic is conversation, not command invocations. Nested
/// substitutions (`top_level = false`) never fall back or go silent: a
/// bundle author who wrote `$(bundle:command)` meant it.
fn resolve_pipeline(bundles: &[Bundle], invocations: &[Invocation], raw_text: &str, top_level: bool) -> ResolveOutcome {
    let mut entries = Vec::with_capacity(invocations.len());
    for (idx, inv) in invocations.iter().enumerate() {
        match resolver::resolve(inv.bundle.as_deref(), &inv.command, bundles) {
            Ok(mut hits) => entries.push(hits.remove(0)),
            Err(GortError::NoSuchCommand { .. }) if top_level && idx == 0 => {
                if invocations.len() == 1 {
                    match resolver::resolve_by_trigger(raw_text, bundles) {
                        Ok(Some(entry)) => entries.push(entry),
                        Ok(None) => return ResolveOutcome::Silent,
                        Err(e) => return ResolveOutcome::Error(e),
                    }
                } else {
                    return ResolveOutcome::Silent;
                }
            }
            Err(e) => return ResolveOutcome::Error(e),
        }
    }
    ResolveOutcome::Entries(entries)
}

/// Authorizes every resolved stage up front. Nothing dispatches unless
/// every stage in the pipeline is individually authorized (§4.3).
fn authorize_all(
    entries: &[CommandEntry],
    invocations: &[Invocation],
    user: &User,
    user_permissions: &HashSet<String>,
    user_roles: &HashSet<String>,
    user_groups: &HashSet<String>,
) -> Result<(), (GortError, CommandEntry)> {
    for (entry, inv) in entries.iter().zip(invocations) {
        let ctx = AuthContext {
            command: entry.command.name.clone(),
            bundle: entry.bundle_name.clone(),
            args: inv.parameters.clone(),
            // The grammar has no named-option syntax (§4.1); `option[name]`
            // rule references always evaluate to the empty string.
            options: HashMap::new(),
            user_name: user.username.clone(),
            user_groups: user_groups.iter().cloned().collect(),
            user_roles: user_roles.iter().cloned().collect(),
            user_permissions: user_permissions.iter().cloned().collect(),
        };
        if let Err(e) = authorizer::authorize(&entry.command.rules, &ctx, user_permissions) {
            return Err((e, entry.clone()));
        }
    }
    Ok(())
}

/// Dispatches every stage in order through the worker pool, piping
/// each stage's stdout into the next stage's stdin. Aborts at the
/// first failing stage (§4.5: partial pipeline failure is not retried
/// or completed).
#[allow(clippy::too_many_arguments)]
async fn execute_stages(
    worker: &WorkerPool,
    persistence: &Arc<dyn Persistence>,
    bundles: &[Bundle],
    entries: &[CommandEntry],
    invocations: &[Invocation],
    adapter_name: &str,
    channel: &str,
    user: &User,
    user_groups: &HashSet<String>,
    services_root: &str,
    deadline: Duration,
) -> Result<ExecutionResult, (GortError, CommandEntry)> {
    let mut stdin = String::new();
    let mut last = None;
    for (entry, inv) in entries.iter().zip(invocations) {
        let Some(bundle) = find_bundle(bundles, &entry.bundle_name, &entry.bundle_version) else {
            return Err((
                GortError::Backend {
                    subcode: crate::error::BackendErrorKind::Runtime,
                    message: format!("bundle {} disappeared mid-pipeline", entry.bundle_name),
                },
                entry.clone(),
            ));
        };
        let dynamic_config = persistence
            .dynamic_config_list_for_worker(&bundle.name)
            .await
            .map_err(|e| (e, entry.clone()))?;
        let ictx = InvocationContext {
            chat_handle: user.username.clone(),
            room: channel.to_string(),
            adapter: adapter_name.to_string(),
            services_root: services_root.to_string(),
            user_groups: user_groups.iter().cloned().collect(),
        };
        match worker
            .run(bundle, &entry.command, &inv.parameters, stdin.clone(), &ictx, &dynamic_config, deadline)
            .await
        {
            Ok(result) => {
                stdin = result.stdout.clone();
                last = Some(result);
            }
            Err(e) => return Err((e, entry.clone())),
        }
    }
    Ok(last.expect("invocations is non-empty"))
}

fn find_bundle<'a>(bundles: &'a [Bundle], name: &str, version: &str) -> Option<&'a Bundle> {
    bundles.iter().find(|b| b.name == name && b.version == version)
}

/// Sends a reply, retrying once with jitter before giving up (§7: "retry
/// the send once with jitter, then drop the reply and logs"). Never
/// propagates a failure to the caller — an unreachable adapter must not
/// interrupt request handling.
async fn send_with_retry(adapter: &Arc<dyn Adapter>, channel: &str, message: RenderedMessage) {
    if let Err(first_err) = adapter.send(channel, message.clone()).await {
        let jitter = Duration::from_millis(50 + rand::random::<u64>() % 200);
        tokio::time::sleep(jitter).await;
        if let Err(second_err) = adapter.send(channel, message).await {
            warn!("dropping reply to {channel}: send failed twice ({first_err}, then {second_err})");
        }
    }
}

/// Feeds `$NAME`/`${NAME}` and `$(...)` expansion back into the
/// router, so a running command can reference its own chat context or
/// pipe through another command's output (§4.1, §4.4).
struct RouterExpander<'a> {
    router: &'a Router,
    adapter_name: &'a str,
    channel: &'a str,
    user: &'a User,
    base_deadline: Duration,
}

impl<'a> Expander for RouterExpander<'a> {
    fn lookup_var(&self, name: &str) -> Option<String> {
        match name {
            "GORT_CHAT_HANDLE" => Some(self.user.username.clone()),
            "GORT_ROOM" => Some(self.channel.to_string()),
            "GORT_ADAPTER" => Some(self.adapter_name.to_string()),
            _ => None,
        }
    }

    fn run_pipeline<'b>(&'b self, source: &'b str, depth: usize) -> BoxFuture<'b, Result<String, GortError>> {
        Box::pin(async move {
            // Each nesting level gets a fresh sub-deadline scaled down
            // from the outer invocation's remaining budget, rather than
            // the full per-command default — an unbounded nested
            // pipeline must not outlive its parent.
            let divisor = (depth as u32).saturating_add(1);
            let sub_deadline = self.base_deadline / divisor.max(1);
            self.router
                .run_nested(self.adapter_name, self.channel, self.user, source, depth, sub_deadline)
                .await
        })
    }
}
