//! Typed CRUD for every entity in the data model, plus the audit trail
//! and scheduler surfaces (§6 "Persistence contract").

pub mod redb_store;

use uuid::Uuid;

use crate::error::GortError;
use crate::model::{
    bundle::Bundle, config::DynamicConfiguration, request::CommandRequest, request::CommandResponse,
    schedule::Schedule, token::Token, user::UserPatch, Group, Role, User,
};
use crate::util::BoxFuture;

/// A narrow typed CRUD surface. Secret dynamic-config values must be
/// returnable only via `dynamic_config_get`/`dynamic_config_list_for_worker`
/// (the Execution Worker's path), never via `dynamic_config_list_masked`
/// (the UI-facing listing path).
pub trait Persistence: Send + Sync {
    fn bundles_all(&self) -> BoxFuture<'_, Result<Vec<Bundle>, GortError>>;
    fn bundle_install(&self, bundle: Bundle) -> BoxFuture<'_, Result<(), GortError>>;
    fn bundle_enable(&self, name: &str, version: &str) -> BoxFuture<'_, Result<(), GortError>>;
    fn bundle_disable(&self, name: &str) -> BoxFuture<'_, Result<(), GortError>>;
    fn bundle_uninstall(&self, name: &str, version: &str) -> BoxFuture<'_, Result<(), GortError>>;

    fn users_all(&self) -> BoxFuture<'_, Result<Vec<User>, GortError>>;
    fn user_by_username(&self, username: &str) -> BoxFuture<'_, Result<Option<User>, GortError>>;
    fn user_by_mapping(
        &self,
        adapter: &str,
        provider_user_id: &str,
    ) -> BoxFuture<'_, Result<Option<User>, GortError>>;
    fn user_upsert(&self, user: User) -> BoxFuture<'_, Result<(), GortError>>;
    /// Merges `patch` into the stored user: fields left `None` keep
    /// their existing value rather than being cleared (§8). Errors if
    /// `patch.username` names no existing user.
    fn user_update(&self, patch: UserPatch) -> BoxFuture<'_, Result<(), GortError>>;
    fn user_delete(&self, username: &str) -> BoxFuture<'_, Result<(), GortError>>;

    fn groups_all(&self) -> BoxFuture<'_, Result<Vec<Group>, GortError>>;
    fn group_upsert(&self, group: Group) -> BoxFuture<'_, Result<(), GortError>>;
    fn group_delete(&self, name: &str) -> BoxFuture<'_, Result<(), GortError>>;

    fn roles_all(&self) -> BoxFuture<'_, Result<Vec<Role>, GortError>>;
    fn role_upsert(&self, role: Role) -> BoxFuture<'_, Result<(), GortError>>;
    fn role_delete(&self, name: &str) -> BoxFuture<'_, Result<(), GortError>>;

    fn dynamic_config_list_for_worker(
        &self,
        bundle: &str,
    ) -> BoxFuture<'_, Result<Vec<DynamicConfiguration>, GortError>>;
    fn dynamic_config_list_masked(
        &self,
        bundle: &str,
    ) -> BoxFuture<'_, Result<Vec<DynamicConfiguration>, GortError>>;
    fn dynamic_config_set(
        &self,
        entry: DynamicConfiguration,
    ) -> BoxFuture<'_, Result<(), GortError>>;

    fn token_generate(&self, username: &str) -> BoxFuture<'_, Result<Token, GortError>>;
    fn token_by_value(&self, token: &str) -> BoxFuture<'_, Result<Option<Token>, GortError>>;

    fn request_begin(&self, request: CommandRequest) -> BoxFuture<'_, Result<Uuid, GortError>>;
    fn request_close(
        &self,
        response: CommandResponse,
    ) -> BoxFuture<'_, Result<(), GortError>>;

    fn schedules_all(&self) -> BoxFuture<'_, Result<Vec<Schedule>, GortError>>;
    fn schedule_create(&self, schedule: Schedule) -> BoxFuture<'_, Result<Uuid, GortError>>;
    fn schedule_delete(&self, schedule_id: Uuid) -> BoxFuture<'_, Result<(), GortError>>;
}
