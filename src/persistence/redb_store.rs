use redb::{Database, ReadableTable, TableDefinition};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::GortError;
use crate::model::{
    bundle::Bundle, config::DynamicConfiguration, request::CommandRequest, request::CommandResponse,
    schedule::Schedule, token::Token, Group, Role, User,
};
use crate::util::BoxFuture;

use super::Persistence;

const BUNDLES_TABLE: TableDefinition<&str, &str> = TableDefinition::new("bundles");
const USERS_TABLE: TableDefinition<&str, &str> = TableDefinition::new("users");
const USER_MAPPINGS_TABLE: TableDefinition<&str, &str> = TableDefinition::new("user_mappings");
const GROUPS_TABLE: TableDefinition<&str, &str> = TableDefinition::new("groups");
const ROLES_TABLE: TableDefinition<&str, &str> = TableDefinition::new("roles");
const DYNAMIC_CONFIG_TABLE: TableDefinition<&str, &str> = TableDefinition::new("dynamic_config");
const TOKENS_TABLE: TableDefinition<&str, &str> = TableDefinition::new("tokens");
const REQUESTS_TABLE: TableDefinition<&str, &str> = TableDefinition::new("requests");
const RESPONSES_TABLE: TableDefinition<&str, &str> = TableDefinition::new("responses");
const SCHEDULES_TABLE: TableDefinition<&str, &str> = TableDefinition::new("schedules");

/// `redb`-backed implementation of the `Persistence` contract. One
/// table per entity family, string keys, JSON-encoded string values —
/// the same shape this codebase's prior local state store used.
pub struct RedbStore {
    db: Arc<Database>,
}

fn bundle_key(name: &str, version: &str) -> String {
    format!("{name}@{version}")
}

fn config_key(entry: &DynamicConfiguration) -> String {
    format!("{}|{:?}|{}|{}", entry.bundle, entry.layer, entry.owner, entry.key)
}

impl RedbStore {
    pub fn new(path: impl AsRef<std::path::Path>) -> Result<Self, GortError> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| GortError::Persistence(format!("creating data dir: {e}")))?;
        }
        let db = Database::create(path).map_err(|e| GortError::Persistence(e.to_string()))?;
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(BUNDLES_TABLE)?;
            let _ = write_txn.open_table(USERS_TABLE)?;
            let _ = write_txn.open_table(USER_MAPPINGS_TABLE)?;
            let _ = write_txn.open_table(GROUPS_TABLE)?;
            let _ = write_txn.open_table(ROLES_TABLE)?;
            let _ = write_txn.open_table(DYNAMIC_CONFIG_TABLE)?;
            let _ = write_txn.open_table(TOKENS_TABLE)?;
            let _ = write_txn.open_table(REQUESTS_TABLE)?;
            let _ = write_txn.open_table(RESPONSES_TABLE)?;
            let _ = write_txn.open_table(SCHEDULES_TABLE)?;
        }
        write_txn.commit()?;
        Ok(Self { db: Arc::new(db) })
    }

    /// Reads back every audit row. Not part of the `Persistence`
    /// contract — no Router/CLI code needs to list the full audit
    /// trail — but end-to-end tests assert against it directly.
    pub async fn requests_all(&self) -> Result<Vec<CommandRequest>, GortError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(REQUESTS_TABLE)?;
        let mut requests = Vec::new();
        for res in table.iter()? {
            let (_k, v) = res?;
            requests.push(serde_json::from_str::<CommandRequest>(v.value())?);
        }
        Ok(requests)
    }

    pub async fn responses_all(&self) -> Result<Vec<CommandResponse>, GortError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(RESPONSES_TABLE)?;
        let mut responses = Vec::new();
        for res in table.iter()? {
            let (_k, v) = res?;
            responses.push(serde_json::from_str::<CommandResponse>(v.value())?);
        }
        Ok(responses)
    }
}

impl Persistence for RedbStore {
    fn bundles_all(&self) -> BoxFuture<'_, Result<Vec<Bundle>, GortError>> {
        Box::pin(async move {
            let read_txn = self.db.begin_read()?;
            let table = read_txn.open_table(BUNDLES_TABLE)?;
            let mut bundles = Vec::new();
            for res in table.iter()? {
                let (_k, v) = res?;
                bundles.push(serde_json::from_str::<Bundle>(v.value())?);
            }
            Ok(bundles)
        })
    }

    fn bundle_install(&self, bundle: Bundle) -> BoxFuture<'_, Result<(), GortError>> {
        Box::pin(async move {
            let write_txn = self.db.begin_write()?;
            {
                let mut table = write_txn.open_table(BUNDLES_TABLE)?;
                let key = bundle_key(&bundle.name, &bundle.version);
                let val = serde_json::to_string(&bundle)?;
                table.insert(key.as_str(), val.as_str())?;
            }
            write_txn.commit()?;
            Ok(())
        })
    }

    fn bundle_enable(&self, name: &str, version: &str) -> BoxFuture<'_, Result<(), GortError>> {
        let name = name.to_string();
        let version = version.to_string();
        Box::pin(async move {
            // Enable/disable for a bundle name happens inside one write
            // transaction so two racing `enable` calls for the same
            // name serialize at the storage layer (DESIGN.md Open
            // Question 1) rather than needing an in-memory lock.
            let write_txn = self.db.begin_write()?;
            {
                let mut table = write_txn.open_table(BUNDLES_TABLE)?;
                let keys: Vec<String> = table
                    .iter()?
                    .filter_map(|res| res.ok())
                    .map(|(k, _)| k.value().to_string())
                    .filter(|k| k.starts_with(&format!("{name}@")))
                    .collect();
                let mut found = false;
                for key in keys {
                    let Some(val) = table.get(key.as_str())? else {
                        continue;
                    };
                    let mut bundle: Bundle = serde_json::from_str(val.value())?;
                    drop(val);
                    bundle.enabled = bundle.version == version;
                    found = found || bundle.enabled;
                    let encoded = serde_json::to_string(&bundle)?;
                    table.insert(key.as_str(), encoded.as_str())?;
                }
                if !found {
                    return Err(GortError::Persistence(format!(
                        "no such bundle version: {name}@{version}"
                    )));
                }
            }
            write_txn.commit()?;
            Ok(())
        })
    }

    fn bundle_disable(&self, name: &str) -> BoxFuture<'_, Result<(), GortError>> {
        let name = name.to_string();
        Box::pin(async move {
            let write_txn = self.db.begin_write()?;
            {
                let mut table = write_txn.open_table(BUNDLES_TABLE)?;
                let keys: Vec<String> = table
                    .iter()?
                    .filter_map(|res| res.ok())
                    .map(|(k, _)| k.value().to_string())
                    .filter(|k| k.starts_with(&format!("{name}@")))
                    .collect();
                for key in keys {
                    let Some(val) = table.get(key.as_str())? else {
                        continue;
                    };
                    let mut bundle: Bundle = serde_json::from_str(val.value())?;
                    drop(val);
                    bundle.enabled = false;
                    let encoded = serde_json::to_string(&bundle)?;
                    table.insert(key.as_str(), encoded.as_str())?;
                }
            }
            write_txn.commit()?;
            Ok(())
        })
    }

    fn bundle_uninstall(&self, name: &str, version: &str) -> BoxFuture<'_, Result<(), GortError>> {
        let key = bundle_key(name, version);
        Box::pin(async move {
            let write_txn = self.db.begin_write()?;
            {
                let mut table = write_txn.open_table(BUNDLES_TABLE)?;
                table.remove(key.as_str())?;
            }
            write_txn.commit()?;
            Ok(())
        })
    }

    fn users_all(&self) -> BoxFuture<'_, Result<Vec<User>, GortError>> {
        Box::pin(async move {
            let read_txn = self.db.begin_read()?;
            let table = read_txn.open_table(USERS_TABLE)?;
            let mut users = Vec::new();
            for res in table.iter()? {
                let (_k, v) = res?;
                users.push(serde_json::from_str::<User>(v.value())?);
            }
            Ok(users)
        })
    }

    fn user_by_username(&self, username: &str) -> BoxFuture<'_, Result<Option<User>, GortError>> {
        let username = username.to_string();
        Box::pin(async move {
            let read_txn = self.db.begin_read()?;
            let table = read_txn.open_table(USERS_TABLE)?;
            match table.get(username.as_str())? {
                Some(v) => Ok(Some(serde_json::from_str(v.value())?)),
                None => Ok(None),
            }
        })
    }

    fn user_by_mapping(
        &self,
        adapter: &str,
        provider_user_id: &str,
    ) -> BoxFuture<'_, Result<Option<User>, GortError>> {
        let mapping_key = format!("{adapter}:{provider_user_id}");
        Box::pin(async move {
            let read_txn = self.db.begin_read()?;
            let mappings = read_txn.open_table(USER_MAPPINGS_TABLE)?;
            let Some(username) = mappings.get(mapping_key.as_str())? else {
                return Ok(None);
            };
            let username = username.value().to_string();
            let users = read_txn.open_table(USERS_TABLE)?;
            match users.get(username.as_str())? {
                Some(v) => Ok(Some(serde_json::from_str(v.value())?)),
                None => Ok(None),
            }
        })
    }

    fn user_upsert(&self, user: User) -> BoxFuture<'_, Result<(), GortError>> {
        Box::pin(async move {
            let write_txn = self.db.begin_write()?;
            {
                let mut users = write_txn.open_table(USERS_TABLE)?;
                let val = serde_json::to_string(&user)?;
                users.insert(user.username.as_str(), val.as_str())?;

                let mut mappings = write_txn.open_table(USER_MAPPINGS_TABLE)?;
                for (adapter, provider_id) in &user.mappings {
                    let mapping_key = format!("{adapter}:{provider_id}");
                    mappings.insert(mapping_key.as_str(), user.username.as_str())?;
                }
            }
            write_txn.commit()?;
            Ok(())
        })
    }

    fn user_update(&self, patch: crate::model::user::UserPatch) -> BoxFuture<'_, Result<(), GortError>> {
        Box::pin(async move {
            let write_txn = self.db.begin_write()?;
            {
                let mut users = write_txn.open_table(USERS_TABLE)?;
                let Some(existing) = users.get(patch.username.as_str())? else {
                    return Err(GortError::Persistence(format!("no such user: {}", patch.username)));
                };
                let mut user: User = serde_json::from_str(existing.value())?;
                drop(existing);
                user.apply_patch(patch);
                let val = serde_json::to_string(&user)?;
                users.insert(user.username.as_str(), val.as_str())?;
            }
            write_txn.commit()?;
            Ok(())
        })
    }

    fn user_delete(&self, username: &str) -> BoxFuture<'_, Result<(), GortError>> {
        let username = username.to_string();
        Box::pin(async move {
            if username == crate::model::user::ADMIN_USERNAME {
                return Err(GortError::Persistence(
                    "user 'admin' cannot be deleted".to_string(),
                ));
            }
            let write_txn = self.db.begin_write()?;
            {
                let mut users = write_txn.open_table(USERS_TABLE)?;
                users.remove(username.as_str())?;
            }
            write_txn.commit()?;
            Ok(())
        })
    }

    fn groups_all(&self) -> BoxFuture<'_, Result<Vec<Group>, GortError>> {
        Box::pin(async move {
            let read_txn = self.db.begin_read()?;
            let table = read_txn.open_table(GROUPS_TABLE)?;
            let mut groups = Vec::new();
            for res in table.iter()? {
                let (_k, v) = res?;
                groups.push(serde_json::from_str::<Group>(v.value())?);
            }
            Ok(groups)
        })
    }

    fn group_upsert(&self, group: Group) -> BoxFuture<'_, Result<(), GortError>> {
        Box::pin(async move {
            let write_txn = self.db.begin_write()?;
            {
                let mut table = write_txn.open_table(GROUPS_TABLE)?;
                let val = serde_json::to_string(&group)?;
                table.insert(group.name.as_str(), val.as_str())?;
            }
            write_txn.commit()?;
            Ok(())
        })
    }

    fn group_delete(&self, name: &str) -> BoxFuture<'_, Result<(), GortError>> {
        let name = name.to_string();
        Box::pin(async move {
            let write_txn = self.db.begin_write()?;
            {
                let mut table = write_txn.open_table(GROUPS_TABLE)?;
                table.remove(name.as_str())?;
            }
            write_txn.commit()?;
            Ok(())
        })
    }

    fn roles_all(&self) -> BoxFuture<'_, Result<Vec<Role>, GortError>> {
        Box::pin(async move {
            let read_txn = self.db.begin_read()?;
            let table = read_txn.open_table(ROLES_TABLE)?;
            let mut roles = Vec::new();
            for res in table.iter()? {
                let (_k, v) = res?;
                roles.push(serde_json::from_str::<Role>(v.value())?);
            }
            Ok(roles)
        })
    }

    fn role_upsert(&self, role: Role) -> BoxFuture<'_, Result<(), GortError>> {
        Box::pin(async move {
            let write_txn = self.db.begin_write()?;
            {
                let mut table = write_txn.open_table(ROLES_TABLE)?;
                let val = serde_json::to_string(&role)?;
                table.insert(role.name.as_str(), val.as_str())?;
            }
            write_txn.commit()?;
            Ok(())
        })
    }

    fn role_delete(&self, name: &str) -> BoxFuture<'_, Result<(), GortError>> {
        let name = name.to_string();
        Box::pin(async move {
            let write_txn = self.db.begin_write()?;
            {
                let mut table = write_txn.open_table(ROLES_TABLE)?;
                table.remove(name.as_str())?;
            }
            write_txn.commit()?;
            Ok(())
        })
    }

    fn dynamic_config_list_for_worker(
        &self,
        bundle: &str,
    ) -> BoxFuture<'_, Result<Vec<DynamicConfiguration>, GortError>> {
        let bundle = bundle.to_string();
        Box::pin(async move {
            let read_txn = self.db.begin_read()?;
            let table = read_txn.open_table(DYNAMIC_CONFIG_TABLE)?;
            let mut entries = Vec::new();
            for res in table.iter()? {
                let (_k, v) = res?;
                let entry: DynamicConfiguration = serde_json::from_str(v.value())?;
                if entry.bundle == bundle {
                    entries.push(entry);
                }
            }
            Ok(entries)
        })
    }

    fn dynamic_config_list_masked(
        &self,
        bundle: &str,
    ) -> BoxFuture<'_, Result<Vec<DynamicConfiguration>, GortError>> {
        let bundle = bundle.to_string();
        Box::pin(async move {
            let read_txn = self.db.begin_read()?;
            let table = read_txn.open_table(DYNAMIC_CONFIG_TABLE)?;
            let mut entries = Vec::new();
            for res in table.iter()? {
                let (_k, v) = res?;
                let mut entry: DynamicConfiguration = serde_json::from_str(v.value())?;
                if entry.bundle == bundle {
                    if entry.secret {
                        entry.value = "<secret>".to_string();
                    }
                    entries.push(entry);
                }
            }
            Ok(entries)
        })
    }

    fn dynamic_config_set(&self, entry: DynamicConfiguration) -> BoxFuture<'_, Result<(), GortError>> {
        Box::pin(async move {
            let write_txn = self.db.begin_write()?;
            {
                let mut table = write_txn.open_table(DYNAMIC_CONFIG_TABLE)?;
                let key = config_key(&entry);
                let val = serde_json::to_string(&entry)?;
                table.insert(key.as_str(), val.as_str())?;
            }
            write_txn.commit()?;
            Ok(())
        })
    }

    fn token_generate(&self, username: &str) -> BoxFuture<'_, Result<Token, GortError>> {
        let username = username.to_string();
        Box::pin(async move {
            let token = crate::model::token::new_token(&username, chrono::Duration::hours(12));
            let write_txn = self.db.begin_write()?;
            {
                let mut table = write_txn.open_table(TOKENS_TABLE)?;
                let val = serde_json::to_string(&token)?;
                // Overwriting the single per-user key invalidates the
                // prior token, satisfying the at-most-one-active
                // invariant (§3, §8).
                table.insert(username.as_str(), val.as_str())?;
            }
            write_txn.commit()?;
            Ok(token)
        })
    }

    fn token_by_value(&self, token: &str) -> BoxFuture<'_, Result<Option<Token>, GortError>> {
        let token = token.to_string();
        Box::pin(async move {
            let read_txn = self.db.begin_read()?;
            let table = read_txn.open_table(TOKENS_TABLE)?;
            for res in table.iter()? {
                let (_k, v) = res?;
                let candidate: Token = serde_json::from_str(v.value())?;
                if candidate.token == token {
                    return Ok(Some(candidate));
                }
            }
            Ok(None)
        })
    }

    fn request_begin(&self, request: CommandRequest) -> BoxFuture<'_, Result<Uuid, GortError>> {
        Box::pin(async move {
            let write_txn = self.db.begin_write()?;
            let id = request.request_id;
            {
                let mut table = write_txn.open_table(REQUESTS_TABLE)?;
                let val = serde_json::to_string(&request)?;
                table.insert(id.to_string().as_str(), val.as_str())?;
            }
            write_txn.commit()?;
            Ok(id)
        })
    }

    fn request_close(&self, response: CommandResponse) -> BoxFuture<'_, Result<(), GortError>> {
        Box::pin(async move {
            let write_txn = self.db.begin_write()?;
            {
                let mut table = write_txn.open_table(RESPONSES_TABLE)?;
                let val = serde_json::to_string(&response)?;
                table.insert(response.request_id.to_string().as_str(), val.as_str())?;
            }
            write_txn.commit()?;
            Ok(())
        })
    }

    fn schedules_all(&self) -> BoxFuture<'_, Result<Vec<Schedule>, GortError>> {
        Box::pin(async move {
            let read_txn = self.db.begin_read()?;
            let table = read_txn.open_table(SCHEDULES_TABLE)?;
            let mut schedules = Vec::new();
            for res in table.iter()? {
                let (_k, v) = res?;
                schedules.push(serde_json::from_str::<Schedule>(v.value())?);
            }
            Ok(schedules)
        })
    }

    fn schedule_create(&self, schedule: Schedule) -> BoxFuture<'_, Result<Uuid, GortError>> {
        Box::pin(async move {
            let write_txn = self.db.begin_write()?;
            let id = schedule.schedule_id;
            {
                let mut table = write_txn.open_table(SCHEDULES_TABLE)?;
                let val = serde_json::to_string(&schedule)?;
                table.insert(id.to_string().as_str(), val.as_str())?;
            }
            write_txn.commit()?;
            Ok(id)
        })
    }

    fn schedule_delete(&self, schedule_id: Uuid) -> BoxFuture<'_, Result<(), GortError>> {
        Box::pin(async move {
            let write_txn = self.db.begin_write()?;
            {
                let mut table = write_txn.open_table(SCHEDULES_TABLE)?;
                table.remove(schedule_id.to_string().as_str())?;
            }
            write_txn.commit()?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::bundle::Templates;
    use chrono::Utc;
    use tempfile::tempdir;

    fn test_bundle(name: &str, version: &str) -> Bundle {
        Bundle {
            gort_bundle_version: 1,
            name: name.to_string(),
            version: version.to_string(),
            description: String::new(),
            long_description: String::new(),
            author: String::new(),
            homepage: String::new(),
            image: None,
            permissions: vec![],
            commands: Default::default(),
            templates: Templates::default(),
            kubernetes: None,
            enabled: false,
            install_user: "admin".to_string(),
            install_timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn enabling_one_version_disables_siblings() {
        let dir = tempdir().unwrap();
        let store = RedbStore::new(dir.path().join("test.redb")).unwrap();
        store.bundle_install(test_bundle("gort", "1.0.0")).await.unwrap();
        store.bundle_install(test_bundle("gort", "2.0.0")).await.unwrap();

        store.bundle_enable("gort", "1.0.0").await.unwrap();
        let bundles = store.bundles_all().await.unwrap();
        let enabled: Vec<&Bundle> = bundles.iter().filter(|b| b.enabled).collect();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].version, "1.0.0");

        store.bundle_enable("gort", "2.0.0").await.unwrap();
        let bundles = store.bundles_all().await.unwrap();
        let enabled: Vec<&Bundle> = bundles.iter().filter(|b| b.enabled).collect();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].version, "2.0.0");
    }

    #[tokio::test]
    async fn token_generate_invalidates_prior() {
        let dir = tempdir().unwrap();
        let store = RedbStore::new(dir.path().join("test.redb")).unwrap();
        let first = store.token_generate("alice").await.unwrap();
        let second = store.token_generate("alice").await.unwrap();
        assert_ne!(first.token, second.token);
        assert!(store.token_by_value(&first.token).await.unwrap().is_none());
        assert!(store.token_by_value(&second.token).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn admin_user_cannot_be_deleted() {
        let dir = tempdir().unwrap();
        let store = RedbStore::new(dir.path().join("test.redb")).unwrap();
        let err = store.user_delete("admin").await.unwrap_err();
        assert!(matches!(err, GortError::Persistence(_)));
    }

    #[tokio::test]
    async fn user_update_with_one_field_leaves_others_intact() {
        use crate::model::user::UserPatch;

        let dir = tempdir().unwrap();
        let store = RedbStore::new(dir.path().join("test.redb")).unwrap();
        let mut user = User {
            username: "alice".to_string(),
            email: "alice@example.com".to_string(),
            full_name: "Alice Example".to_string(),
            password_hash: "hash1".to_string(),
            mappings: Default::default(),
        };
        user.mappings.insert("loopback".to_string(), "U1".to_string());
        store.user_upsert(user).await.unwrap();

        store
            .user_update(UserPatch {
                username: "alice".to_string(),
                email: Some("alice@newdomain.example".to_string()),
                full_name: None,
                password_hash: None,
            })
            .await
            .unwrap();

        let updated = store.user_by_username("alice").await.unwrap().unwrap();
        assert_eq!(updated.email, "alice@newdomain.example");
        assert_eq!(updated.full_name, "Alice Example");
        assert_eq!(updated.password_hash, "hash1");
        assert_eq!(updated.mappings.get("loopback"), Some(&"U1".to_string()));
    }

    #[tokio::test]
    async fn user_update_of_unknown_username_errors() {
        use crate::model::user::UserPatch;

        let dir = tempdir().unwrap();
        let store = RedbStore::new(dir.path().join("test.redb")).unwrap();
        let err = store
            .user_update(UserPatch {
                username: "ghost".to_string(),
                email: Some("ghost@example.com".to_string()),
                full_name: None,
                password_hash: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, GortError::Persistence(_)));
    }
}
